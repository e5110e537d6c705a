//! Per-request state object (C3).
//!
//! A `RequestEnvelope` is created on accept and destroyed after the response
//! is flushed — every exit path in [`crate::pipeline`] goes through
//! `Drop`-backed cleanup, so there is no path that leaks one.

use std::collections::HashMap;
use std::time::Instant;

use http::{HeaderMap, StatusCode};

use crate::error::GatewayError;
use crate::auth::UserRecord;

/// The request method, normalized from the transport method. `Copy` is its
/// own variant because both dialects can route a copy by method name
/// instead of by header (Swift's `COPY`), and treating it as a first-class
/// method keeps dispatch in [`crate::dialect`] a plain match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReqMethod {
    Get,
    Put,
    Delete,
    Head,
    Post,
    Copy,
    Unknown,
}

impl From<&http::Method> for ReqMethod {
    fn from(m: &http::Method) -> Self {
        match *m {
            http::Method::GET => ReqMethod::Get,
            http::Method::PUT => ReqMethod::Put,
            http::Method::DELETE => ReqMethod::Delete,
            http::Method::HEAD => ReqMethod::Head,
            http::Method::POST => ReqMethod::Post,
            ref other if other.as_str().eq_ignore_ascii_case("copy") => ReqMethod::Copy,
            _ => ReqMethod::Unknown,
        }
    }
}

/// Which of the two REST personalities a request is being served under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    S3,
    Swift,
}

/// The numeric/short/long/HTTP-status error tuple an envelope carries once
/// a pipeline step fails. Populated by [`RequestEnvelope::set_error`].
#[derive(Debug, Clone)]
pub struct ErrorSlot {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

/// Headers recognized as metadata-bearing prefixes. Each is stripped before
/// the remaining name is lowercased and underscore-normalized.
const METADATA_PREFIXES: &[&str] = &["x-amz-meta-", "x-goog-meta-", "x-object-meta-", "x-container-meta-"];

/// Normalizes a raw header map into the metadata map described in
/// the metadata normalization rules: prefix-stripped, underscores become hyphens, lowercased,
/// CR/LF-unfolded, leading whitespace dropped, duplicates comma-joined.
///
/// Returns the normalized map plus a "bad meta" flag, set when a header's
/// name reduces to the empty string after prefix-stripping (the `_META_`
/// sentinel case).
pub fn normalize_metadata_headers(headers: &HeaderMap) -> (HashMap<String, String>, bool) {
    let mut out: HashMap<String, String> = HashMap::new();
    let mut bad_meta = false;

    for (name, value) in headers.iter() {
        let name = name.as_str();
        let Some(prefix) = METADATA_PREFIXES
            .iter()
            .find(|p| name.len() > p.len() && name[..p.len()].eq_ignore_ascii_case(p))
        else {
            continue;
        };

        let stripped = &name[prefix.len()..];
        if stripped.is_empty() || stripped.eq_ignore_ascii_case("_META_") {
            bad_meta = true;
            continue;
        }

        let normalized_name = stripped.to_ascii_lowercase().replace('_', "-");
        let raw_value = value.to_str().unwrap_or("");
        let unfolded = unfold_header_value(raw_value);

        out.entry(normalized_name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&unfolded);
            })
            .or_insert(unfolded);
    }

    (out, bad_meta)
}

/// Collapses CR/LF line-folding sequences to a single space and trims
/// leading whitespace on each folded continuation, per RFC 7230 obs-fold
/// handling.
fn unfold_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' || c == '\n' {
            while matches!(chars.peek(), Some(' ') | Some('\t') | Some('\r') | Some('\n')) {
                chars.next();
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out.trim_start().to_string()
}

/// Per-request state object carrying everything a pipeline step needs to know about one in-flight request.
pub struct RequestEnvelope {
    pub request_id: u64,
    pub method: ReqMethod,
    pub raw_uri: String,
    pub decoded_path: String,
    pub query: HashMap<String, String>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub dialect: Dialect,
    pub bucket: Option<String>,
    pub object: Option<String>,
    pub user: Option<UserRecord>,
    pub metadata: HashMap<String, String>,
    pub bad_meta: bool,
    pub expect_continue: bool,
    pub error: Option<ErrorSlot>,
    pub started_at: Instant,
    pub opname: String,
}

impl RequestEnvelope {
    pub fn new(request_id: u64, method: ReqMethod, raw_uri: String, dialect: Dialect) -> Self {
        Self {
            request_id,
            method,
            raw_uri,
            decoded_path: String::new(),
            query: HashMap::new(),
            content_length: None,
            content_type: None,
            authorization: None,
            dialect,
            bucket: None,
            object: None,
            user: None,
            metadata: HashMap::new(),
            bad_meta: false,
            expect_continue: false,
            error: None,
            started_at: Instant::now(),
            opname: String::from("Unknown"),
        }
    }

    /// Populates the error slot from a [`GatewayError`], resolving the
    /// dialect-specific status/short-code pair, falling back to
    /// 500/`UnknownError` on a miss (never panics).
    pub fn set_error(&mut self, err: &GatewayError, message: impl Into<String>) {
        let (status, code) = err.to_error_code(self.dialect);
        self.error = Some(ErrorSlot {
            status,
            code,
            message: message.into(),
        });
    }

    /// Prefixes every log line with `req <id>:<elapsed>:<dialect>:<method +
    /// bucket/path>:<opname>:<message>`, matching the single logging helper
    /// the single logging helper calls for.
    pub fn log(&self, level: tracing::Level, message: &str) {
        let elapsed = self.started_at.elapsed();
        let dialect = match self.dialect {
            Dialect::S3 => "s3",
            Dialect::Swift => "swift",
        };
        let bucket_path = self.bucket.as_deref().unwrap_or("-");
        let line = format!(
            "req {}:{:?}:{}:{:?} {}:{}:{}",
            self.request_id, elapsed, dialect, self.method, bucket_path, self.opname, message
        );
        match level {
            tracing::Level::ERROR => tracing::error!(request_id = self.request_id, "{}", line),
            tracing::Level::WARN => tracing::warn!(request_id = self.request_id, "{}", line),
            tracing::Level::INFO => tracing::info!(request_id = self.request_id, "{}", line),
            tracing::Level::DEBUG => tracing::debug!(request_id = self.request_id, "{}", line),
            tracing::Level::TRACE => tracing::trace!(request_id = self.request_id, "{}", line),
        }
    }
}
