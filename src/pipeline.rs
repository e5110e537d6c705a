//! Operation Pipeline (C6): the per-request state machine.
//!
//! Drives one envelope from accept through response in the fixed order —
//! parse → route → authorize → load permissions → verify → execute → log
//! — with a single abort-early path any step can jump to. Grounded in the
//! same one-pipeline-function shape [`crate::ops::Operation`] itself uses:
//! no per-step object, just a sequential function matching on outcomes.

use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::StatusCode;
use http_body_util::BodyExt;

use crate::auth::UserRecord;
use crate::backend::ObjectAttrs;
use crate::config::GatewayConfig;
use crate::dialect::DialectManager;
use crate::envelope::{Dialect, ReqMethod, RequestEnvelope};
use crate::error::{ClientError, GatewayError};
use crate::format::{self, AclDocument, Format};
use crate::ops::{OpKind, OpParams};
use crate::reserve::AsyncReserver;
use crate::response;
use crate::router::DialectRouter;
use crate::types::{Request, Response};

/// Everything a single call to [`handle`] needs that outlives the request:
/// the routing table, the live config (read fresh each request so a SIGHUP
/// reload takes effect on the next one in), and the shared per-upload-id
/// reservation queue C7's multipart operations serialize on.
pub struct PipelineContext {
    pub router: DialectRouter,
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub multipart_reserver: Arc<AsyncReserver<String>>,
}

impl PipelineContext {
    pub fn new(router: DialectRouter, config: Arc<ArcSwap<GatewayConfig>>) -> Self {
        Self {
            router,
            config,
            multipart_reserver: Arc::new(AsyncReserver::new(64)),
        }
    }
}

/// Bridges [`AsyncReserver`]'s callback sink to `async`/`await`: the ready
/// callback sends on a oneshot channel the worker awaits, matching the
/// "callback chains become messages on a typed channel" design note.
struct Reservation<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    reserver: Arc<AsyncReserver<K>>,
    key: K,
}

impl<K> Drop for Reservation<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.reserver.release(&self.key);
    }
}

async fn reserve<K>(reserver: Arc<AsyncReserver<K>>, key: K) -> Reservation<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    reserver.request(key.clone(), move |k| {
        let _ = tx.send(k);
    });
    let _ = rx.await;
    Reservation { reserver, key }
}

fn dialect_of(manager: &dyn DialectManager) -> Dialect {
    match manager.name() {
        "swift" => Dialect::Swift,
        _ => Dialect::S3,
    }
}

/// Splits a `bytes=start-end` Range header into `(start, end)`, using `0`
/// as the sentinel [`crate::ops::Operation::execute`] already treats as
/// "to the end of the object" for an open-ended range.
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() { 0 } else { end.parse().ok()? };
    Some((start, end))
}

/// Scans a `<CompleteMultipartUpload>` body for ordered `(PartNumber,
/// ETag)` pairs. Not a general XML parser — just enough string scanning
/// for the one shape this body ever takes, in the same spirit as
/// [`crate::format`]'s hand-rolled rendering.
fn parse_complete_parts(body: &str) -> Vec<(u32, String)> {
    let mut parts = Vec::new();
    for part_block in body.split("<Part>").skip(1) {
        let part_block = part_block.split("</Part>").next().unwrap_or("");
        let number = extract_tag(part_block, "PartNumber").and_then(|s| s.parse().ok());
        let etag = extract_tag(part_block, "ETag").map(|s| s.trim_matches('"').to_string());
        if let (Some(number), Some(etag)) = (number, etag) {
            parts.push((number, etag));
        }
    }
    parts
}

/// Scans a multi-object-delete body for `<Key>` entries.
fn parse_delete_keys(body: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for block in body.split("<Object>").skip(1) {
        let block = block.split("</Object>").next().unwrap_or("");
        if let Some(key) = extract_tag(block, "Key") {
            keys.push(key);
        }
    }
    keys
}

fn extract_tag(haystack: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = haystack.find(&open)? + open.len();
    let end = haystack[start..].find(&close)? + start;
    Some(haystack[start..end].to_string())
}

fn load_acl(owner: &str, attrs_acl: Option<&str>) -> Option<AclDocument> {
    AclDocument::from_canned(owner, attrs_acl.unwrap_or("private"))
}

/// Runs the full C6 sequence for one request and returns the response to
/// write back. Never panics on a client-caused failure — every error path
/// funnels through the single abort-early branch.
pub async fn handle(ctx: &PipelineContext, request_id: u64, req: Request) -> Response {
    let method = ReqMethod::from(req.method());
    let raw_uri = req.uri().to_string();

    let Some((manager, rest)) = ctx.router.resolve(req.uri().path()) else {
        let mut env = RequestEnvelope::new(request_id, method, raw_uri, Dialect::S3);
        env.set_error(&GatewayError::Client(ClientError::MethodNotAllowed), "no dialect matched");
        env.log(tracing::Level::WARN, "no route");
        return response::render_error(Dialect::S3, Format::Xml, StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "no route");
    };
    let dialect = dialect_of(manager.as_ref());
    let mut env = RequestEnvelope::new(request_id, method, raw_uri, dialect);

    let decoded_path = urlencoding::decode(rest).map(|c| c.into_owned()).unwrap_or_else(|_| rest.to_string());
    env.decoded_path = decoded_path.clone();

    if let Some(q) = req.uri().query() {
        for pair in q.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let k = urlencoding::decode(k).map(|c| c.into_owned()).unwrap_or_else(|_| k.to_string());
            let v = urlencoding::decode(v).map(|c| c.into_owned()).unwrap_or_else(|_| v.to_string());
            env.query.entry(k).or_insert(v);
        }
    }

    let parsed = manager.parse_path(&decoded_path);
    env.bucket = parsed.bucket;
    env.object = parsed.object;

    let headers = req.headers().clone();
    env.content_length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    env.content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    env.authorization = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    env.expect_continue = headers
        .get(http::header::EXPECT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("100-continue"))
        .unwrap_or(false);
    let (metadata, bad_meta) = crate::envelope::normalize_metadata_headers(&headers);
    env.metadata = metadata;
    env.bad_meta = bad_meta;

    let accept = headers.get(http::header::ACCEPT).and_then(|v| v.to_str().ok());
    let format = format::negotiate(accept, Format::Xml);

    if let Some(bucket) = env.bucket.clone() {
        if let Err(e) = manager.validate_bucket_name(&bucket) {
            return abort(&mut env, manager.as_ref(), format, GatewayError::Client(e), "invalid bucket name");
        }
    }
    if let Some(object) = env.object.clone() {
        if let Err(e) = manager.validate_object_name(&object) {
            return abort(&mut env, manager.as_ref(), format, GatewayError::Client(e), "invalid object key");
        }
    }
    if env.bad_meta {
        return abort(
            &mut env,
            manager.as_ref(),
            format,
            GatewayError::Client(ClientError::MalformedRequest("bad metadata header".into())),
            "bad metadata header",
        );
    }

    let Some(mut op) = manager.get_op(&env) else {
        return abort(&mut env, manager.as_ref(), format, GatewayError::Client(ClientError::MethodNotAllowed), "unsupported method/path");
    };
    env.opname = format!("{:?}", op.kind);

    let user = match manager.authorize(&env).await {
        Ok(u) => u,
        Err(e) => return abort(&mut env, manager.as_ref(), format, GatewayError::Client(e), "authorization failed"),
    };
    if user.suspended {
        return abort(&mut env, manager.as_ref(), format, GatewayError::Client(ClientError::UserSuspended), "user suspended");
    }
    env.user = Some(user.clone());

    let (body_bytes, body_str) = match req.into_body().collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let s = String::from_utf8_lossy(&bytes).into_owned();
            (bytes, s)
        }
        Err(_) => {
            return abort(
                &mut env,
                manager.as_ref(),
                format,
                GatewayError::Client(ClientError::MalformedRequest("failed to read request body".into())),
                "body read failed",
            )
        }
    };

    fill_late_params(&mut op.params, &headers, &body_str);

    let backend = manager.backend();
    let permission_mode = manager.read_permissions(&op);
    let (bucket_acl, object_acl) = match load_permissions(backend.as_ref(), &env, permission_mode).await {
        Ok(pair) => pair,
        Err(e) => return abort(&mut env, manager.as_ref(), format, e, "failed to load permissions"),
    };

    if let Err(e) = op.verify_permission(&env, bucket_acl.as_ref(), object_acl.as_ref()) {
        return abort(&mut env, manager.as_ref(), format, e, "access denied");
    }
    if let Err(e) = op.verify_params() {
        return abort(&mut env, manager.as_ref(), format, e, "invalid operation parameters");
    }

    // Parts of the same upload run concurrently in real clients, so the key
    // includes the part number — only Complete/Abort (terminal, one-shot
    // calls) serialize on the bare upload id.
    let _reservation = match op.kind {
        OpKind::MultipartUploadPart => {
            let key = format!(
                "{}:{}:{}:{}",
                env.bucket.as_deref().unwrap_or(""),
                env.object.as_deref().unwrap_or(""),
                op.params.upload_id.as_deref().unwrap_or(""),
                op.params.part_number.unwrap_or(0)
            );
            Some(reserve(ctx.multipart_reserver.clone(), key).await)
        }
        OpKind::MultipartComplete | OpKind::MultipartAbort => {
            let key = format!(
                "{}:{}:{}:terminal",
                env.bucket.as_deref().unwrap_or(""),
                env.object.as_deref().unwrap_or(""),
                op.params.upload_id.as_deref().unwrap_or("")
            );
            Some(reserve(ctx.multipart_reserver.clone(), key).await)
        }
        _ => None,
    };

    let prefetched = match op.prefetch_data(&env, backend.as_ref()).await {
        Ok(p) => p,
        Err(e) => return abort(&mut env, manager.as_ref(), format, e, "prefetch failed"),
    };

    let max_put_size = ctx.config.load().max_put_size;
    let outcome = match op
        .execute(&mut env, backend.as_ref(), body_bytes, &prefetched, max_put_size, format)
        .await
    {
        Ok(o) => o,
        Err(e) => return abort(&mut env, manager.as_ref(), format, e, "operation failed"),
    };

    env.log(tracing::Level::INFO, "ok");
    log_usage(&env, &user, true);
    response::render_success(dialect, outcome)
}

fn abort(
    env: &mut RequestEnvelope,
    manager: &dyn DialectManager,
    format: Format,
    err: GatewayError,
    message: &str,
) -> Response {
    let dialect = dialect_of(manager);
    env.set_error(&err, message);
    let level = match &err {
        GatewayError::Client(_) => tracing::Level::WARN,
        GatewayError::Backend(_) => tracing::Level::ERROR,
    };
    env.log(level, message);
    if let Some(user) = &env.user {
        log_usage(env, user, false);
    }
    let slot = env.error.as_ref().expect("set_error always populates the slot");
    response::render_error(dialect, format, slot.status, slot.code, &slot.message)
}

async fn load_permissions(
    backend: &dyn crate::backend::ObjectStore,
    env: &RequestEnvelope,
    mode: crate::ops::PermissionMode,
) -> Result<(Option<AclDocument>, Option<AclDocument>), GatewayError> {
    use crate::ops::PermissionMode::*;
    if matches!(mode, Skip) {
        return Ok((None, None));
    }
    let Some(bucket) = env.bucket.as_deref() else {
        return Ok((None, None));
    };
    let bucket_attrs = backend.bucket_attrs(bucket).await?;
    let bucket_acl = load_acl(&bucket_attrs.owner, bucket_attrs.acl.as_deref());

    let object_acl = if matches!(mode, BucketAndObject) {
        if let Some(object) = env.object.as_deref() {
            match backend.head_object(bucket, object).await {
                Ok(attrs) => acl_from_object(&attrs),
                Err(GatewayError::Client(ClientError::NoSuchKey)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        }
    } else {
        None
    };

    Ok((bucket_acl, object_acl))
}

fn acl_from_object(attrs: &ObjectAttrs) -> Option<AclDocument> {
    load_acl(&attrs.owner, attrs.acl.as_deref())
}

fn fill_late_params(params: &mut OpParams, headers: &http::HeaderMap, body: &str) {
    params.range = headers
        .get(http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);
    params.if_match = headers.get(http::header::IF_MATCH).and_then(|v| v.to_str().ok()).map(str::to_string);
    params.if_none_match = headers
        .get(http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    params.if_modified_since = headers
        .get(http::header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    params.if_unmodified_since = headers
        .get(http::header::IF_UNMODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    params.content_md5 = headers.get("Content-MD5").and_then(|v| v.to_str().ok()).map(str::to_string);
    params.manifest = headers.get("X-Object-Manifest").and_then(|v| v.to_str().ok()).map(str::to_string);

    if !body.is_empty() {
        if body.contains("<CompleteMultipartUpload") {
            params.parts = parse_complete_parts(body);
        } else if body.contains("<Delete") {
            params.keys_to_delete = parse_delete_keys(body);
        }
    }
}

fn log_usage(env: &RequestEnvelope, user: &UserRecord, success: bool) {
    tracing::info!(
        target: "gatehouse::usage",
        request_id = env.request_id,
        user = %user.id,
        op = %env.opname,
        success,
        "usage"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_reads_closed_range() {
        assert_eq!(parse_range("bytes=0-99"), Some((0, 99)));
    }

    #[test]
    fn parse_range_open_ended_uses_zero_sentinel() {
        assert_eq!(parse_range("bytes=10-"), Some((10, 0)));
    }

    #[test]
    fn parse_range_rejects_non_bytes_unit() {
        assert_eq!(parse_range("items=0-1"), None);
    }

    #[test]
    fn parse_complete_parts_reads_ordered_pairs() {
        let body = "<CompleteMultipartUpload>\
            <Part><PartNumber>1</PartNumber><ETag>\"a\"</ETag></Part>\
            <Part><PartNumber>2</PartNumber><ETag>\"b\"</ETag></Part>\
            </CompleteMultipartUpload>";
        let parts = parse_complete_parts(body);
        assert_eq!(parts, vec![(1, "a".to_string()), (2, "b".to_string())]);
    }

    #[test]
    fn parse_delete_keys_reads_each_key() {
        let body = "<Delete><Object><Key>a.txt</Key></Object><Object><Key>b.txt</Key></Object></Delete>";
        assert_eq!(parse_delete_keys(body), vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn extract_tag_returns_none_when_absent() {
        assert_eq!(extract_tag("<Foo>bar</Foo>", "Missing"), None);
    }

    #[test]
    fn load_acl_defaults_to_private_when_attrs_acl_absent() {
        let acl = load_acl("alice", None).unwrap();
        assert_eq!(acl.owner, "alice");
        assert!(acl.permits("alice", &crate::format::Permission::FullControl));
        assert!(!acl.permits("mallory", &crate::format::Permission::Read));
    }

    #[test]
    fn fill_late_params_parses_manifest_header() {
        let mut params = OpParams::default();
        let mut headers = http::HeaderMap::new();
        headers.insert("X-Object-Manifest", "parts/big/".parse().unwrap());
        fill_late_params(&mut params, &headers, "");
        assert_eq!(params.manifest.as_deref(), Some("parts/big/"));
    }

    #[test]
    fn fill_late_params_parses_conditional_headers() {
        let mut params = OpParams::default();
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::IF_MODIFIED_SINCE, "Wed, 01 Jan 2024 00:00:00 GMT".parse().unwrap());
        fill_late_params(&mut params, &headers, "");
        assert_eq!(params.if_modified_since.as_deref(), Some("Wed, 01 Jan 2024 00:00:00 GMT"));
    }
}
