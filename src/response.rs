//! Response Emitter (C8).
//!
//! Turns an operation's `(status, body, content-type, headers)` tuple, or
//! an abort-early error, into a concrete [`crate::types::Response`].
//! Content-Type is taken from the operation/formatter when not already set
//! by the caller; Content-Length always comes from the in-memory body,
//! since nothing here streams yet; XML bodies get the `<?xml …?>` DTD
//! prepended if the body doesn't already carry one; Swift responses get
//! `; charset=utf-8` appended to Content-Type, matching that dialect's
//! plain-text-leaning clients.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode};

use crate::body::GatewayBody;
use crate::envelope::Dialect;
use crate::format::{self, Format};
use crate::ops::ExecuteOutcome;
use crate::types::Response;

const XML_DTD: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

fn finalize_content_type(dialect: Dialect, content_type: &'static str) -> String {
    match dialect {
        Dialect::Swift => format!("{content_type}; charset=utf-8"),
        Dialect::S3 => content_type.to_string(),
    }
}

fn with_xml_dtd(content_type: &str, body: Bytes) -> Bytes {
    if content_type.contains("xml") && !body.starts_with(b"<?xml") {
        let mut out = Vec::with_capacity(XML_DTD.len() + body.len());
        out.extend_from_slice(XML_DTD.as_bytes());
        out.extend_from_slice(&body);
        Bytes::from(out)
    } else {
        body
    }
}

fn base_response(dialect: Dialect, status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let content_type = finalize_content_type(dialect, content_type);
    let body = with_xml_dtd(&content_type, body);
    let mut res = hyper::Response::new(GatewayBody::from(body.clone()));
    *res.status_mut() = status;
    res.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    res.headers_mut().insert(
        http::header::CONTENT_LENGTH,
        HeaderValue::from_str(&body.len().to_string()).unwrap(),
    );
    res
}

/// Renders a successful operation outcome into a wire response, attaching
/// whatever extra headers the operation asked for (ETag, Content-Range, …).
pub fn render_success(dialect: Dialect, outcome: ExecuteOutcome) -> Response {
    let mut res = base_response(dialect, outcome.status, outcome.content_type, outcome.body);
    for (name, value) in outcome.extra_headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(&value)) {
            res.headers_mut().insert(name, value);
        }
    }
    res
}

/// Renders the single abort-early error path: status line, dialect-shaped
/// error body, and the header terminator the transport layer emits for us
/// once this response is handed back.
pub fn render_error(dialect: Dialect, format: Format, status: StatusCode, code: &str, message: &str) -> Response {
    let (body, content_type) = format::render_error(format, code, message);
    let content_type: &'static str = match content_type {
        "application/xml" => "application/xml",
        _ => "application/json",
    };
    base_response(dialect, status, content_type, Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swift_responses_get_charset_suffix() {
        let res = render_error(Dialect::Swift, Format::Json, StatusCode::NOT_FOUND, "Not Found", "missing");
        let ct = res.headers().get(http::header::CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(ct.ends_with("; charset=utf-8"));
    }

    #[test]
    fn xml_body_without_dtd_gets_one_prepended() {
        let outcome = ExecuteOutcome {
            status: StatusCode::OK,
            body: Bytes::from_static(b"<Foo/>"),
            content_type: "application/xml",
            extra_headers: vec![],
        };
        let res = render_success(Dialect::S3, outcome);
        assert_eq!(
            res.headers().get(http::header::CONTENT_LENGTH).unwrap(),
            &(XML_DTD.len() + "<Foo/>".len()).to_string()
        );
    }
}
