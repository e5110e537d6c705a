//! Conversion of ordinary return types into [`Response<GatewayBody>`].
//!
//! Most of the gateway builds responses explicitly through
//! [`crate::response`], but a few corners (health checks, fallback error
//! paths) are easier to write as a plain value and let `Responder` do the
//! wrapping.

use std::{convert::Infallible, fmt::Display};

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;

use crate::body::GatewayBody;

pub trait Responder {
    fn into_response(self) -> Response<GatewayBody>;
}

impl Responder for Response<GatewayBody> {
    fn into_response(self) -> Response<GatewayBody> {
        self
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(GatewayBody::new(Full::from(Bytes::from_static(self.as_bytes()))))
    }
}

impl Responder for String {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(GatewayBody::new(Full::from(Bytes::from(self))))
    }
}

impl Responder for () {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(GatewayBody::empty())
    }
}

impl Responder for Infallible {
    fn into_response(self) -> Response<GatewayBody> {
        match self {}
    }
}

/// Static header name/value pairs, for responses that only ever set a
/// fixed handful of headers (e.g. a health check).
pub struct StaticHeaders<const N: usize>(pub [(HeaderName, &'static str); N]);

impl<const N: usize> Responder for (StatusCode, StaticHeaders<N>) {
    fn into_response(self) -> Response<GatewayBody> {
        let (status, StaticHeaders(headers)) = self;
        let mut res = Response::new(GatewayBody::empty());
        *res.status_mut() = status;
        for (name, value) in headers {
            res.headers_mut().append(name, HeaderValue::from_static(value));
        }
        res
    }
}

impl<R> Responder for (StatusCode, R)
where
    R: Display,
{
    fn into_response(self) -> Response<GatewayBody> {
        let (status, body) = self;
        let mut res = Response::new(GatewayBody::new(Full::from(Bytes::from(body.to_string()))));
        *res.status_mut() = status;
        res
    }
}

impl Responder for GatewayBody {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(self)
    }
}

/// Falls back to a 400 Bad Request with the error's `Display` text. Used by
/// code paths that bail out with `anyhow::Error` before a dialect is known,
/// so no dialect-specific error code table applies yet.
impl Responder for anyhow::Error {
    fn into_response(self) -> Response<GatewayBody> {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_responder_defaults_to_200() {
        let res = "hello".into_response();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn status_and_display_pair_sets_status() {
        let res = (StatusCode::NOT_FOUND, "missing").into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
