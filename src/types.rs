//! Core type aliases shared across the gateway: requests, responses, and
//! the boxed body/error types used internally to erase concrete bodies.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;

use crate::body::GatewayBody;

/// Incoming HTTP request as handed to the router by the connection layer.
pub type Request = hyper::Request<Incoming>;

/// Outgoing HTTP response, built on [`GatewayBody`].
pub type Response = hyper::Response<GatewayBody>;

pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
