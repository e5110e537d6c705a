//! Error taxonomy for the gateway core.
//!
//! Every fallible call in the pipeline and operation layers returns
//! `Result<T, GatewayError>`. There is no panic-based control flow here
//! outside the two documented programming-error traps in [`crate::reserve`]
//! and [`crate::pool`] — those call `unreachable!` deliberately, because a
//! precondition violation there means the caller already broke an invariant
//! the type system can't express.

use http::StatusCode;

use crate::envelope::Dialect;

/// Client-caused failures: malformed requests, auth failures, missing
/// resources, and the like. All map to a 4xx/5xx status plus a short,
/// dialect-specific code.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("access denied")]
    AccessDenied,
    #[error("invalid credentials")]
    InvalidAccessKey,
    #[error("signature does not match")]
    SignatureMismatch,
    #[error("bucket not found")]
    NoSuchBucket,
    #[error("key not found")]
    NoSuchKey,
    #[error("upload not found")]
    NoSuchUpload,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("bucket already exists")]
    BucketAlreadyExists,
    #[error("bucket not empty")]
    BucketNotEmpty,
    #[error("content-length required")]
    MissingContentLength,
    #[error("request entity too large")]
    EntityTooLarge,
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("range not satisfiable")]
    InvalidRange,
    #[error("checksum mismatch")]
    BadDigest,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid bucket name")]
    InvalidBucketName,
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("invalid part order or size")]
    InvalidPart,
    #[error("user suspended")]
    UserSuspended,
}

/// Failures originating below the request layer: the backend, timeouts, or
/// a violated internal invariant that isn't a precondition trap.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable")]
    Unreachable,
    #[error("internal invariant violation: {0}")]
    Invariant(String),
    #[error("operation timed out")]
    Timeout,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// `(HTTP status, dialect short code)` — the pair the envelope's error slot
/// stores and the response emitter renders into a body.
pub type ErrorCode = (StatusCode, &'static str);

const UNKNOWN: ErrorCode = (StatusCode::INTERNAL_SERVER_ERROR, "UnknownError");

fn s3_client_code(e: &ClientError) -> ErrorCode {
    use ClientError::*;
    match e {
        MalformedRequest(_) => (StatusCode::BAD_REQUEST, "MalformedRequest"),
        AccessDenied => (StatusCode::FORBIDDEN, "AccessDenied"),
        InvalidAccessKey => (StatusCode::FORBIDDEN, "InvalidAccessKeyId"),
        SignatureMismatch => (StatusCode::FORBIDDEN, "SignatureDoesNotMatch"),
        NoSuchBucket => (StatusCode::NOT_FOUND, "NoSuchBucket"),
        NoSuchKey => (StatusCode::NOT_FOUND, "NoSuchKey"),
        NoSuchUpload => (StatusCode::NOT_FOUND, "NoSuchUpload"),
        MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed"),
        BucketAlreadyExists => (StatusCode::CONFLICT, "BucketAlreadyExists"),
        BucketNotEmpty => (StatusCode::CONFLICT, "BucketNotEmpty"),
        MissingContentLength => (StatusCode::LENGTH_REQUIRED, "MissingContentLength"),
        EntityTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "EntityTooLarge"),
        PreconditionFailed => (StatusCode::PRECONDITION_FAILED, "PreconditionFailed"),
        InvalidRange => (StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange"),
        BadDigest => (StatusCode::BAD_REQUEST, "BadDigest"),
        NotImplemented => (StatusCode::NOT_IMPLEMENTED, "NotImplemented"),
        InvalidBucketName => (StatusCode::BAD_REQUEST, "InvalidBucketName"),
        InvalidObjectKey => (StatusCode::BAD_REQUEST, "InvalidObjectKey"),
        InvalidPart => (StatusCode::BAD_REQUEST, "InvalidPart"),
        UserSuspended => (StatusCode::FORBIDDEN, "UserSuspended"),
    }
}

fn s3_backend_code(e: &BackendError) -> ErrorCode {
    use BackendError::*;
    match e {
        Unreachable => (StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailable"),
        Invariant(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        Timeout => (StatusCode::GATEWAY_TIMEOUT, "RequestTimeout"),
    }
}

fn swift_client_code(e: &ClientError) -> ErrorCode {
    use ClientError::*;
    match e {
        MalformedRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
        AccessDenied | InvalidAccessKey | SignatureMismatch => {
            (StatusCode::FORBIDDEN, "Forbidden")
        }
        NoSuchBucket => (StatusCode::NOT_FOUND, "Container Not Found"),
        NoSuchKey => (StatusCode::NOT_FOUND, "Not Found"),
        NoSuchUpload => (StatusCode::NOT_FOUND, "Not Found"),
        MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        BucketAlreadyExists => (StatusCode::CONFLICT, "Conflict"),
        BucketNotEmpty => (StatusCode::CONFLICT, "Conflict"),
        MissingContentLength => (StatusCode::LENGTH_REQUIRED, "Length Required"),
        EntityTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "Request Entity Too Large"),
        PreconditionFailed => (StatusCode::PRECONDITION_FAILED, "Precondition Failed"),
        InvalidRange => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            "Requested Range Not Satisfiable",
        ),
        BadDigest => (StatusCode::BAD_REQUEST, "Bad Digest"),
        NotImplemented => (StatusCode::NOT_IMPLEMENTED, "Not Implemented"),
        InvalidBucketName => (StatusCode::BAD_REQUEST, "Invalid Container Name"),
        InvalidObjectKey => (StatusCode::BAD_REQUEST, "Invalid Object Name"),
        InvalidPart => (StatusCode::BAD_REQUEST, "Invalid Segment"),
        UserSuspended => (StatusCode::FORBIDDEN, "Account Suspended"),
    }
}

fn swift_backend_code(e: &BackendError) -> ErrorCode {
    use BackendError::*;
    match e {
        Unreachable => (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"),
        Invariant(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        Timeout => (StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout"),
    }
}

impl GatewayError {
    /// Maps this error to `(status, short code)` for the given dialect,
    /// falling back to 500/`UnknownError` on a miss — never panics.
    pub fn to_error_code(&self, dialect: Dialect) -> ErrorCode {
        match (dialect, self) {
            (Dialect::S3, GatewayError::Client(e)) => s3_client_code(e),
            (Dialect::S3, GatewayError::Backend(e)) => s3_backend_code(e),
            (Dialect::Swift, GatewayError::Client(e)) => swift_client_code(e),
            (Dialect::Swift, GatewayError::Backend(e)) => swift_backend_code(e),
        }
    }
}

/// Best-effort fallback for callers that somehow construct an error code
/// this module doesn't recognize. Exercised only in tests.
#[allow(dead_code)]
pub(crate) fn unknown() -> ErrorCode {
    UNKNOWN
}
