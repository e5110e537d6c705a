//! Request-processing core for a dual-dialect HTTP object-storage gateway.
//!
//! Accepts S3-like and Swift-like REST requests over the same listener,
//! authenticates and authorizes them against an ACL model shared across
//! both dialects, and executes them against a pluggable [`backend::ObjectStore`].
//!
//! # Key concepts
//! - [router::DialectRouter] resolves a request path to the dialect that owns it.
//! - [dialect::DialectManager] is the per-dialect boundary: path parsing,
//!   name validation, authorization, and operation classification.
//! - [ops::Operation] holds the per-kind verify/prefetch/execute logic every
//!   dialect's operations share.
//! - [pipeline::handle] drives one request through the fixed parse → route →
//!   authorize → verify → execute → log sequence.
//! - [response] turns an operation outcome into a wire response.
//! - [server::serve] is the accept loop: admission throttle, dispatch, graceful drain.

/// HTTP response body wrapper used throughout the gateway.
pub mod body;

/// Authentication/authorization boundary and default authorizers.
pub mod auth;

/// The backing object store boundary and its in-memory test implementation.
pub mod backend;

/// Runtime configuration (A1) and its CLI surface (A2).
pub mod config;

/// Per-dialect path parsing, validation, authorization, and operation classification (C5).
pub mod dialect;

/// Per-request state: parsed path, headers, user, and the single-slot error/log sink.
pub mod envelope;

/// The gateway's error taxonomy and dialect-aware error code tables.
pub mod error;

/// XML/JSON dual-format rendering (listings, errors, ACL documents).
pub mod format;

/// Structured logging setup (A3).
pub mod logging;

/// Multipart upload key-encoding scheme.
pub mod multipart_id;

/// Per-operation verify/prefetch/execute logic (C7), shared across dialects.
pub mod ops;

/// The Operation Pipeline (C6): the per-request state machine.
pub mod pipeline;

/// Bounded worker pool with admission throttle and watchdog (C2).
pub mod pool;

/// Response generation utilities and traits for ad hoc response values.
pub mod responder;

/// Response Emitter (C8): renders operation outcomes and errors into wire responses.
pub mod response;

/// Per-key FIFO reservation primitive (C1), used to serialize multipart operations.
pub mod reserve;

/// Longest-prefix REST router over a registry of dialect managers (C4).
pub mod router;

/// HTTP server loop: accept, admission-throttle, dispatch, graceful shutdown.
pub mod server;

/// Process signal handling: graceful drain, hard exit, config reload.
pub mod signals;

/// Core type aliases shared across the gateway.
pub mod types;

pub use server::serve;
