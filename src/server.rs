//! HTTP server loop: accept, admission-throttle, dispatch through the
//! operation pipeline, graceful shutdown.
//!
//! Mirrors the accept-loop-plus-spawn shape of a plain Hyper server, with
//! two additions: each accepted connection first takes an admission permit
//! from [`crate::pool::BoundedWorkerPool`] (bounding resident connections
//! independently of accept rate), and the accept loop itself selects
//! against a [`CancellationToken`] so a SIGUSR1 drain stops taking new
//! connections without killing ones already in flight.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hyper::{server::conn::http1, service::service_fn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{self, PipelineContext};
use crate::pool::BoundedWorkerPool;
use crate::types::BoxError;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Runs the accept loop until `shutdown` is cancelled, then returns once
/// every connection spawned before that point has finished.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<PipelineContext>,
    pool: Arc<BoundedWorkerPool>,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    tracing::info!("listening on {}", listener.local_addr()?);

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                return Ok(());
            }
            permit = pool.acquire_admission() => permit,
        };

        let (stream, addr) = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let ctx = ctx.clone();

        pool.spawn_watched(async move {
            let _permit = permit;
            let svc = service_fn(move |mut req: hyper::Request<_>| {
                let ctx = ctx.clone();
                req.extensions_mut().insert(addr);
                async move {
                    let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
                    Ok::<_, Infallible>(pipeline::handle(&ctx, request_id, req).await)
                }
            });

            let mut http = http1::Builder::new();
            http.keep_alive(true);
            let conn = http.serve_connection(io, svc).with_upgrades();

            if let Err(err) = conn.await {
                tracing::warn!("error serving connection from {addr}: {err}");
            }
        });
    }
}
