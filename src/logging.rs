//! Structured logging setup (A3).
//!
//! Configures a `tracing` subscriber with file/line/span-close events, at a
//! verbosity driven by [`crate::config::GatewayConfig::tracing_level`]
//! rather than a fixed level, so `debug_rgw` in config or `--debug-rgw` on
//! the CLI controls it the same way it would for the process this crate's
//! logging conventions are modeled on.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub fn init_tracing(level: tracing::Level) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_filter(LevelFilter::from_level(level)),
        )
        .init();
}
