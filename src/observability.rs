//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn json_format_requested() -> bool {
    std::env::var("SPINDLE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Initialize the process-wide tracing subscriber once.
///
/// `RUST_LOG` controls filtering (default `info`); `SPINDLE_LOG_FORMAT=json`
/// switches from compact text to JSON lines. Repeated calls are no-ops, as is
/// calling under a subscriber installed by the embedding process.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let result = if json_format_requested() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().compact())
                .try_init()
        };
        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}
