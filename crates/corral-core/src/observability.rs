//! Observability infrastructure for Corral.
//!
//! Structured logging with consistent spans: every component enters a
//! component span, and every reconciliation operation is tagged with the
//! container identity it serializes on.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `corral_cell=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one agent component.
#[must_use]
pub fn component_span(component: &str, cell_id: &str) -> Span {
    tracing::info_span!("component", name = component, cell_id = cell_id)
}

/// Creates a span for one reconciliation operation.
#[must_use]
pub fn operation_span(operation: &str, identity: &str) -> Span {
    tracing::info_span!("operation", op = operation, identity = identity)
}
