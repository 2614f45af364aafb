//! Logging setup for docchat services.
//!
//! Structured logs go through `tracing`; this module only installs the
//! subscriber. Noisy library modules (hyper, reqwest, h2, rustls, ...) are
//! held at `warn` so flush-cycle and auth diagnostics stay readable.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Library modules forced to `warn` unless `RUST_LOG` says otherwise.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tower_http",
    "wiremock",
];

/// Build the filter directive string for a base level.
fn filter_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(log_level)))
}

/// Output layer for `log_format`: one JSON object per event for `"json"`,
/// human-readable lines otherwise.
fn output_layer(log_format: &str) -> Box<dyn Layer<Registry> + Send + Sync> {
    match log_format {
        "json" => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed(),
        _ => fmt::layer().with_target(true).boxed(),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, replaces the level-plus-noise directives entirely.
/// Later calls are ignored.
pub fn init_logging(log_level: &str, log_format: &str) {
    let _ = tracing_subscriber::registry()
        .with(output_layer(log_format))
        .with(build_filter(log_level))
        .try_init();
}
