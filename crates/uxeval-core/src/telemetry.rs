//! Log setup for the `uxeval` CLI.
//!
//! Evaluation runs log one span per run (`run_id`) with an event per model
//! call, retry and finding; extraction logs per page. All of it goes to
//! stderr, leaving stdout to the report JSON or paper listing.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `level` for uxeval's own targets,
/// warnings only for the HTTP and PDF stacks underneath.
pub fn default_filter(level: Level) -> String {
    format!("warn,uxeval={level},uxeval_core={level}")
}

/// Install the global subscriber. `json` selects newline-delimited JSON
/// lines for log shippers; later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
