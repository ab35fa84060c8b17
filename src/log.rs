//! Structured logging setup.
//!
//! Log levels:
//! - ERROR: Flow failures and terminal status transitions
//! - WARN: Retried task attempts, persistence hiccups
//! - INFO: Flow start and finish, status transitions
//! - DEBUG: Task settlement, retry-cycle bookkeeping, config loading
//! - TRACE: Graph construction
//!
//! Debug mode can be enabled with `init_with_debug(true)` or the
//! `SHOOTFLOW_DEBUG=1` env var. `RUST_LOG` overrides the default filter.

use tracing_subscriber::EnvFilter;

/// Environment variable that turns on debug output.
pub const DEBUG_ENV: &str = "SHOOTFLOW_DEBUG";

/// Initialize logging to stderr.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first subscriber is installed.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || debug_from_env(std::env::var(DEBUG_ENV).ok().as_deref());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn debug_from_env(value: Option<&str>) -> bool {
    value
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "shootflow=debug"
    } else {
        "shootflow=info"
    }
}
