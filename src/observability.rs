//! Logging initialization (ambient stack): `tracing_subscriber` wired the way the teacher's
//! `main.rs` wires it, extended with a JSON-output switch for production deployments (§10).

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber.
///
/// Reads `RUST_LOG` via [`EnvFilter::from_default_env`], falling back to `switchboard=info` when
/// unset. When `json` is set, log lines are structured JSON suitable for log aggregation;
/// otherwise they're human-readable text, matching the teacher's development-mode output.
///
/// # Panics
///
/// Panics if the fallback directive fails to parse, which cannot happen for the fixed literal
/// used here.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::from_default_env().add_directive("switchboard=info".parse().expect("fallback directive is valid"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
