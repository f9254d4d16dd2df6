//! Tracing setup for the `bayeux` binary and for embedders that want the
//! client's own log lines without wiring a subscriber themselves.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber.
///
/// `RUST_LOG`, when set, takes precedence. Otherwise `level` applies to this
/// crate and the binary while dependencies only report warnings. Calling it
/// again is a no-op.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn directives(level: &str) -> String {
    let level = match level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    format!("warn,bayeux_client={level},bayeux={level}")
}
