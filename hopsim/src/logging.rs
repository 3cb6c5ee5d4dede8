//! Tracing subscriber configuration for simulator runs.
//!
//! Log levels follow these conventions:
//! - WARN: terminal connection failures (supervision timeout, unacknowledged
//!   map update), classifier contract violations, disabled trace streams
//! - DEBUG: channel-map commits, classifier pushes, scenario hooks

use tracing_subscriber::EnvFilter;

/// Default directives: this workspace's crates only, so a scenario run does
/// not drown in whatever the host application logs.
const DEFAULT_DIRECTIVES: &str = "hopsim=info,hoplink=info";
const TEST_DIRECTIVES: &str = "hopsim=debug,hoplink=debug";

/// Initialize the tracing subscriber for a simulator run.
///
/// `RUST_LOG` overrides the per-crate defaults when set.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(filter_or(DEFAULT_DIRECTIVES))
        .with_target(false)
        .init();
}

/// Initialize the tracing subscriber for tests.
///
/// Uses the test writer so output interleaves with `cargo test` capture,
/// and `try_init` so repeated calls across tests are harmless.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or(TEST_DIRECTIVES))
        .with_test_writer()
        .try_init();
}

fn filter_or(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}
