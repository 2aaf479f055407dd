pub mod client;
pub mod fixtures;
pub mod server;

pub use client::TestClient;
pub use fixtures::{LessonDraft, temp_sqlite};
pub use server::TestServer;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber that writes through the test harness so output
/// is captured per test. Filter with `RUST_LOG`; defaults to `warn`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(false)
        .try_init();
}
