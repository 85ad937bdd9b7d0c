// Tracing setup shared by the fabric binaries
//
// Level comes from LOG_LEVEL (or RUST_LOG for full filter directives),
// defaulting to info.

use tracing_subscriber::EnvFilter;

pub fn init(process: &str) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(process, version = env!("CARGO_PKG_VERSION"), "starting");
}
