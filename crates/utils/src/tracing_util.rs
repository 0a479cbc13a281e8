use tracing_subscriber::EnvFilter;

/// Initialize `tracing` with an `EnvFilter` sourced from `RUST_LOG`,
/// defaulting to `info` when unset. Call once from a binary's `main`.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
