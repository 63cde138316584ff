use tracing_subscriber::EnvFilter;

/// Install the process-wide tracing subscriber: structured fmt output with
/// an env-filter (`RUST_LOG`), defaulting to `info` for the given service.
pub fn setup_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{service_name}=info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
