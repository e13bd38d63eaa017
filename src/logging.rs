use tracing_subscriber::EnvFilter;

/// Install the default tracing subscriber for host programs.
///
/// The crate itself only emits `tracing` events; embedding applications (or
/// tests) call this once to get formatted output honoring `RUST_LOG`.
/// Returns an error if a global subscriber is already set.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;
    Ok(())
}
