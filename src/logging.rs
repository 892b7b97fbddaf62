//! Logging setup

use crate::error::{OrchestratorError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber with the given filter directive.
///
/// Falls back to `info` when the directive does not parse. Fails if a
/// subscriber is already installed.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| OrchestratorError::config(format!("Failed to initialize logging: {}", e)))?;

    info!("purevision-core initialized with log level: {}", log_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Another test may have installed a subscriber first; either way the
        // second call in this test must fail.
        let _ = init("debug");
        assert!(matches!(init("debug"), Err(OrchestratorError::Config(_))));
    }
}
