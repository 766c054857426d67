//! Common test utilities shared across integration tests

use cordon_sandbox::{NetworkMode, ProcessSandbox, Sandbox, SandboxConfig};
use std::time::Duration;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Limits small enough to keep the suite fast
pub fn test_config() -> SandboxConfig {
    SandboxConfig::default()
        .with_memory("256Mi")
        .with_cpus(0.5)
        .with_timeout(Duration::from_secs(5))
        .with_max_output_bytes(1000)
        .with_network(NetworkMode::None)
}

/// Unsandboxed instance over `config`
pub fn process_sandbox(config: SandboxConfig) -> ProcessSandbox {
    Sandbox::new(config, Default::default()).expect("valid test config")
}
