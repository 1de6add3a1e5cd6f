use mock_service::MockConfig;
use pacer::prelude::*;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pacer=debug,mock_service=debug"));
        let _ = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Starts a mock service for this test and returns a config aimed at it.
#[allow(unused)]
pub async fn mock_target(name: &str, mock: MockConfig) -> RunConfig {
    init();
    let addr = mock_service::spawn(mock)
        .await
        .expect("mock service failed to start");

    let mut config = RunConfig::new(name);
    config.target = Target::new(&format!("http://{addr}"));
    config
}

#[allow(unused)]
pub fn rule(raw: &str) -> ThresholdRule {
    raw.parse().expect("invalid threshold rule")
}
