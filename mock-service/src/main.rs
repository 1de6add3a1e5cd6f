use axum::http::StatusCode;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::{rps_measure_task, MockConfig};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version = "0.1")]
struct MockCli {
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Prometheus scrape endpoint.
    #[arg(long, default_value = "0.0.0.0:8002")]
    metrics_addr: SocketAddr,

    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    #[arg(long, default_value_t = 200)]
    status: u16,

    #[arg(long)]
    max_rps: Option<NonZeroU32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = MockCli::parse();

    FmtSubscriber::builder()
        .with_env_filter("mock_service=info,tower_http=warn")
        .init();

    PrometheusBuilder::new()
        .with_http_listener(cli.metrics_addr)
        .install()?;

    tokio::spawn(rps_measure_task());

    let config = MockConfig {
        delay: Duration::from_millis(cli.delay_ms),
        jitter: Duration::from_millis(cli.jitter_ms),
        status: StatusCode::from_u16(cli.status)?,
        max_rps: cli.max_rps,
    };
    mock_service::run(cli.addr, config).await
}
