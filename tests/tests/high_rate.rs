mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;
    use mock_service::MockConfig;
    use pacer::prelude::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn sustains_product_list_rate() {
        let config = mock_target(
            "product_list",
            MockConfig {
                delay: Duration::from_millis(20),
                jitter: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .await;

        let report = Run::new(config)
            .rate(1000.)
            .duration(Duration::from_secs(30))
            .workers(20, 1000)
            .threshold(rule("p95 < 1800ms"))
            .threshold(rule("p99 < 2000ms"))
            .threshold(rule("error_rate < 0.001"))
            .await
            .unwrap();

        println!("{report}");
        assert!(report.verdict.pass);
        assert_eq!(report.stats.ticks_emitted, 30_000);
        assert_eq!(report.verdict.snapshot.total, 30_000);
        assert!(report.stats.achieved_rate > 990.);
        assert!(report.stats.peak_workers <= 1000);
        assert_eq!(report.verdict.snapshot.failures.overload, 0);
    }
}
