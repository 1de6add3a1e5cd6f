mod utils;
use utils::*;

use mock_service::MockConfig;
use pacer::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

fn product_list_rules<T: ConfigurableRun>(run: T) -> T {
    run.threshold(rule("p95 < 1800ms"))
        .threshold(rule("p99 < 2000ms"))
        .threshold(rule("error_rate < 0.001"))
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn healthy_endpoint_passes() {
    let config = mock_target(
        "healthy",
        MockConfig {
            delay: Duration::from_millis(50),
            ..Default::default()
        },
    )
    .await;

    let report = product_list_rules(Run::new(config))
        .rate(50.)
        .duration(Duration::from_secs(2))
        .await
        .unwrap();

    assert!(report.verdict.pass, "{report}");
    assert_eq!(report.stats.ticks_emitted, 100);

    let snapshot = &report.verdict.snapshot;
    assert_eq!(snapshot.total, 100);
    assert_eq!(snapshot.success, 100);
    assert_eq!(snapshot.error_rate, 0.);
    assert_eq!(snapshot.status_codes.get(&200), Some(&100));

    let latency = snapshot.latency.as_ref().unwrap();
    assert!(latency.min >= Duration::from_millis(50));
    assert!(latency.p95().unwrap() >= Duration::from_millis(50));
    assert!(latency.p95().unwrap() < Duration::from_millis(1800));
    assert!(latency.p50().unwrap() <= latency.p95().unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn server_errors_fail_verdict() {
    let config = mock_target(
        "errors",
        MockConfig {
            status: axum_status(500),
            ..Default::default()
        },
    )
    .await;

    let report = product_list_rules(Run::new(config))
        .rate(20.)
        .duration(Duration::from_secs(1))
        .await
        .unwrap();

    assert!(!report.verdict.pass);
    let snapshot = &report.verdict.snapshot;
    assert_eq!(snapshot.total, 20);
    assert_eq!(snapshot.error_rate, 1.);
    assert_eq!(snapshot.failures.status, 20);
    assert_eq!(snapshot.status_codes.get(&500), Some(&20));

    let failed: Vec<_> = report.verdict.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].observed, Some(1.));
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn saturated_pool_reports_overload() {
    let config = mock_target(
        "overload",
        MockConfig {
            delay: Duration::from_millis(1500),
            ..Default::default()
        },
    )
    .await;

    let report = Run::new(config)
        .rate(50.)
        .duration(Duration::from_secs(1))
        .workers(1, 5)
        .threshold(rule("overload_rate == 0"))
        .await
        .unwrap();

    assert!(!report.verdict.pass);
    assert!(report.stats.peak_workers <= 5);

    let snapshot = &report.verdict.snapshot;
    assert_eq!(snapshot.total, 50);
    assert_eq!(snapshot.failures.status, 0);
    assert!(snapshot.failures.overload >= 40, "{snapshot}");
    assert_eq!(snapshot.success + snapshot.failures.overload, 50);
    assert!(snapshot.overload_rate() > 0.);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn cancellation_mid_run_still_reports() {
    let config = mock_target(
        "cancel",
        MockConfig {
            delay: Duration::from_secs(2),
            ..Default::default()
        },
    )
    .await;

    let run = Run::new(config).rate(20.).duration(Duration::from_secs(10));
    let handle = run.handle();

    let canceller = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let report = run.await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));

    assert!(report.stats.cancelled);
    assert_eq!(handle.state(), RunState::Completed);

    let snapshot = &report.verdict.snapshot;
    assert_eq!(snapshot.total, report.stats.ticks_emitted);
    assert!(snapshot.failures.cancelled > 0);
    assert_eq!(snapshot.failures.cancelled, snapshot.total);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn connection_refused_is_recorded() {
    init();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = RunConfig::new("refused");
    config.target = Target::new(&format!("http://{addr}"));

    let report = Run::new(config)
        .rate(20.)
        .iterations(10)
        .threshold(rule("error_rate < 0.001"))
        .await
        .unwrap();

    assert!(!report.verdict.pass);
    let snapshot = &report.verdict.snapshot;
    assert_eq!(snapshot.total, 10);
    assert_eq!(snapshot.failures.transport, 10);
    assert!(snapshot.status_codes.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn timeouts_are_pinned() {
    let config = mock_target(
        "timeout",
        MockConfig {
            delay: Duration::from_millis(800),
            ..Default::default()
        },
    )
    .await;

    let report = Run::new(config)
        .rate(20.)
        .iterations(10)
        .timeout(Duration::from_millis(100))
        .await
        .unwrap();

    let snapshot = &report.verdict.snapshot;
    assert_eq!(snapshot.failures.timeout, 10);
    let latency = snapshot.latency.as_ref().unwrap();
    assert_eq!(latency.count, 10);
    assert_eq!(latency.max, Duration::from_millis(100));
    assert_eq!(latency.min, Duration::from_millis(100));
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn unresolvable_host_aborts() {
    init();
    let mut config = RunConfig::new("unresolvable");
    config.target = Target::new("http://pacer-does-not-exist.invalid");

    let run = Run::new(config).rate(10.).duration(Duration::from_secs(1));
    let handle = run.handle();

    let res = run.await;
    assert!(matches!(res, Err(RunError::Unresolvable { .. })), "{res:?}");
    assert!(matches!(handle.state(), RunState::Aborted(_)));
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn query_overrides_reach_the_target() {
    let mut config = mock_target("override", MockConfig::default()).await;
    config.target.path = "/api/v1/products?status=503".to_string();

    let report = Run::new(config)
        .rate(50.)
        .iterations(25)
        .expected_statuses(&[200, 503])
        .await
        .unwrap();

    let snapshot = &report.verdict.snapshot;
    assert_eq!(snapshot.success, 25);
    assert_eq!(snapshot.status_codes.get(&503), Some(&25));
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30000)]
async fn summary_serializes() {
    let config = mock_target("summary", MockConfig::default()).await;

    let report = Run::new(config)
        .rate(50.)
        .iterations(10)
        .threshold(rule("p(99.9) < 2s"))
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["verdict"]["pass"], true);
    assert_eq!(json["verdict"]["rules"][0]["rule"], "p(99.9) < 2000ms");
    assert_eq!(json["stats"]["ticks_emitted"], 10);
}

fn axum_status(code: u16) -> mock_service::StatusCode {
    mock_service::StatusCode::from_u16(code).unwrap()
}
