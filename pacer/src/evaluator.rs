use pacer_core::{Metric, MetricsSnapshot, RuleOutcome, ThresholdRule, Verdict};
use std::time::Duration;

/// Checks every rule against `snapshot`.
///
/// The verdict passes only if every rule passes, so an empty rule set always passes. Rules
/// over latency fail when the snapshot has no latency sample, or when it was taken without
/// the percentile they ask for (see [`required_percentiles`]).
pub fn evaluate(snapshot: MetricsSnapshot, rules: &[ThresholdRule]) -> Verdict {
    let rules: Vec<RuleOutcome> = rules.iter().map(|rule| check(rule, &snapshot)).collect();
    Verdict {
        pass: rules.iter().all(|r| r.pass),
        rules,
        snapshot,
    }
}

pub fn check(rule: &ThresholdRule, snapshot: &MetricsSnapshot) -> RuleOutcome {
    let observed = observe(rule.metric, snapshot);
    RuleOutcome {
        rule: *rule,
        observed,
        pass: observed.is_some_and(|value| rule.comparator.holds(value, rule.limit)),
    }
}

/// Reads `metric` out of a snapshot. Latencies come back in milliseconds.
pub fn observe(metric: Metric, snapshot: &MetricsSnapshot) -> Option<f64> {
    match metric {
        Metric::ErrorRate => Some(snapshot.error_rate),
        Metric::OverloadRate => Some(snapshot.overload_rate()),
        Metric::Count => Some(snapshot.total as f64),
        Metric::Failures => Some(snapshot.failure as f64),
        Metric::Percentile(p) => snapshot
            .latency
            .as_ref()
            .and_then(|l| l.percentile(p))
            .map(millis),
        Metric::Min => snapshot.latency.as_ref().map(|l| millis(l.min)),
        Metric::Max => snapshot.latency.as_ref().map(|l| millis(l.max)),
        Metric::Mean => snapshot.latency.as_ref().map(|l| millis(l.mean)),
    }
}

/// Percentiles a snapshot must carry for `rules` to be checked.
pub fn required_percentiles(rules: &[ThresholdRule]) -> Vec<f64> {
    rules
        .iter()
        .filter_map(|rule| match rule.metric {
            Metric::Percentile(p) => Some(p),
            _ => None,
        })
        .collect()
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_core::{Comparator, FailureBreakdown, LatencySummary};
    use std::collections::BTreeMap;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn snapshot(p95: u64, p99: u64, errors: u64) -> MetricsSnapshot {
        let total = 1_000;
        MetricsSnapshot {
            total,
            success: total - errors,
            failure: errors,
            error_rate: errors as f64 / total as f64,
            failures: FailureBreakdown {
                status: errors,
                ..Default::default()
            },
            status_codes: BTreeMap::from([(200, total - errors), (500, errors)]),
            latency: Some(LatencySummary {
                count: total,
                min: ms(5),
                max: ms(p99 + 100),
                mean: ms(50),
                percentiles: vec![(50., ms(40)), (95., ms(p95)), (99., ms(p99))],
            }),
        }
    }

    fn rules(raw: &[&str]) -> Vec<ThresholdRule> {
        raw.iter().map(|r| r.parse().unwrap()).collect()
    }

    #[test]
    fn product_list_rules_pass() {
        let rules = rules(&["p95 < 1800ms", "p99 < 2000ms", "error_rate < 0.001"]);
        let verdict = evaluate(snapshot(1_700, 1_900, 0), &rules);
        assert!(verdict.pass);
        assert_eq!(verdict.rules.len(), 3);
        assert_eq!(verdict.rules[0].observed, Some(1_700.));
        assert_eq!(verdict.failed().count(), 0);
    }

    #[test]
    fn slow_p95_fails() {
        let rules = rules(&["p95 < 1800ms", "p99 < 2000ms", "error_rate < 0.001"]);
        let verdict = evaluate(snapshot(1_850, 1_900, 0), &rules);
        assert!(!verdict.pass);
        let failed: Vec<_> = verdict.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].rule.metric, Metric::Percentile(95.));
        assert_eq!(failed[0].observed, Some(1_850.));
        assert_eq!(failed[0].expected(), 1_800.);
    }

    #[test]
    fn limit_is_exclusive_for_lt() {
        let rule: ThresholdRule = "p95 < 1800".parse().unwrap();
        assert!(!check(&rule, &snapshot(1_800, 1_900, 0)).pass);
        let rule: ThresholdRule = "p95 <= 1800".parse().unwrap();
        assert!(check(&rule, &snapshot(1_800, 1_900, 0)).pass);
    }

    #[test]
    fn error_rate_rule() {
        let rule = ThresholdRule::new(Metric::ErrorRate, Comparator::Lt, 0.001);
        assert!(check(&rule, &snapshot(10, 20, 0)).pass);
        let outcome = check(&rule, &snapshot(10, 20, 1));
        assert!(!outcome.pass);
        assert_eq!(outcome.observed, Some(0.001));
    }

    #[test]
    fn no_rules_pass() {
        assert!(evaluate(MetricsSnapshot::default(), &[]).pass);
    }

    #[test]
    fn latency_without_samples_fails() {
        let rules = rules(&["p95 < 1800ms", "error_rate < 0.001", "count == 0"]);
        let verdict = evaluate(MetricsSnapshot::default(), &rules);
        assert!(!verdict.pass);
        assert_eq!(verdict.rules[0].observed, None);
        assert!(!verdict.rules[0].pass);
        assert!(verdict.rules[1].pass);
        assert!(verdict.rules[2].pass);
    }

    #[test]
    fn missing_percentile_fails() {
        let rule: ThresholdRule = "p(99.9) < 5s".parse().unwrap();
        let outcome = check(&rule, &snapshot(10, 20, 0));
        assert_eq!(outcome.observed, None);
        assert!(!outcome.pass);
    }

    #[test]
    fn collects_required_percentiles() {
        let rules = rules(&["p95 < 1s", "p(99.9) < 2s", "avg < 100", "error_rate < 0.01"]);
        assert_eq!(required_percentiles(&rules), vec![95., 99.9]);
    }

    #[test]
    fn evaluation_is_pure() {
        let rules = rules(&["p95 < 1800ms", "max < 1s", "failures <= 3"]);
        let snapshot = snapshot(1_000, 1_500, 2);
        assert_eq!(
            evaluate(snapshot.clone(), &rules),
            evaluate(snapshot, &rules)
        );
    }
}
