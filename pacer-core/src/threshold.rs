use crate::ConfigError;
use std::fmt;
use std::str::FromStr;

/// A pass/fail rule such as `p95 < 1800ms` or `error_rate < 0.001`.
///
/// Latency limits are stored in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRule {
    pub metric: Metric,
    pub comparator: Comparator,
    pub limit: f64,
    /// Stop the run as soon as this rule fails on a progress check.
    pub abort_on_fail: bool,
}

impl ThresholdRule {
    pub fn new(metric: Metric, comparator: Comparator, limit: f64) -> Self {
        Self {
            metric,
            comparator,
            limit,
            abort_on_fail: false,
        }
    }

    pub fn abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }
}

impl FromStr for ThresholdRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();

        let (expr, abort_on_fail) = match raw.rsplit_once(char::is_whitespace) {
            Some((expr, "abort")) => (expr.trim_end(), true),
            _ => (raw, false),
        };

        let op_start = expr
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| ConfigError::threshold(raw, "missing comparison operator"))?;
        let (metric, rest) = expr.split_at(op_start);
        let op_len = if rest[1..].starts_with('=') { 2 } else { 1 };
        let (op, limit) = rest.split_at(op_len);

        let metric: Metric = metric
            .trim()
            .parse()
            .map_err(|reason: String| ConfigError::threshold(raw, reason))?;
        let comparator: Comparator = op
            .parse()
            .map_err(|reason: String| ConfigError::threshold(raw, reason))?;
        let limit = parse_limit(metric, limit.trim())
            .map_err(|reason| ConfigError::threshold(raw, reason))?;

        Ok(Self {
            metric,
            comparator,
            limit,
            abort_on_fail,
        })
    }
}

fn parse_limit(metric: Metric, limit: &str) -> Result<f64, String> {
    if limit.is_empty() {
        return Err("missing limit".to_string());
    }

    let value = match limit.parse::<f64>() {
        Ok(value) => value,
        Err(_) if metric.is_latency() => humantime::parse_duration(limit)
            .map(|d| d.as_nanos() as f64 / 1e6)
            .map_err(|e| format!("invalid duration `{limit}`: {e}"))?,
        Err(_) => return Err(format!("invalid number `{limit}`")),
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("limit `{limit}` is not finite"))
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.metric, self.comparator)?;
        // Bare numbers are milliseconds for latency metrics, so a suffix is only cosmetic.
        if self.metric.is_latency() && self.limit.fract() == 0. {
            write!(f, "{}ms", self.limit)?;
        } else {
            write!(f, "{}", self.limit)?;
        }
        if self.abort_on_fail {
            f.write_str(" abort")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    /// Latency percentile in `0..=100`.
    Percentile(f64),
    Min,
    Max,
    Mean,
    /// Failures over total.
    ErrorRate,
    /// Overloaded ticks over total.
    OverloadRate,
    Count,
    Failures,
}

impl Metric {
    pub fn is_latency(&self) -> bool {
        matches!(
            self,
            Metric::Percentile(_) | Metric::Min | Metric::Max | Metric::Mean
        )
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let metric = match s.to_ascii_lowercase().as_str() {
            "min" => Metric::Min,
            "max" => Metric::Max,
            "avg" | "mean" => Metric::Mean,
            "med" => Metric::Percentile(50.),
            "error_rate" => Metric::ErrorRate,
            "overload_rate" => Metric::OverloadRate,
            "count" => Metric::Count,
            "failures" => Metric::Failures,
            other => {
                let quantile = other
                    .strip_prefix("p(")
                    .and_then(|q| q.strip_suffix(')'))
                    .or_else(|| other.strip_prefix('p'))
                    .ok_or_else(|| format!("unknown metric `{s}`"))?;
                let quantile: f64 = quantile
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile `{s}`"))?;
                if !(0. ..=100.).contains(&quantile) {
                    return Err(format!("percentile `{s}` is outside 0..=100"));
                }
                Metric::Percentile(quantile)
            }
        };
        Ok(metric)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Percentile(q) if q.fract() == 0. => write!(f, "p{q}"),
            Metric::Percentile(q) => write!(f, "p({q})"),
            Metric::Min => f.write_str("min"),
            Metric::Max => f.write_str("max"),
            Metric::Mean => f.write_str("avg"),
            Metric::ErrorRate => f.write_str("error_rate"),
            Metric::OverloadRate => f.write_str("overload_rate"),
            Metric::Count => f.write_str("count"),
            Metric::Failures => f.write_str("failures"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparator::Lt => observed < limit,
            Comparator::Le => observed <= limit,
            Comparator::Gt => observed > limit,
            Comparator::Ge => observed >= limit,
            Comparator::Eq => observed == limit,
            Comparator::Ne => observed != limit,
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Ge),
            "==" => Ok(Comparator::Eq),
            "!=" => Ok(Comparator::Ne),
            other => Err(format!("unknown operator `{other}`")),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        };
        f.write_str(s)
    }
}
