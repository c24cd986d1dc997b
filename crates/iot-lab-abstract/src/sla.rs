use serde::{Deserialize, Serialize};
use std::fmt;

/// A measurable quantity of a run that SLA rules can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    LatencyP50Ms,
    LatencyP75Ms,
    LatencyP90Ms,
    LatencyP95Ms,
    LatencyP99Ms,
    LatencyMeanMs,
    LatencyMaxMs,
    LossPercent,
    ThroughputPerSec,
    Attempted,
    Succeeded,
    Errors,
    InjectedLosses,
    OrganicLosses,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::LatencyP50Ms => "latency_p50_ms",
            Metric::LatencyP75Ms => "latency_p75_ms",
            Metric::LatencyP90Ms => "latency_p90_ms",
            Metric::LatencyP95Ms => "latency_p95_ms",
            Metric::LatencyP99Ms => "latency_p99_ms",
            Metric::LatencyMeanMs => "latency_mean_ms",
            Metric::LatencyMaxMs => "latency_max_ms",
            Metric::LossPercent => "loss_percent",
            Metric::ThroughputPerSec => "throughput_per_sec",
            Metric::Attempted => "attempted",
            Metric::Succeeded => "succeeded",
            Metric::Errors => "errors",
            Metric::InjectedLosses => "injected_losses",
            Metric::OrganicLosses => "organic_losses",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "le")]
    Le,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "ge")]
    Ge,
    #[serde(rename = "==", alias = "eq")]
    Eq,
}

impl Comparator {
    pub fn holds(self, measured: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => measured < threshold,
            Comparator::Le => measured <= threshold,
            Comparator::Gt => measured > threshold,
            Comparator::Ge => measured >= threshold,
            Comparator::Eq => (measured - threshold).abs() <= 1e-9 * threshold.abs().max(1.0),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
        };
        f.write_str(op)
    }
}

/// `metric comparator threshold`, e.g. `latency_p95_ms <= 200`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaRule {
    pub metric: Metric,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Optional rules are reported but do not affect the verdict.
    #[serde(default = "required_by_default")]
    pub required: bool,
}

impl SlaRule {
    pub fn required(metric: Metric, comparator: Comparator, threshold: f64) -> Self {
        Self {
            metric,
            comparator,
            threshold,
            required: true,
        }
    }

    pub fn optional(metric: Metric, comparator: Comparator, threshold: f64) -> Self {
        Self {
            required: false,
            ..Self::required(metric, comparator, threshold)
        }
    }
}

impl fmt::Display for SlaRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.comparator, self.threshold)
    }
}

fn required_by_default() -> bool {
    true
}
