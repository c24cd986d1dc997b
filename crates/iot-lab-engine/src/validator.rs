use iot_lab_abstract::{Metric, SlaRule};
use serde::{Deserialize, Serialize};

use crate::metrics::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    Pass,
    Fail,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// No required rule failed, but at least one could not be evaluated.
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: SlaRule,
    pub measured: Option<f64>,
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub results: Vec<RuleResult>,
    pub verdict: Verdict,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == RuleOutcome::Fail)
    }
}

/// Check every rule against `stats`.
///
/// Optional rules are reported but never affect the verdict. An empty rule
/// set passes.
pub fn validate(stats: &Stats, rules: &[SlaRule]) -> ValidationReport {
    let results: Vec<RuleResult> = rules
        .iter()
        .map(|rule| {
            let measured = measure(stats, rule.metric);
            let outcome = match measured {
                None => RuleOutcome::InsufficientData,
                Some(value) if rule.comparator.holds(value, rule.threshold) => RuleOutcome::Pass,
                Some(_) => RuleOutcome::Fail,
            };
            RuleResult {
                rule: rule.clone(),
                measured,
                outcome,
            }
        })
        .collect();

    let required = results.iter().filter(|r| r.rule.required);
    let mut verdict = Verdict::Pass;
    for result in required {
        match result.outcome {
            RuleOutcome::Fail => {
                verdict = Verdict::Fail;
                break;
            }
            RuleOutcome::InsufficientData => verdict = Verdict::Inconclusive,
            RuleOutcome::Pass => {}
        }
    }

    ValidationReport { results, verdict }
}

fn measure(stats: &Stats, metric: Metric) -> Option<f64> {
    let latency = stats.latency.as_ref();
    match metric {
        Metric::LatencyP50Ms => latency.map(|l| l.p50_ms),
        Metric::LatencyP75Ms => latency.map(|l| l.p75_ms),
        Metric::LatencyP90Ms => latency.map(|l| l.p90_ms),
        Metric::LatencyP95Ms => latency.map(|l| l.p95_ms),
        Metric::LatencyP99Ms => latency.map(|l| l.p99_ms),
        Metric::LatencyMeanMs => latency.map(|l| l.mean_ms),
        Metric::LatencyMaxMs => latency.map(|l| l.max_ms),
        Metric::LossPercent => stats.loss_percent,
        Metric::ThroughputPerSec => stats.throughput_per_sec,
        Metric::Attempted => Some(stats.attempted as f64),
        Metric::Succeeded => Some(stats.succeeded as f64),
        Metric::Errors => Some(stats.errors as f64),
        Metric::InjectedLosses => Some(stats.injected_losses as f64),
        Metric::OrganicLosses => Some(stats.organic_losses as f64),
    }
}
