use iot_lab_abstract::{ExperimentConfig, Timestamp};
use serde::{Deserialize, Serialize};

use crate::metrics::Stats;
use crate::orchestrator::{ClientSummary, RunResult, RunStatus};
use crate::validator::ValidationReport;

/// Everything worth keeping from one run, written out as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub config: ExperimentConfig,
    pub status: RunStatus,
    pub network_profile: String,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub elapsed_ms: u64,
    pub clients: ClientSummary,
    pub lagged_iterations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_error: Option<String>,
    pub stats: Stats,
    pub report: ValidationReport,
}

impl RunArtifact {
    pub fn new(
        scenario: Option<String>,
        config: ExperimentConfig,
        result: RunResult,
        report: ValidationReport,
    ) -> Self {
        Self {
            scenario,
            config,
            status: result.status,
            network_profile: result.network_profile,
            started_at: result.started_at,
            finished_at: result.finished_at,
            elapsed_ms: result.elapsed_ms,
            clients: result.clients,
            lagged_iterations: result.lagged_iterations,
            reset_error: result.reset_error,
            stats: result.stats,
            report,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
