use iot_lab_abstract::{AdapterError, ConfigError};
use thiserror::Error;

/// Setting up network impairment failed.
///
/// Whatever was partially applied has already been cleared when this is
/// returned.
#[derive(Debug, Error)]
pub enum ProfileApplyError {
    #[error("profile '{profile}' has invalid parameters: {reason}")]
    InvalidParameters { profile: String, reason: String },
    #[error("profile '{active}' is already applied on this path")]
    AlreadyActive { active: String },
    #[error("could not run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` was rejected: {stderr}")]
    Rejected { command: String, stderr: String },
}

/// Errors that stop a run before any sample is generated.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid experiment config")]
    Config(#[from] ConfigError),
    #[error("failed to apply network profile")]
    ProfileApply(#[from] ProfileApplyError),
    #[error("adapter '{adapter}' failed to start")]
    AdapterStart {
        adapter: String,
        #[source]
        source: AdapterError,
    },
    #[error("a run is already in progress on this orchestrator")]
    AlreadyRunning,
}
