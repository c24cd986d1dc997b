use std::time::Duration;

use thiserror::Error;

use crate::sample::ClientId;

/// Rejections raised while validating an [`ExperimentConfig`](crate::ExperimentConfig).
///
/// All of these are detected before a run allocates anything.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("client count must be at least 1")]
    NoClients,
    #[error("duration must be greater than zero")]
    ZeroDuration,
    #[error("message rate must be a positive finite number, got {0}")]
    InvalidRate(f64),
    #[error("derived send interval is zero (rate {0} msg/s is too high)")]
    ZeroInterval(f64),
    #[error("sensor mix is empty")]
    EmptySensorMix,
    #[error("metric window capacity must be at least 1")]
    ZeroWindow,
    #[error("`{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("invalid pacing: {0}")]
    InvalidPacing(String),
    #[error("unknown network profile '{0}'")]
    UnknownProfile(String),
    #[error("unknown sensor type '{0}'")]
    UnknownSensor(String),
    #[error(transparent)]
    Injector(#[from] InjectorConfigError),
}

/// Rejections of failure-injection settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InjectorConfigError {
    #[error("probability {0} is outside [0, 1]")]
    Probability(f64),
    #[error("delay events need a positive delay")]
    ZeroDelay,
    #[error("event targets {client} but only {clients} clients are configured")]
    UnknownClient { client: ClientId, clients: u32 },
}

/// Per-send failure reported by a [`ProtocolAdapter`](crate::ProtocolAdapter).
///
/// These never abort a run; the orchestrator records them as `error` samples.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("adapter is not started")]
    NotStarted,
}
