pub mod artifact;
pub mod error;
pub mod generator;
pub mod injector;
pub mod metrics;
pub mod network;
pub mod orchestrator;
pub mod validator;

pub use artifact::RunArtifact;
pub use error::{EngineError, ProfileApplyError};
pub use generator::{SensorStream, SensorStreamGenerator};
pub use injector::{Disruption, FailureInjector};
pub use metrics::{ClientTally, LatencySummary, MetricWindow, MetricsCollector, Stats};
pub use network::{
    ImpairmentBackend, NetemBackend, NetworkConditionController, NoopBackend, ProfileHandle,
    ProfileRegistry,
};
pub use orchestrator::{ClientSummary, Orchestrator, RunPhase, RunResult, RunStatus, StopHandle};
pub use validator::{RuleOutcome, RuleResult, ValidationReport, Verdict, validate};
