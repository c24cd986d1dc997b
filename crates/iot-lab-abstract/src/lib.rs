pub mod config;
pub mod error;
pub mod failure;
pub mod interface;
pub mod profile;
pub mod sample;
pub mod scenario;
pub mod sla;

pub use interface::{ProtocolAdapter, SendAck};
pub use sample::{ClientId, Outcome, Sample, Timestamp};

pub use config::{ExperimentConfig, Pacing, SensorType, ValidatedConfig, parse_sensor_mix};
pub use error::{AdapterError, ConfigError, InjectorConfigError};
pub use failure::{FailureConfig, FailureEvent, FailureKind, FailureTarget, FailureTrigger};
pub use profile::NetworkProfile;
pub use scenario::{AdapterSection, ConfigOverride, TestScenario};
pub use sla::{Comparator, Metric, SlaRule};
