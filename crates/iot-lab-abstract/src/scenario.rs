use crate::config::{ExperimentConfig, Pacing, SensorType};
use crate::failure::FailureConfig;
use crate::sla::SlaRule;
use serde::Deserialize;

/// A scenario file: config overrides, SLA rules and adapter selection.
#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ConfigOverride,
    #[serde(default)]
    pub sla: Vec<SlaRule>,
    #[serde(default)]
    pub adapter: AdapterSection,
}

impl TestScenario {
    /// Defaults with this scenario's overrides applied.
    pub fn experiment_config(&self) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        self.config.apply_to(&mut config);
        config
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConfigOverride {
    pub protocol: Option<String>,
    pub clients: Option<u32>,
    pub duration_ms: Option<u64>,
    pub rate_hz: Option<f64>,
    pub sensors: Option<Vec<SensorType>>,
    pub network_profile: Option<String>,
    pub failure: Option<FailureConfig>,
    pub failure_threshold: Option<u32>,
    pub window_capacity: Option<usize>,
    pub payload_seed: Option<u64>,
    pub pacing: Option<Pacing>,
}

impl ConfigOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        if let Some(v) = &self.protocol {
            config.protocol = v.clone();
        }
        if let Some(v) = self.clients {
            config.clients = v;
        }
        if let Some(v) = self.duration_ms {
            config.duration_ms = v;
        }
        if let Some(v) = self.rate_hz {
            config.rate_hz = v;
        }
        if let Some(v) = &self.sensors {
            config.sensors = v.clone();
        }
        if let Some(v) = &self.network_profile {
            config.network_profile = v.clone();
        }
        if let Some(v) = &self.failure {
            config.failure = v.clone();
        }
        if let Some(v) = self.failure_threshold {
            config.failure_threshold = v;
        }
        if let Some(v) = self.window_capacity {
            config.window_capacity = v;
        }
        if let Some(v) = self.payload_seed {
            config.payload_seed = v;
        }
        if let Some(v) = self.pacing {
            config.pacing = v;
        }
    }
}

/// Which built-in adapter to drive and how to parameterise it.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AdapterSection {
    /// Built-in adapter name, e.g. `loopback` or `flaky`.
    pub builtin: Option<String>,
    pub delay_ms: Option<u64>,
    pub loss_probability: Option<f64>,
    pub error_probability: Option<f64>,
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::{Comparator, Metric};

    const SCENARIO: &str = r#"
        name = "wan-smoke"
        description = "Ten clients over an emulated WAN"

        [config]
        clients = 10
        duration_ms = 5000
        rate_hz = 10.0
        sensors = ["temp", "gps"]
        network_profile = "wan_emulated"
        pacing = { mode = "fixed" }

        [config.failure]
        drop_probability = 0.5
        seed = 7

        [[sla]]
        metric = "loss_percent"
        comparator = "<"
        threshold = 60.0

        [adapter]
        builtin = "loopback"
        delay_ms = 20
    "#;

    #[test]
    fn parses_scenario_and_applies_overrides() {
        let scenario: TestScenario = toml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.name, "wan-smoke");
        assert_eq!(scenario.adapter.builtin.as_deref(), Some("loopback"));
        assert_eq!(scenario.adapter.delay_ms, Some(20));
        assert_eq!(
            scenario.sla,
            vec![SlaRule::required(Metric::LossPercent, Comparator::Lt, 60.0)]
        );

        let config = scenario.experiment_config();
        assert_eq!(config.clients, 10);
        assert_eq!(config.duration_ms, 5000);
        assert_eq!(config.sensors, vec![SensorType::Temperature, SensorType::Gps]);
        assert_eq!(config.network_profile, "wan_emulated");
        assert_eq!(config.failure.drop_probability, 0.5);
        assert_eq!(config.failure.seed, 7);
        // untouched fields keep their defaults
        assert_eq!(config.window_capacity, ExperimentConfig::default().window_capacity);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn shipped_scenarios_are_valid() {
        for text in [
            include_str!("../../../scenarios/wan_smoke.toml"),
            include_str!("../../../scenarios/bursty_flaky.toml"),
        ] {
            let scenario: TestScenario = toml::from_str(text).unwrap();
            assert!(!scenario.sla.is_empty(), "{}", scenario.name);
            assert!(scenario.experiment_config().validate().is_ok(), "{}", scenario.name);
        }
    }

    #[test]
    fn minimal_scenario_uses_defaults() {
        let scenario: TestScenario = toml::from_str(r#"name = "bare""#).unwrap();
        assert!(scenario.sla.is_empty());
        assert!(scenario.adapter.builtin.is_none());
        assert_eq!(scenario.experiment_config(), ExperimentConfig::default());
    }
}
