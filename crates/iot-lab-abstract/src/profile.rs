use serde::{Deserialize, Serialize};

/// Named network impairment: latency, jitter, loss and bandwidth cap.
///
/// Zero means "not impaired" for every field, matching the profile JSON files
/// where omitted keys default to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    #[serde(default)]
    pub latency_ms: u32,
    #[serde(default)]
    pub jitter_ms: u32,
    #[serde(default)]
    pub loss_percent: f32,
    #[serde(default)]
    pub bandwidth_kbps: u64,
}

impl NetworkProfile {
    pub fn new(
        name: impl Into<String>,
        latency_ms: u32,
        jitter_ms: u32,
        loss_percent: f32,
        bandwidth_kbps: u64,
    ) -> Self {
        Self {
            name: name.into(),
            latency_ms,
            jitter_ms,
            loss_percent,
            bandwidth_kbps,
        }
    }

    /// An unimpaired path.
    pub fn perfect() -> Self {
        Self::new("perfect", 0, 0, 0.0, 0)
    }

    /// True if applying this profile is the same as clearing impairment.
    pub fn is_baseline(&self) -> bool {
        self.latency_ms == 0 && self.loss_percent == 0.0 && self.bandwidth_kbps == 0
    }

    /// Parameter problems a traffic-control facility would reject anyway.
    pub fn parameter_problem(&self) -> Option<String> {
        if !self.loss_percent.is_finite() || !(0.0..=100.0).contains(&self.loss_percent) {
            return Some(format!(
                "loss_percent {} is outside [0, 100]",
                self.loss_percent
            ));
        }
        if self.jitter_ms > 0 && self.latency_ms == 0 {
            return Some("jitter_ms requires a non-zero latency_ms".to_string());
        }
        None
    }

    /// Built-in profiles covering the usual IoT link classes.
    pub fn presets() -> Vec<NetworkProfile> {
        vec![
            Self::perfect(),
            Self::new("localhost", 0, 0, 0.0, 0),
            Self::new("distributed_lan", 1, 0, 0.0, 1_000_000),
            Self::new("wifi", 5, 2, 0.5, 54_000),
            Self::new("4g", 50, 10, 1.0, 10_000),
            Self::new("wan_emulated", 150, 0, 1.0, 10_000),
            Self::new("congested", 200, 50, 5.0, 1_000),
            Self::new("intermittent", 100, 80, 15.0, 2_000),
            Self::new("lorawan", 1_000, 200, 5.0, 5),
        ]
    }

    pub fn preset(name: &str) -> Option<NetworkProfile> {
        Self::presets().into_iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_profile_fields_default_to_zero() {
        let profile: NetworkProfile =
            serde_json::from_str(r#"{"name": "lossy", "loss_percent": 2.5}"#).unwrap();
        assert_eq!(profile.latency_ms, 0);
        assert_eq!(profile.bandwidth_kbps, 0);
        assert_eq!(profile.loss_percent, 2.5);
        assert!(!profile.is_baseline());
    }

    #[test]
    fn presets_are_well_formed() {
        for profile in NetworkProfile::presets() {
            assert!(
                profile.parameter_problem().is_none(),
                "{} is malformed",
                profile.name
            );
        }
        assert!(NetworkProfile::preset("perfect").unwrap().is_baseline());
        assert!(NetworkProfile::preset("no-such-profile").is_none());
    }

    #[test]
    fn rejects_out_of_range_loss() {
        let profile = NetworkProfile::new("bad", 10, 0, 120.0, 0);
        assert!(profile.parameter_problem().is_some());
    }
}
