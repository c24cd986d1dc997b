use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::failure::FailureConfig;

/// Immutable description of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Protocol identifier, passed through to artifacts.
    pub protocol: String,
    /// Number of simulated devices.
    pub clients: u32,
    pub duration_ms: u64,
    /// Messages per second sent by each client.
    pub rate_hz: f64,
    /// Sensor type per device; client `i` uses `sensors[i % len]`.
    pub sensors: Vec<SensorType>,
    /// Name of the network profile applied for the whole run.
    pub network_profile: String,
    #[serde(default)]
    pub failure: FailureConfig,
    /// Consecutive failed sends after which a client is aborted (0 disables).
    pub failure_threshold: u32,
    /// Capacity of the latency window used for percentiles.
    pub window_capacity: usize,
    /// Seed for the synthetic payload streams.
    pub payload_seed: u64,
    #[serde(default)]
    pub pacing: Pacing,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            protocol: "loopback".to_string(),
            clients: 4,
            duration_ms: 30_000,
            rate_hz: 1.0,
            sensors: vec![
                SensorType::Temperature,
                SensorType::Humidity,
                SensorType::Motion,
            ],
            network_profile: "perfect".to_string(),
            failure: FailureConfig::default(),
            failure_threshold: 10,
            window_capacity: 10_000,
            payload_seed: 42,
            pacing: Pacing::Fixed,
        }
    }
}

impl ExperimentConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Check every field once; the returned value can no longer be mutated.
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.protocol.trim().is_empty() {
            return Err(ConfigError::EmptyField("protocol"));
        }
        if self.network_profile.trim().is_empty() {
            return Err(ConfigError::EmptyField("network_profile"));
        }
        if self.clients == 0 {
            return Err(ConfigError::NoClients);
        }
        if self.duration_ms == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if !self.rate_hz.is_finite() || self.rate_hz <= 0.0 {
            return Err(ConfigError::InvalidRate(self.rate_hz));
        }
        let interval = Duration::try_from_secs_f64(1.0 / self.rate_hz)
            .map_err(|_| ConfigError::InvalidRate(self.rate_hz))?;
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval(self.rate_hz));
        }
        if self.sensors.is_empty() {
            return Err(ConfigError::EmptySensorMix);
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        self.pacing.validate()?;
        self.failure.validate(self.clients)?;

        Ok(ValidatedConfig {
            inner: self,
            interval,
        })
    }
}

/// An [`ExperimentConfig`] that passed validation, plus derived values.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    inner: ExperimentConfig,
    interval: Duration,
}

impl ValidatedConfig {
    /// Nominal time between two messages of one client.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on messages per client: duration × rate for fixed pacing,
    /// unbounded (deadline only) otherwise.
    pub fn messages_per_client(&self) -> u64 {
        match self.inner.pacing {
            Pacing::Fixed => {
                let budget = self.inner.duration().as_secs_f64() * self.inner.rate_hz;
                ((budget + 1e-6).floor() as u64).max(1)
            }
            Pacing::Weibull { .. } => u64::MAX,
        }
    }

    pub fn sensor_for(&self, client_index: u32) -> SensorType {
        let sensors = &self.inner.sensors;
        sensors[client_index as usize % sensors.len()]
    }
}

impl Deref for ValidatedConfig {
    type Target = ExperimentConfig;

    fn deref(&self) -> &ExperimentConfig {
        &self.inner
    }
}

/// How the gap between consecutive messages of one client is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Pacing {
    /// Constant `1 / rate_hz`.
    #[default]
    Fixed,
    /// Weibull-distributed inter-arrival times; `shape < 1` gives bursty traffic.
    Weibull { shape: f64, scale_ms: f64 },
}

impl Pacing {
    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Pacing::Fixed => Ok(()),
            Pacing::Weibull { shape, scale_ms } => {
                if !(shape.is_finite() && shape > 0.0) {
                    return Err(ConfigError::InvalidPacing(format!(
                        "weibull shape must be positive, got {shape}"
                    )));
                }
                if !(scale_ms.is_finite() && scale_ms > 0.0) {
                    return Err(ConfigError::InvalidPacing(format!(
                        "weibull scale_ms must be positive, got {scale_ms}"
                    )));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    #[serde(alias = "temp")]
    Temperature,
    Humidity,
    #[serde(alias = "pir")]
    Motion,
    #[serde(alias = "lux")]
    Light,
    Pressure,
    #[serde(alias = "location")]
    Gps,
    #[serde(alias = "accel")]
    Accelerometer,
    #[serde(alias = "gyro")]
    Gyroscope,
    #[serde(alias = "image")]
    Camera,
    #[serde(alias = "audio")]
    Sound,
    Vibration,
    Co2,
    Voltage,
}

impl SensorType {
    pub const ALL: [SensorType; 13] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Motion,
        SensorType::Light,
        SensorType::Pressure,
        SensorType::Gps,
        SensorType::Accelerometer,
        SensorType::Gyroscope,
        SensorType::Camera,
        SensorType::Sound,
        SensorType::Vibration,
        SensorType::Co2,
        SensorType::Voltage,
    ];

    /// Short name used in device ids, e.g. `temp_3`.
    pub fn short_name(self) -> &'static str {
        match self {
            SensorType::Temperature => "temp",
            SensorType::Humidity => "humidity",
            SensorType::Motion => "motion",
            SensorType::Light => "light",
            SensorType::Pressure => "pressure",
            SensorType::Gps => "gps",
            SensorType::Accelerometer => "accel",
            SensorType::Gyroscope => "gyro",
            SensorType::Camera => "camera",
            SensorType::Sound => "sound",
            SensorType::Vibration => "vibration",
            SensorType::Co2 => "co2",
            SensorType::Voltage => "voltage",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for SensorType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sensor = match s.trim().to_ascii_lowercase().as_str() {
            "temp" | "temperature" => SensorType::Temperature,
            "humidity" => SensorType::Humidity,
            "motion" | "pir" => SensorType::Motion,
            "light" | "lux" => SensorType::Light,
            "pressure" => SensorType::Pressure,
            "gps" | "location" => SensorType::Gps,
            "accel" | "accelerometer" => SensorType::Accelerometer,
            "gyro" | "gyroscope" => SensorType::Gyroscope,
            "camera" | "image" => SensorType::Camera,
            "sound" | "audio" => SensorType::Sound,
            "vibration" => SensorType::Vibration,
            "co2" => SensorType::Co2,
            "voltage" => SensorType::Voltage,
            other => return Err(ConfigError::UnknownSensor(other.to_string())),
        };
        Ok(sensor)
    }
}

/// Parse a comma separated sensor mix such as `temp,humidity:3,gps`.
///
/// A `:suffix` is ignored and duplicates are kept only once.
pub fn parse_sensor_mix(mix: &str) -> Result<Vec<SensorType>, ConfigError> {
    let mut sensors = Vec::new();
    for item in mix.split(',') {
        let name = item.split(':').next().unwrap_or_default().trim();
        if name.is_empty() {
            continue;
        }
        let sensor: SensorType = name.parse()?;
        if !sensors.contains(&sensor) {
            sensors.push(sensor);
        }
    }
    if sensors.is_empty() {
        return Err(ConfigError::EmptySensorMix);
    }
    Ok(sensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InjectorConfigError;

    #[test]
    fn default_config_is_valid() {
        let cfg = ExperimentConfig::default().validate().unwrap();
        assert_eq!(cfg.interval(), Duration::from_secs(1));
        assert_eq!(cfg.messages_per_client(), 30);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let bad_clients = ExperimentConfig {
            clients: 0,
            ..Default::default()
        };
        assert_eq!(bad_clients.validate(), Err(ConfigError::NoClients));

        let bad_duration = ExperimentConfig {
            duration_ms: 0,
            ..Default::default()
        };
        assert_eq!(bad_duration.validate(), Err(ConfigError::ZeroDuration));

        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = ExperimentConfig {
                rate_hz: rate,
                ..Default::default()
            };
            assert!(matches!(cfg.validate(), Err(ConfigError::InvalidRate(_))));
        }

        let too_fast = ExperimentConfig {
            rate_hz: 1e12,
            ..Default::default()
        };
        assert!(matches!(
            too_fast.validate(),
            Err(ConfigError::ZeroInterval(_))
        ));
    }

    #[test]
    fn injector_errors_surface_through_config() {
        let mut cfg = ExperimentConfig::default();
        cfg.failure.drop_probability = -0.2;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Injector(InjectorConfigError::Probability(-0.2)))
        );
    }

    #[test]
    fn budget_is_duration_times_rate() {
        let cfg = ExperimentConfig {
            clients: 10,
            rate_hz: 10.0,
            duration_ms: 5_000,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.messages_per_client(), 50);
        assert_eq!(cfg.interval(), Duration::from_millis(100));
    }

    #[test]
    fn weibull_pacing_is_deadline_bound() {
        let cfg = ExperimentConfig {
            pacing: Pacing::Weibull {
                shape: 0.8,
                scale_ms: 2_000.0,
            },
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.messages_per_client(), u64::MAX);

        let bad = ExperimentConfig {
            pacing: Pacing::Weibull {
                shape: 0.0,
                scale_ms: 1.0,
            },
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidPacing(_))));
    }

    #[test]
    fn sensors_are_assigned_round_robin() {
        let cfg = ExperimentConfig::default().validate().unwrap();
        assert_eq!(cfg.sensor_for(0), SensorType::Temperature);
        assert_eq!(cfg.sensor_for(2), SensorType::Motion);
        assert_eq!(cfg.sensor_for(3), SensorType::Temperature);
    }

    #[test]
    fn parses_sensor_mix_with_aliases() {
        let mix = parse_sensor_mix("temp, humidity:4,pir,temperature").unwrap();
        assert_eq!(
            mix,
            vec![
                SensorType::Temperature,
                SensorType::Humidity,
                SensorType::Motion
            ]
        );
        assert!(matches!(
            parse_sensor_mix("temp,plasma"),
            Err(ConfigError::UnknownSensor(_))
        ));
        assert_eq!(parse_sensor_mix(" , "), Err(ConfigError::EmptySensorMix));
    }

    #[test]
    fn sensor_aliases_deserialize() {
        #[derive(Deserialize)]
        struct Mix {
            sensors: Vec<SensorType>,
        }
        let mix: Mix = toml::from_str(r#"sensors = ["temp", "gyro", "co2"]"#).unwrap();
        assert_eq!(
            mix.sensors,
            vec![SensorType::Temperature, SensorType::Gyroscope, SensorType::Co2]
        );
    }
}
