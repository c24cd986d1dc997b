use bytes::Bytes;
use iot_lab_abstract::{ClientId, Pacing, SensorType, ValidatedConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Weibull};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::warn;

// Ornstein-Uhlenbeck temperature drift, capped at 0.5 °C per minute.
const OU_THETA: f64 = 0.1;
const OU_SIGMA: f64 = 0.5;
const TEMP_MAX_RATE: f64 = 0.5 / 60.0;

// HC-SR501 style PIR timing, in seconds.
const PIR_DWELL: f64 = 3.0;
const PIR_BLOCKING: f64 = 2.5;
const PIR_TRIGGER_PROBABILITY: f64 = 0.3;

// MPU-6050: 400 µg/√Hz over 260 Hz.
const ACCEL_NSD: f64 = 0.004;
const ACCEL_BANDWIDTH: f64 = 260.0;

const GPS_VMAX_MPS: [f64; 3] = [1.5, 5.0, 15.0];
const METERS_PER_DEGREE: f64 = 111_000.0;

/// Hands out one [`SensorStream`] per simulated device.
#[derive(Debug, Clone)]
pub struct SensorStreamGenerator {
    seed: u64,
    pacing: Pacing,
    interval: Duration,
}

impl SensorStreamGenerator {
    pub fn new(seed: u64, pacing: Pacing, interval: Duration) -> Self {
        Self {
            seed,
            pacing,
            interval,
        }
    }

    pub fn from_config(config: &ValidatedConfig) -> Self {
        Self::new(config.payload_seed, config.pacing, config.interval())
    }

    pub fn stream(&self, client: ClientId, sensor: SensorType) -> SensorStream {
        SensorStream::new(self.seed, client, sensor, self.pacing, self.interval)
    }
}

/// Synthetic readings of one device.
///
/// All randomness comes from an RNG seeded with `(seed, client)`, so two
/// streams built from the same inputs yield byte-identical payloads. Time in
/// the payload is logical: it advances by the pacing interval, not the wall
/// clock.
#[derive(Debug, Clone)]
pub struct SensorStream {
    client: ClientId,
    sensor: SensorType,
    dev_id: String,
    seed: u64,
    pacing: Pacing,
    interval: Duration,
    rng: StdRng,
    device: DeviceState,
    clock_ms: u64,
    next_sequence: u64,
}

#[derive(Debug, Clone)]
struct DeviceState {
    temp_mean: f64,
    temp_current: f64,
    gps_lat: f64,
    gps_lon: f64,
    gps_vmax: f64,
    pir_active: bool,
    pir_last_trigger: Option<f64>,
}

impl DeviceState {
    fn seeded(rng: &mut StdRng) -> Self {
        Self {
            temp_mean: rng.random_range(18.0..28.0),
            temp_current: rng.random_range(20.0..25.0),
            gps_lat: 23.8 + rng.random_range(-0.5..0.5),
            gps_lon: 90.4 + rng.random_range(-0.5..0.5),
            gps_vmax: GPS_VMAX_MPS[rng.random_range(0..GPS_VMAX_MPS.len())],
            pir_active: false,
            pir_last_trigger: None,
        }
    }
}

impl SensorStream {
    fn new(
        seed: u64,
        client: ClientId,
        sensor: SensorType,
        pacing: Pacing,
        interval: Duration,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(stream_seed(seed, client));
        let device = DeviceState::seeded(&mut rng);
        Self {
            client,
            sensor,
            dev_id: format!("{}_{}", sensor.short_name(), client.0),
            seed,
            pacing,
            interval,
            rng,
            device,
            clock_ms: 0,
            next_sequence: 0,
        }
    }

    pub fn dev_id(&self) -> &str {
        &self.dev_id
    }

    /// Rewind to the initial state; the stream then repeats itself exactly.
    pub fn restart(&mut self) {
        *self = Self::new(
            self.seed,
            self.client,
            self.sensor,
            self.pacing,
            self.interval,
        );
    }

    /// Produce the JSON payload for message `sequence`.
    pub fn next_payload(&mut self, sequence: u64) -> Bytes {
        let reading = self.reading();
        let doc = json!({
            "dev_id": self.dev_id,
            "seq_no": sequence,
            "t_ms": self.clock_ms,
            "sensor": self.sensor,
            "reading": reading,
        });
        match serde_json::to_vec(&doc) {
            Ok(buf) => Bytes::from(buf),
            Err(err) => {
                warn!(dev_id = %self.dev_id, sequence, "payload serialization failed: {err}");
                Bytes::new()
            }
        }
    }

    /// Gap until the next message, advancing the logical clock by it.
    pub fn next_interval(&mut self) -> Duration {
        let gap = match self.pacing {
            Pacing::Fixed => self.interval,
            Pacing::Weibull { shape, scale_ms } => match Weibull::new(scale_ms, shape) {
                Ok(dist) => {
                    let ms: f64 = dist.sample(&mut self.rng);
                    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(self.interval)
                }
                Err(_) => self.interval,
            },
        };
        self.clock_ms = self
            .clock_ms
            .saturating_add(gap.as_millis().min(u64::MAX as u128) as u64);
        gap
    }

    fn reading(&mut self) -> Value {
        let rng = &mut self.rng;
        let device = &mut self.device;
        match self.sensor {
            SensorType::Temperature => {
                device.temp_current = ou_step(rng, device.temp_current, device.temp_mean);
                json!({ "value": round(device.temp_current, 2), "unit": "C" })
            }
            SensorType::Humidity => {
                device.temp_current = ou_step(rng, device.temp_current, device.temp_mean);
                let base = 60.0 - (device.temp_current - 20.0) * 1.5;
                let value = (base + gauss(rng, 0.0, 3.0)).clamp(0.0, 100.0);
                json!({ "value": round(value, 2), "unit": "%" })
            }
            SensorType::Motion => {
                let now = self.clock_ms as f64 / 1000.0;
                pir_step(rng, device, now)
            }
            SensorType::Light => {
                json!({ "value": round(rng.random_range(0.0..1000.0), 2), "unit": "lux" })
            }
            SensorType::Pressure => {
                json!({ "value": round(gauss(rng, 1013.0, 10.0), 2), "unit": "hPa" })
            }
            SensorType::Gps => {
                let max_delta = device.gps_vmax / METERS_PER_DEGREE;
                let angle = rng.random_range(0.0..std::f64::consts::TAU);
                let speed = rng.random_range(0.0..1.0);
                device.gps_lat += max_delta * speed * angle.cos();
                device.gps_lon += max_delta * speed * angle.sin();
                json!({
                    "latitude": round(device.gps_lat, 6),
                    "longitude": round(device.gps_lon, 6),
                    "velocity_mps": round(device.gps_vmax * speed, 2),
                })
            }
            SensorType::Accelerometer => {
                let noise = ACCEL_NSD * (ACCEL_BANDWIDTH * 1.6).sqrt();
                json!({
                    "x": round(gauss(rng, 0.0, noise), 4),
                    "y": round(gauss(rng, 0.0, noise), 4),
                    "z": round(gauss(rng, 9.81, noise), 4),
                    "unit": "m/s2",
                })
            }
            SensorType::Gyroscope => json!({
                "x": round(gauss(rng, 0.0, 0.5), 2),
                "y": round(gauss(rng, 0.0, 0.5), 2),
                "z": round(gauss(rng, 0.0, 0.5), 2),
                "unit": "deg/s",
            }),
            SensorType::Camera => json!({
                "resolution": "1920x1080",
                "format": "JPEG",
                "size_kb": rng.random_range(50..=500u32),
            }),
            SensorType::Sound => {
                json!({ "level": round(gauss(rng, 50.0, 15.0), 2), "unit": "dB" })
            }
            SensorType::Vibration => json!({
                "frequency": round(rng.random_range(10.0..100.0), 2),
                "amplitude": round(rng.random_range(0.0..10.0), 2),
                "unit": "Hz",
            }),
            SensorType::Co2 => {
                json!({ "value": round(gauss(rng, 600.0, 100.0), 2), "unit": "ppm" })
            }
            SensorType::Voltage => {
                json!({ "value": round(gauss(rng, 3.7, 0.2), 2), "unit": "V" })
            }
        }
    }
}

impl Iterator for SensorStream {
    type Item = (u64, Bytes);

    /// Never ends; callers bound it by duration and rate.
    fn next(&mut self) -> Option<Self::Item> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some((sequence, self.next_payload(sequence)))
    }
}

fn stream_seed(seed: u64, client: ClientId) -> u64 {
    seed ^ u64::from(client.0).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn ou_step(rng: &mut StdRng, current: f64, mean: f64) -> f64 {
    let drift = OU_THETA * (mean - current) + OU_SIGMA * gauss(rng, 0.0, 1.0);
    current + drift.clamp(-TEMP_MAX_RATE, TEMP_MAX_RATE)
}

/// A PIR sensor holds its output for the dwell time, then ignores motion
/// for the blocking time before it can fire again.
fn pir_step(rng: &mut StdRng, device: &mut DeviceState, now: f64) -> Value {
    let since = device
        .pir_last_trigger
        .map(|last| now - last)
        .unwrap_or(f64::INFINITY);
    if device.pir_active {
        if since >= PIR_DWELL {
            device.pir_active = false;
            return json!({ "detected": false, "state": "blocking" });
        }
        return json!({ "detected": true, "state": "dwell" });
    }
    if since >= PIR_DWELL + PIR_BLOCKING && rng.random_bool(PIR_TRIGGER_PROBABILITY) {
        device.pir_active = true;
        device.pir_last_trigger = Some(now);
        return json!({ "detected": true, "state": "triggered" });
    }
    json!({ "detected": false, "state": "idle" })
}

fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    match Normal::new(mean, std_dev) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
