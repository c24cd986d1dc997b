use iot_lab_abstract::{AdapterError, ClientId, ProtocolAdapter, SendAck, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Acknowledges every message after a fixed delay, stamping the ack with the
/// time it was "received".
#[derive(Debug)]
pub struct LoopbackAdapter {
    delay: Duration,
    started: AtomicBool,
    delivered: AtomicU64,
}

impl LoopbackAdapter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl ProtocolAdapter for LoopbackAdapter {
    fn name(&self) -> &str {
        "loopback"
    }

    fn start(&self) -> Result<(), AdapterError> {
        self.started.store(true, Ordering::SeqCst);
        debug!(delay_ms = self.delay.as_millis() as u64, "loopback adapter started");
        Ok(())
    }

    fn send(&self, _client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(AdapterError::NotStarted);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(SendAck::delivered(Some(Timestamp::now())))
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        info!(delivered = self.delivered(), "loopback adapter stopped");
    }
}

/// A loopback that misbehaves on purpose: each call may fail with a
/// transport error or go unacknowledged.
///
/// Draws are keyed by `(seed, client, call index)`, so a client sees the same
/// sequence of outcomes on every run.
#[derive(Debug)]
pub struct FlakyAdapter {
    delay: Duration,
    loss_probability: f64,
    error_probability: f64,
    seed: u64,
    started: AtomicBool,
    calls: Mutex<HashMap<ClientId, u64>>,
}

impl FlakyAdapter {
    pub fn new(delay: Duration, loss_probability: f64, error_probability: f64, seed: u64) -> Self {
        Self {
            delay,
            loss_probability,
            error_probability,
            seed,
            started: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn next_call(&self, client: ClientId) -> u64 {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = calls.entry(client).or_insert(0);
        let call = *counter;
        *counter += 1;
        call
    }
}

impl ProtocolAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        "flaky"
    }

    fn start(&self) -> Result<(), AdapterError> {
        self.started.store(true, Ordering::SeqCst);
        info!(
            loss_probability = self.loss_probability,
            error_probability = self.error_probability,
            "flaky adapter started"
        );
        Ok(())
    }

    fn send(&self, client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(AdapterError::NotStarted);
        }
        let call = self.next_call(client);
        let key = self.seed ^ (u64::from(client.0) << 32) ^ call;
        let roll: f64 = StdRng::seed_from_u64(key).random();

        if roll < self.error_probability {
            return Err(AdapterError::Transport(format!(
                "simulated transport error on call {call}"
            )));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if roll < self.error_probability + self.loss_probability {
            return Ok(SendAck::lost());
        }
        Ok(SendAck::delivered(Some(Timestamp::now())))
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }
}
