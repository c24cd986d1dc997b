//! Shared adapters and backends for engine integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use iot_lab_abstract::{AdapterError, ClientId, NetworkProfile, ProtocolAdapter, SendAck};
use iot_lab_engine::{ImpairmentBackend, ProfileApplyError};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Delivers every message after a fixed blocking delay.
pub struct FixedDelayAdapter {
    delay: Duration,
    calls: AtomicU64,
}

impl FixedDelayAdapter {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProtocolAdapter for FixedDelayAdapter {
    fn name(&self) -> &str {
        "fixed-delay"
    }

    fn send(&self, _client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(SendAck::delivered(None))
    }
}

/// Blocks on its first send only, then delivers immediately. Remembers when
/// each call arrived.
pub struct StallingAdapter {
    stall: Duration,
    calls: Mutex<Vec<Instant>>,
}

impl StallingAdapter {
    pub fn new(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            stall,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProtocolAdapter for StallingAdapter {
    fn name(&self) -> &str {
        "stalling"
    }

    fn send(&self, _client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len() == 1
        };
        if first {
            thread::sleep(self.stall);
        }
        Ok(SendAck::delivered(None))
    }
}

/// Fails every send for the listed clients and delivers for everyone else.
pub struct FailingAdapter {
    failing: Vec<ClientId>,
}

impl FailingAdapter {
    pub fn all() -> Arc<Self> {
        Arc::new(Self {
            failing: Vec::new(),
        })
    }

    pub fn for_clients(failing: Vec<ClientId>) -> Arc<Self> {
        Arc::new(Self { failing })
    }
}

impl ProtocolAdapter for FailingAdapter {
    fn name(&self) -> &str {
        "failing"
    }

    fn send(&self, client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
        if self.failing.is_empty() || self.failing.contains(&client) {
            return Err(AdapterError::Transport("connection refused".into()));
        }
        Ok(SendAck::delivered(None))
    }
}

/// Records apply/clear calls; can be told to reject applies or clears.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<String>>>,
    reject: bool,
    reject_clear: bool,
}

impl RecordingBackend {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn stuck() -> Self {
        Self {
            reject_clear: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ImpairmentBackend for RecordingBackend {
    fn describe(&self) -> String {
        "recording".into()
    }

    fn apply(&self, profile: &NetworkProfile) -> Result<(), ProfileApplyError> {
        self.calls.lock().unwrap().push(format!("apply {}", profile.name));
        if self.reject {
            return Err(ProfileApplyError::Rejected {
                command: "tc qdisc add dev lo root netem".into(),
                stderr: "RTNETLINK answers: Operation not permitted".into(),
            });
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), ProfileApplyError> {
        self.calls.lock().unwrap().push("clear".into());
        if self.reject_clear {
            return Err(ProfileApplyError::Rejected {
                command: "tc qdisc del dev lo root".into(),
                stderr: "RTNETLINK answers: Operation not permitted".into(),
            });
        }
        Ok(())
    }
}
