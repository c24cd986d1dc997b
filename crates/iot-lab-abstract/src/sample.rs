use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of one simulated device, dense from `0..clients`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client_{}", self.0)
    }
}

/// Wall-clock instant in microseconds since the Unix epoch.
///
/// Adapters running in another process can only report wall-clock time, so
/// samples are stamped with it rather than with a monotonic `Instant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(since_epoch.as_micros().min(u64::MAX as u128) as u64)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// `None` when `earlier` is not strictly before `self`.
    pub fn checked_since(self, earlier: Timestamp) -> Option<Duration> {
        (self.0 > earlier.0).then(|| Duration::from_micros(self.0 - earlier.0))
    }

    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(
            self.0
                .saturating_add(delta.as_micros().min(u64::MAX as u128) as u64),
        )
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Delivered and acknowledged by the adapter.
    Ok,
    /// The adapter returned an error.
    Error,
    /// Dropped by the failure injector before it reached the adapter.
    InjectedLoss,
    /// The adapter sent it but reported no delivery (timeout, lost ack).
    OrganicLoss,
}

impl Outcome {
    /// Failures attributable to the system under test (injected drops excluded).
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Error | Outcome::OrganicLoss)
    }
}

/// One recorded send attempt. Fields are read-only once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    client: ClientId,
    sequence: u64,
    sent_at: Timestamp,
    received_at: Option<Timestamp>,
    outcome: Outcome,
    payload_len: usize,
}

impl Sample {
    pub fn new(
        client: ClientId,
        sequence: u64,
        sent_at: Timestamp,
        received_at: Option<Timestamp>,
        outcome: Outcome,
        payload_len: usize,
    ) -> Self {
        Self {
            client,
            sequence,
            sent_at,
            received_at,
            outcome,
            payload_len,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sent_at(&self) -> Timestamp {
        self.sent_at
    }

    pub fn received_at(&self) -> Option<Timestamp> {
        self.received_at
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Latency in milliseconds for delivered samples whose receive stamp is
    /// strictly after the send stamp.
    pub fn latency_ms(&self) -> Option<f64> {
        if self.outcome != Outcome::Ok {
            return None;
        }
        self.received_at?
            .checked_since(self.sent_at)
            .map(|d| d.as_micros() as f64 / 1000.0)
    }
}
