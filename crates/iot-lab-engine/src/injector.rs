use iot_lab_abstract::{
    ClientId, FailureConfig, FailureEvent, FailureKind, FailureTrigger, InjectorConfigError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const DROP_SALT: u64 = 0xD1B5_4A32_D192_ED03;
const EVENT_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// What the orchestrator should do with the next message of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disruption {
    Proceed,
    /// Record the message as `injected_loss` without sending it.
    Drop,
    /// Hold the message for this long, then send it.
    Delay(Duration),
    /// The client is permanently disabled.
    Crash,
}

/// Seeded, reproducible disruption of simulated clients.
///
/// Every random decision is keyed by `(seed, client, sequence)` rather than
/// drawn from one shared generator, so outcomes do not depend on how client
/// tasks interleave.
#[derive(Debug)]
pub struct FailureInjector {
    drop_probability: f64,
    seed: u64,
    events: Vec<FailureEvent>,
    crashed: Mutex<HashSet<ClientId>>,
    fired_once: Mutex<HashSet<(usize, ClientId)>>,
}

impl FailureInjector {
    pub fn new(config: &FailureConfig, clients: u32) -> Result<Self, InjectorConfigError> {
        config.validate(clients)?;
        Ok(Self {
            drop_probability: config.drop_probability,
            seed: config.seed,
            events: config.events.clone(),
            crashed: Mutex::new(HashSet::new()),
            fired_once: Mutex::new(HashSet::new()),
        })
    }

    /// An injector that never disrupts anything.
    pub fn disabled() -> Self {
        Self {
            drop_probability: 0.0,
            seed: 0,
            events: Vec::new(),
            crashed: Mutex::new(HashSet::new()),
            fired_once: Mutex::new(HashSet::new()),
        }
    }

    /// Independent draw against the configured drop probability.
    pub fn should_drop(&self, client: ClientId, sequence: u64) -> bool {
        chance(self.drop_probability, self.seed ^ DROP_SALT, client, sequence)
    }

    /// Permanently deactivate `client`. There is no way back.
    pub fn inject_crash(&self, client: ClientId) {
        let inserted = self
            .crashed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client);
        if inserted {
            info!(%client, "client crashed by failure injection");
        }
    }

    pub fn is_crashed(&self, client: ClientId) -> bool {
        self.crashed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&client)
    }

    pub fn crashed_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self
            .crashed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        clients.sort();
        clients
    }

    /// Evaluate crash state, scheduled events (in declaration order) and the
    /// blanket drop rate for the message about to be sent.
    pub fn decide(&self, client: ClientId, sequence: u64, elapsed: Duration) -> Disruption {
        if self.is_crashed(client) {
            return Disruption::Crash;
        }

        for (index, event) in self.events.iter().enumerate() {
            if !event.applies_to(client) || !self.triggered(index, event, client, sequence, elapsed)
            {
                continue;
            }
            debug!(%client, sequence, kind = ?event.kind, "failure event fired");
            return match event.kind {
                FailureKind::Drop => Disruption::Drop,
                FailureKind::Delay { ms } => Disruption::Delay(Duration::from_millis(ms)),
                FailureKind::Crash => {
                    self.inject_crash(client);
                    Disruption::Crash
                }
            };
        }

        if self.should_drop(client, sequence) {
            Disruption::Drop
        } else {
            Disruption::Proceed
        }
    }

    fn triggered(
        &self,
        index: usize,
        event: &FailureEvent,
        client: ClientId,
        sequence: u64,
        elapsed: Duration,
    ) -> bool {
        match event.trigger {
            FailureTrigger::Probability(p) => {
                let salt = self.seed ^ EVENT_SALT.wrapping_mul(index as u64 + 1);
                chance(p, salt, client, sequence)
            }
            FailureTrigger::AtSequence(target) => sequence == target,
            FailureTrigger::AfterMs(ms) => {
                elapsed >= Duration::from_millis(ms)
                    && self
                        .fired_once
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert((index, client))
            }
        }
    }
}

fn chance(probability: f64, salt: u64, client: ClientId, sequence: u64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    if probability >= 1.0 {
        return true;
    }
    let key = splitmix(splitmix(salt ^ u64::from(client.0)) ^ sequence);
    StdRng::seed_from_u64(key).random::<f64>() < probability
}

fn splitmix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
