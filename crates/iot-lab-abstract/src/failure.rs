use serde::{Deserialize, Serialize};

use crate::error::InjectorConfigError;
use crate::sample::ClientId;

/// Failure-injection settings carried by an experiment config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureConfig {
    /// Probability that any single message is dropped before it is sent.
    #[serde(default)]
    pub drop_probability: f64,
    #[serde(default)]
    pub seed: u64,
    /// Scheduled or probabilistic disruptions on top of the blanket drop rate.
    #[serde(default)]
    pub events: Vec<FailureEvent>,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            drop_probability: 0.0,
            seed: 0,
            events: Vec::new(),
        }
    }
}

impl FailureConfig {
    pub fn validate(&self, clients: u32) -> Result<(), InjectorConfigError> {
        check_probability(self.drop_probability)?;
        for event in &self.events {
            event.validate(clients)?;
        }
        Ok(())
    }
}

/// One disruption descriptor: what happens, to whom, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub kind: FailureKind,
    #[serde(default = "FailureTarget::all")]
    pub target: FailureTarget,
    pub trigger: FailureTrigger,
}

impl FailureEvent {
    pub fn validate(&self, clients: u32) -> Result<(), InjectorConfigError> {
        if let FailureKind::Delay { ms: 0 } = self.kind {
            return Err(InjectorConfigError::ZeroDelay);
        }
        if let FailureTarget::Client(client) = self.target
            && client.0 >= clients
        {
            return Err(InjectorConfigError::UnknownClient { client, clients });
        }
        if let FailureTrigger::Probability(p) = self.trigger {
            check_probability(p)?;
        }
        Ok(())
    }

    pub fn applies_to(&self, client: ClientId) -> bool {
        match self.target {
            FailureTarget::All => true,
            FailureTarget::Client(target) => target == client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// Drop the message before it reaches the adapter.
    Drop,
    /// Hold the message back before sending it.
    Delay { ms: u64 },
    /// Permanently disable the client.
    Crash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTarget {
    All,
    Client(ClientId),
}

impl FailureTarget {
    fn all() -> Self {
        FailureTarget::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTrigger {
    /// Independent draw on every message.
    Probability(f64),
    /// Exactly at this per-client sequence number.
    AtSequence(u64),
    /// Once, on the first message at or after this many milliseconds into the run.
    AfterMs(u64),
}

fn check_probability(p: f64) -> Result<(), InjectorConfigError> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(InjectorConfigError::Probability(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_probabilities() {
        let cfg = FailureConfig {
            drop_probability: 1.5,
            ..Default::default()
        };
        assert_eq!(cfg.validate(4), Err(InjectorConfigError::Probability(1.5)));

        let cfg = FailureConfig {
            events: vec![FailureEvent {
                kind: FailureKind::Drop,
                target: FailureTarget::All,
                trigger: FailureTrigger::Probability(f64::NAN),
            }],
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(4),
            Err(InjectorConfigError::Probability(_))
        ));
    }

    #[test]
    fn rejects_events_for_missing_clients() {
        let cfg = FailureConfig {
            events: vec![FailureEvent {
                kind: FailureKind::Crash,
                target: FailureTarget::Client(ClientId(7)),
                trigger: FailureTrigger::AtSequence(3),
            }],
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(4),
            Err(InjectorConfigError::UnknownClient {
                client: ClientId(7),
                clients: 4
            })
        );
        assert!(cfg.validate(8).is_ok());
    }

    #[test]
    fn rejects_zero_delay() {
        let event = FailureEvent {
            kind: FailureKind::Delay { ms: 0 },
            target: FailureTarget::All,
            trigger: FailureTrigger::AfterMs(100),
        };
        assert_eq!(event.validate(1), Err(InjectorConfigError::ZeroDelay));
    }

    #[test]
    fn parses_events_from_toml() {
        let cfg: FailureConfig = toml::from_str(
            r#"
            drop_probability = 0.1
            seed = 9

            [[events]]
            kind = { type = "delay", ms = 250 }
            trigger = { probability = 0.05 }

            [[events]]
            kind = { type = "crash" }
            target = { client = 2 }
            trigger = { after_ms = 1500 }
            "#,
        )
        .unwrap();

        assert_eq!(cfg.events.len(), 2);
        assert_eq!(cfg.events[0].target, FailureTarget::All);
        assert_eq!(cfg.events[0].kind, FailureKind::Delay { ms: 250 });
        assert_eq!(cfg.events[1].target, FailureTarget::Client(ClientId(2)));
        assert_eq!(cfg.events[1].trigger, FailureTrigger::AfterMs(1500));
    }
}
