use bytes::Bytes;
use iot_lab_abstract::{
    AdapterError, ClientId, ConfigError, ExperimentConfig, Outcome, ProtocolAdapter, Sample,
    SendAck, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::generator::{SensorStream, SensorStreamGenerator};
use crate::injector::{Disruption, FailureInjector};
use crate::metrics::{MetricsCollector, Stats};
use crate::network::{NetworkConditionController, ProfileRegistry};

/// Cooperative cancellation shared by every client task of a run.
///
/// A stop request is sticky: once raised, later runs on the same
/// orchestrator stop on their first iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Ran until the deadline or the message budget.
    Completed,
    /// Every client ended early through the failure threshold or a crash.
    Aborted,
    /// The stop flag was raised.
    Stopped,
}

/// How each client's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientSummary {
    pub completed: u32,
    pub stopped: u32,
    pub crashed: u32,
    pub aborted: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub protocol: String,
    pub network_profile: String,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub elapsed_ms: u64,
    pub clients: ClientSummary,
    /// Iterations that woke up after their scheduled send time.
    pub lagged_iterations: u64,
    /// Set when the network profile could not be cleared after the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_error: Option<String>,
    pub stats: Stats,
}

impl RunResult {
    pub fn attempted(&self) -> u64 {
        self.stats.attempted
    }

    pub fn succeeded(&self) -> u64 {
        self.stats.succeeded
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed()
    }

    pub fn injected_loss(&self) -> u64 {
        self.stats.injected_losses
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientExit {
    Completed,
    Stopped,
    Crashed,
    Aborted,
}

struct ClientReport {
    exit: ClientExit,
    lagged: u64,
}

/// Drives one experiment: applies the network profile, runs one task per
/// simulated client and collects the samples.
pub struct Orchestrator {
    controller: NetworkConditionController,
    registry: ProfileRegistry,
    stop: StopHandle,
    phase: Mutex<RunPhase>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(NetworkConditionController::noop())
    }
}

impl Orchestrator {
    pub fn new(controller: NetworkConditionController) -> Self {
        Self {
            controller,
            registry: ProfileRegistry::with_presets(),
            stop: StopHandle::new(),
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    pub fn with_registry(mut self, registry: ProfileRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn controller(&self) -> &NetworkConditionController {
        &self.controller
    }

    /// Run one experiment to completion.
    ///
    /// Setup problems (invalid config, unknown or rejected profile, adapter
    /// start failure) are returned before any message is sent. Once clients
    /// are running, adapter errors become `error` samples.
    pub async fn run(
        &self,
        config: ExperimentConfig,
        adapter: Arc<dyn ProtocolAdapter>,
    ) -> Result<RunResult, EngineError> {
        let _phase = PhaseGuard::enter(&self.phase)?;

        let config = config.validate()?;
        let profile = self.registry.resolve(&config.network_profile)?;
        let injector = FailureInjector::new(&config.failure, config.clients)
            .map_err(ConfigError::Injector)?;
        let injector = Arc::new(injector);
        let handle = self.controller.apply(&profile)?;

        adapter
            .start()
            .map_err(|source| EngineError::AdapterStart {
                adapter: adapter.name().to_string(),
                source,
            })?;

        info!(
            protocol = %config.protocol,
            adapter = adapter.name(),
            profile = %profile.name,
            clients = config.clients,
            rate_hz = config.rate_hz,
            duration_ms = config.duration_ms,
            "starting run"
        );

        let collector = Arc::new(MetricsCollector::new(config.window_capacity));
        let generator = SensorStreamGenerator::from_config(&config);
        let started_at = Timestamp::now();
        let run_start = Instant::now();
        let deadline = run_start + config.duration();
        let budget = config.messages_per_client();

        let mut tasks = JoinSet::new();
        for index in 0..config.clients {
            let client = ClientId(index);
            let offset = config
                .interval()
                .checked_mul(index)
                .map(|d| d / config.clients)
                .unwrap_or_default();
            let worker = ClientWorker {
                client,
                stream: generator.stream(client, config.sensor_for(index)),
                adapter: Arc::clone(&adapter),
                injector: Arc::clone(&injector),
                collector: Arc::clone(&collector),
                stop: self.stop.clone(),
                run_start,
                deadline,
                budget,
                failure_threshold: config.failure_threshold,
            };
            tasks.spawn(worker.run(offset));
        }

        let mut clients = ClientSummary::default();
        let mut lagged_iterations = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    lagged_iterations += report.lagged;
                    match report.exit {
                        ClientExit::Completed => clients.completed += 1,
                        ClientExit::Stopped => clients.stopped += 1,
                        ClientExit::Crashed => clients.crashed += 1,
                        ClientExit::Aborted => clients.aborted += 1,
                    }
                }
                Err(err) => {
                    warn!("client task ended abnormally: {err}");
                    clients.aborted += 1;
                }
            }
        }

        let stopping = Arc::clone(&adapter);
        if let Err(err) = tokio::task::spawn_blocking(move || stopping.stop()).await {
            warn!(adapter = adapter.name(), "adapter stop panicked: {err}");
        }
        let reset_error = self
            .controller
            .reset(&handle)
            .err()
            .map(|err| err.to_string());
        drop(handle);

        let status = if self.stop.is_stopped() || clients.stopped > 0 {
            RunStatus::Stopped
        } else if clients.completed == 0 && Instant::now() < deadline {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };

        if lagged_iterations > 0 {
            warn!(
                lagged_iterations,
                "clients fell behind schedule; send rate was below target"
            );
        }

        let stats = collector.snapshot();
        let result = RunResult {
            status,
            protocol: config.protocol.clone(),
            network_profile: profile.name.clone(),
            started_at,
            finished_at: Timestamp::now(),
            elapsed_ms: run_start.elapsed().as_millis().min(u64::MAX as u128) as u64,
            clients,
            lagged_iterations,
            reset_error,
            stats,
        };
        info!(
            status = ?result.status,
            attempted = result.attempted(),
            succeeded = result.succeeded(),
            failed = result.failed(),
            injected_loss = result.injected_loss(),
            elapsed_ms = result.elapsed_ms,
            "run finished"
        );
        Ok(result)
    }
}

struct PhaseGuard<'a> {
    phase: &'a Mutex<RunPhase>,
}

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a Mutex<RunPhase>) -> Result<Self, EngineError> {
        let mut current = phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == RunPhase::Running {
            return Err(EngineError::AlreadyRunning);
        }
        *current = RunPhase::Running;
        Ok(Self { phase })
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = RunPhase::Finished;
    }
}

struct ClientWorker {
    client: ClientId,
    stream: SensorStream,
    adapter: Arc<dyn ProtocolAdapter>,
    injector: Arc<FailureInjector>,
    collector: Arc<MetricsCollector>,
    stop: StopHandle,
    run_start: Instant,
    deadline: Instant,
    budget: u64,
    failure_threshold: u32,
}

impl ClientWorker {
    async fn run(mut self, offset: Duration) -> ClientReport {
        let mut next_wake = self.run_start + offset;
        sleep_until(next_wake).await;

        let mut attempts = 0u64;
        let mut consecutive_failures = 0u32;
        let mut lagged = 0u64;

        let exit = loop {
            if self.stop.is_stopped() {
                break ClientExit::Stopped;
            }
            if attempts >= self.budget || Instant::now() >= self.deadline {
                break ClientExit::Completed;
            }
            if self.injector.is_crashed(self.client) {
                break ClientExit::Crashed;
            }
            let Some((sequence, payload)) = self.stream.next() else {
                break ClientExit::Completed;
            };

            let sent_at = Timestamp::now();
            let elapsed = self.run_start.elapsed();
            let outcome = match self.injector.decide(self.client, sequence, elapsed) {
                Disruption::Crash => break ClientExit::Crashed,
                Disruption::Drop => {
                    self.collector.record(Sample::new(
                        self.client,
                        sequence,
                        sent_at,
                        None,
                        Outcome::InjectedLoss,
                        payload.len(),
                    ));
                    Outcome::InjectedLoss
                }
                Disruption::Delay(hold) => {
                    sleep(hold).await;
                    self.send_and_record(sequence, sent_at, payload).await
                }
                Disruption::Proceed => self.send_and_record(sequence, sent_at, payload).await,
            };
            attempts += 1;

            if outcome.is_failure() {
                consecutive_failures += 1;
            } else if outcome == Outcome::Ok {
                consecutive_failures = 0;
            }
            if self.failure_threshold > 0 && consecutive_failures >= self.failure_threshold {
                warn!(
                    client = %self.client,
                    consecutive_failures,
                    "failure threshold reached; client aborted"
                );
                break ClientExit::Aborted;
            }

            next_wake += self.stream.next_interval();
            let now = Instant::now();
            if next_wake <= now {
                // behind schedule: send once now and pace from here, never
                // replay the missed slots
                lagged += 1;
                next_wake = now;
            }
            if next_wake >= self.deadline {
                break ClientExit::Completed;
            }
            if next_wake > now {
                sleep_until(next_wake).await;
            }
        };

        debug!(
            client = %self.client,
            dev_id = self.stream.dev_id(),
            ?exit,
            attempts,
            lagged,
            "client finished"
        );
        ClientReport { exit, lagged }
    }

    async fn send_and_record(&self, sequence: u64, sent_at: Timestamp, payload: Bytes) -> Outcome {
        let len = payload.len();
        let (outcome, received_at) = match self.send(payload).await {
            Ok(ack) if ack.delivered => (
                Outcome::Ok,
                Some(ack.server_timestamp.unwrap_or_else(Timestamp::now)),
            ),
            Ok(_) => (Outcome::OrganicLoss, None),
            Err(err) => {
                debug!(client = %self.client, sequence, "send failed: {err}");
                (Outcome::Error, None)
            }
        };
        self.collector.record(Sample::new(
            self.client,
            sequence,
            sent_at,
            received_at,
            outcome,
            len,
        ));
        outcome
    }

    async fn send(&self, payload: Bytes) -> Result<SendAck, AdapterError> {
        let adapter = Arc::clone(&self.adapter);
        let client = self.client;
        tokio::task::spawn_blocking(move || adapter.send(client, &payload))
            .await
            .unwrap_or_else(|err| {
                Err(AdapterError::Transport(format!(
                    "adapter call panicked: {err}"
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iot_lab_abstract::{ConfigError, SendAck};

    struct Echo;

    impl ProtocolAdapter for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn send(&self, _client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
            Ok(SendAck::delivered(None))
        }
    }

    struct RefusesToStart;

    impl ProtocolAdapter for RefusesToStart {
        fn name(&self) -> &str {
            "refuses"
        }

        fn start(&self) -> Result<(), AdapterError> {
            Err(AdapterError::NotStarted)
        }

        fn send(&self, _client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
            Ok(SendAck::lost())
        }
    }

    fn small_config() -> ExperimentConfig {
        ExperimentConfig {
            clients: 2,
            duration_ms: 300,
            rate_hz: 20.0,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn short_run_completes() {
        let orchestrator = Orchestrator::default();
        assert_eq!(orchestrator.phase(), RunPhase::Idle);
        let result = orchestrator
            .run(small_config(), Arc::new(Echo))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.attempted(), 12);
        assert_eq!(result.succeeded(), 12);
        assert_eq!(result.clients.completed, 2);
        assert_eq!(orchestrator.phase(), RunPhase::Finished);
        assert!(!orchestrator.controller().is_active());
    }

    #[tokio::test]
    async fn invalid_config_fails_before_sending() {
        let orchestrator = Orchestrator::default();
        let config = ExperimentConfig {
            clients: 0,
            ..small_config()
        };
        let err = orchestrator.run(config, Arc::new(Echo)).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::NoClients)));
    }

    #[tokio::test]
    async fn bad_failure_settings_are_a_config_error() {
        let orchestrator = Orchestrator::default();
        let mut config = small_config();
        config.failure.drop_probability = 2.0;
        let err = orchestrator.run(config, Arc::new(Echo)).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::Injector(_))));
        assert_eq!(orchestrator.phase(), RunPhase::Finished);
    }

    #[tokio::test]
    async fn unknown_profile_is_a_config_error() {
        let orchestrator = Orchestrator::default();
        let config = ExperimentConfig {
            network_profile: "moon_link".into(),
            ..small_config()
        };
        let err = orchestrator.run(config, Arc::new(Echo)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::UnknownProfile(name)) if name == "moon_link"
        ));
        assert!(!orchestrator.controller().is_active());
    }

    #[tokio::test]
    async fn adapter_start_failure_releases_profile() {
        let orchestrator = Orchestrator::default();
        let err = orchestrator
            .run(small_config(), Arc::new(RefusesToStart))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AdapterStart { adapter, .. } if adapter == "refuses"));
        assert!(!orchestrator.controller().is_active());
    }

    #[tokio::test]
    async fn stop_before_start_sends_nothing() {
        let orchestrator = Orchestrator::default();
        orchestrator.stop_handle().request_stop();
        let result = orchestrator
            .run(small_config(), Arc::new(Echo))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Stopped);
        assert_eq!(result.attempted(), 0);
        assert_eq!(result.clients.stopped, 2);
    }
}
