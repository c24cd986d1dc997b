use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, info, warn};

use iot_lab_abstract::{
    AdapterSection, ConfigOverride, ExperimentConfig, NetworkProfile, SlaRule, TestScenario,
    parse_sensor_mix,
};
use iot_lab_engine::{
    NetemBackend, NetworkConditionController, Orchestrator, ProfileRegistry, RuleOutcome,
    RunArtifact, RunResult, ValidationReport, Verdict, validate,
};
use iot_lab_loader::{AdapterLoader, AdapterOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "IoT protocol load and impairment lab")]
struct Args {
    /// Load a scenario (TOML) from disk.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Extra network profile (JSON). May be repeated.
    #[arg(long = "profile-file")]
    profile_files: Vec<PathBuf>,

    /// Apply profiles with tc netem on this interface. Without it profiles
    /// are accepted but not emulated.
    #[arg(long)]
    interface: Option<String>,

    /// Run tc through sudo.
    #[arg(long, default_value_t = false)]
    sudo: bool,

    #[arg(long)]
    clients: Option<u32>,
    #[arg(long)]
    duration_secs: Option<f64>,
    /// Messages per second per client.
    #[arg(long)]
    rate: Option<f64>,
    /// Network profile name, e.g. wifi, 4g, lorawan.
    #[arg(long)]
    profile: Option<String>,
    /// Sensor mix, e.g. temp,humidity,gps.
    #[arg(long)]
    sensors: Option<String>,
    #[arg(long)]
    drop_probability: Option<f64>,
    /// Seed for payloads and failure injection.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    failure_threshold: Option<u32>,

    /// Built-in adapter to drive: loopback or flaky.
    #[arg(long)]
    builtin_adapter: Option<String>,
    #[arg(long)]
    adapter_delay_ms: Option<u64>,

    /// Write a JSON artifact of the finished run.
    #[arg(long)]
    artifact_out: Option<PathBuf>,

    /// Print the known network profiles and exit.
    #[arg(long, default_value_t = false)]
    list_profiles: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let registry = args.build_registry()?;
    if args.list_profiles {
        print_profiles(&registry);
        return Ok(ExitCode::SUCCESS);
    }

    let scenario = args.scenario.as_deref().map(load_scenario).transpose()?;
    let mut config = scenario
        .as_ref()
        .map(TestScenario::experiment_config)
        .unwrap_or_default();
    args.apply_overrides(&mut config)?;
    let sla: Vec<SlaRule> = scenario
        .as_ref()
        .map(|s| s.sla.clone())
        .unwrap_or_default();

    let loader = AdapterLoader::builder()
        .default_options(AdapterOptions {
            seed: config.payload_seed,
            ..Default::default()
        })
        .build()?;
    let adapter = loader
        .load_section(&args.adapter_section(scenario.as_ref()))
        .context("Failed to load protocol adapter")?;

    let controller = args.build_controller()?;
    info!("Network impairment via {}", controller.describe());
    let orchestrator = Orchestrator::new(controller).with_registry(registry);

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping clients…");
            stop.request_stop();
        }
    });

    info!(
        "iot-lab-sim-cli starting {} ({} clients, {} ms, {} Hz, profile {})",
        scenario.as_ref().map_or("ad-hoc run", |s| s.name.as_str()),
        config.clients,
        config.duration_ms,
        config.rate_hz,
        config.network_profile
    );
    let result = orchestrator
        .run(config.clone(), adapter)
        .await
        .context("Run could not start")?;
    let report = validate(&result.stats, &sla);
    log_summary(&result, &report);

    let verdict = report.verdict;
    if let Some(path) = &args.artifact_out {
        let artifact = RunArtifact::new(scenario.map(|s| s.name), config, result, report);
        write_artifact(path, &artifact)?;
        info!("Artifact written to {}", path.display());
    }

    Ok(match verdict {
        Verdict::Pass => ExitCode::SUCCESS,
        Verdict::Inconclusive => {
            warn!("Some SLA rules had no data to evaluate");
            ExitCode::SUCCESS
        }
        Verdict::Fail => ExitCode::FAILURE,
    })
}

impl Args {
    fn build_registry(&self) -> Result<ProfileRegistry> {
        let mut registry = ProfileRegistry::with_presets();
        for path in &self.profile_files {
            let profile = load_profile(path)?;
            if let Some(reason) = profile.parameter_problem() {
                anyhow::bail!("Profile {} in {}: {reason}", profile.name, path.display());
            }
            if registry.register(profile.clone()).is_some() {
                info!("Profile {} from {} replaces the built-in one", profile.name, path.display());
            }
        }
        Ok(registry)
    }

    fn build_controller(&self) -> Result<NetworkConditionController> {
        let Some(interface) = &self.interface else {
            return Ok(NetworkConditionController::noop());
        };
        let controller = NetworkConditionController::new(
            NetemBackend::new(interface.clone()).with_sudo(self.sudo),
        );
        controller
            .restore_baseline()
            .with_context(|| format!("Failed to clear traffic control on {interface}"))?;
        Ok(controller)
    }

    fn apply_overrides(&self, config: &mut ExperimentConfig) -> Result<()> {
        let sensors = self
            .sensors
            .as_deref()
            .map(parse_sensor_mix)
            .transpose()
            .context("Invalid --sensors")?;
        ConfigOverride {
            clients: self.clients,
            duration_ms: self
                .duration_secs
                .map(|secs| (secs * 1000.0).round().max(0.0) as u64),
            rate_hz: self.rate,
            sensors,
            network_profile: self.profile.clone(),
            failure_threshold: self.failure_threshold,
            payload_seed: self.seed,
            ..Default::default()
        }
        .apply_to(config);

        if let Some(p) = self.drop_probability {
            config.failure.drop_probability = p;
        }
        if let Some(seed) = self.seed {
            config.failure.seed = seed;
        }
        Ok(())
    }

    fn adapter_section(&self, scenario: Option<&TestScenario>) -> AdapterSection {
        let mut section = scenario.map(|s| s.adapter.clone()).unwrap_or_default();
        if let Some(name) = &self.builtin_adapter {
            section.builtin = Some(name.clone());
        }
        if let Some(delay) = self.adapter_delay_ms {
            section.delay_ms = Some(delay);
        }
        section
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn print_profiles(registry: &ProfileRegistry) {
    println!(
        "{:<16} {:>10} {:>10} {:>8} {:>12}",
        "profile", "latency_ms", "jitter_ms", "loss_%", "rate_kbit"
    );
    for p in registry.profiles() {
        println!(
            "{:<16} {:>10} {:>10} {:>8} {:>12}",
            p.name, p.latency_ms, p.jitter_ms, p.loss_percent, p.bandwidth_kbps
        );
    }
}

fn log_summary(result: &RunResult, report: &ValidationReport) {
    let stats = &result.stats;
    info!(
        "Run {:?} after {} ms: sent={} ok={} errors={} organic_loss={} injected_loss={}",
        result.status,
        result.elapsed_ms,
        stats.attempted,
        stats.succeeded,
        stats.errors,
        stats.organic_losses,
        stats.injected_losses
    );
    if let Some(loss) = stats.loss_percent {
        info!("Loss {loss:.2}%");
    }
    if let Some(throughput) = stats.throughput_per_sec {
        info!("Throughput {throughput:.1} msg/s");
    }
    match &stats.latency {
        Some(l) => info!(
            "Latency ms: avg={:.2} min={:.2} max={:.2} p50={:.2} p95={:.2} p99={:.2}",
            l.mean_ms, l.min_ms, l.max_ms, l.p50_ms, l.p95_ms, l.p99_ms
        ),
        None => info!("Latency: no successful deliveries"),
    }
    if let Some(reason) = &result.reset_error {
        warn!(
            "Network profile {} may still be applied: {reason}",
            result.network_profile
        );
    }
    if result.lagged_iterations > 0 {
        warn!("{} sends went out late", result.lagged_iterations);
    }
    for r in &report.results {
        let measured = r
            .measured
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));
        let tag = if r.rule.required { "" } else { " (optional)" };
        match r.outcome {
            RuleOutcome::Pass => info!("SLA {}{tag}: PASS (measured {measured})", r.rule),
            RuleOutcome::Fail => warn!("SLA {}{tag}: FAIL (measured {measured})", r.rule),
            RuleOutcome::InsufficientData => warn!("SLA {}{tag}: NO DATA", r.rule),
        }
    }
    info!("Verdict: {:?}", report.verdict);
}

fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: TestScenario =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

fn load_profile(path: &Path) -> Result<NetworkProfile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile file {}", path.display()))?;
    let profile: NetworkProfile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse profile file {}", path.display()))?;
    Ok(profile)
}

fn write_artifact(path: &Path, artifact: &RunArtifact) -> Result<()> {
    let data = artifact
        .to_json_pretty()
        .context("Failed to serialize run artifact")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write artifact file {}", path.display()))?;
    Ok(())
}
