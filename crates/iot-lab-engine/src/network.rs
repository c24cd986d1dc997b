use iot_lab_abstract::{ConfigError, NetworkProfile};
use std::collections::BTreeMap;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::ProfileApplyError;

/// A facility that can impose a [`NetworkProfile`] on the path between the
/// simulated clients and the system under test.
pub trait ImpairmentBackend: Send + Sync {
    fn describe(&self) -> String;

    fn apply(&self, profile: &NetworkProfile) -> Result<(), ProfileApplyError>;

    /// Return the path to baseline. Must succeed when nothing is applied.
    fn clear(&self) -> Result<(), ProfileApplyError>;
}

/// Linux `tc qdisc ... netem` on one interface.
#[derive(Debug, Clone)]
pub struct NetemBackend {
    interface: String,
    use_sudo: bool,
}

impl NetemBackend {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            use_sudo: false,
        }
    }

    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// netem parameters for `profile`; empty for a baseline profile.
    pub fn netem_args(profile: &NetworkProfile) -> Vec<String> {
        let mut args = Vec::new();
        if profile.latency_ms > 0 {
            args.push("delay".into());
            args.push(format!("{}ms", profile.latency_ms));
            if profile.jitter_ms > 0 {
                args.push(format!("{}ms", profile.jitter_ms));
            }
        }
        if profile.loss_percent > 0.0 {
            args.extend(["loss".into(), format!("{}%", profile.loss_percent)]);
        }
        if profile.bandwidth_kbps > 0 {
            args.extend(["rate".into(), format!("{}kbit", profile.bandwidth_kbps)]);
        }
        args
    }

    fn tc(&self, args: &[&str]) -> Result<Output, ProfileApplyError> {
        let mut command = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("tc");
            c
        } else {
            Command::new("tc")
        };
        command.args(args);
        debug!(command = %self.render(args), "running traffic control");
        command.output().map_err(|source| ProfileApplyError::Spawn {
            command: self.render(args),
            source,
        })
    }

    fn render(&self, args: &[&str]) -> String {
        let prefix = if self.use_sudo { "sudo tc" } else { "tc" };
        format!("{prefix} {}", args.join(" "))
    }
}

impl ImpairmentBackend for NetemBackend {
    fn describe(&self) -> String {
        format!("netem on {}", self.interface)
    }

    fn apply(&self, profile: &NetworkProfile) -> Result<(), ProfileApplyError> {
        // start from a clean root qdisc
        self.clear()?;
        if profile.is_baseline() {
            return Ok(());
        }

        let netem = Self::netem_args(profile);
        let mut args = vec!["qdisc", "add", "dev", self.interface.as_str(), "root", "netem"];
        args.extend(netem.iter().map(String::as_str));
        let output = self.tc(&args)?;
        if !output.status.success() {
            return Err(ProfileApplyError::Rejected {
                command: self.render(&args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), ProfileApplyError> {
        let args = ["qdisc", "del", "dev", self.interface.as_str(), "root"];
        let output = self.tc(&args)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // no root qdisc installed: already at baseline
        if stderr.contains("No such file") || stderr.contains("handle of zero") {
            return Ok(());
        }
        Err(ProfileApplyError::Rejected {
            command: self.render(&args),
            stderr: stderr.trim().to_string(),
        })
    }
}

/// For hosts without traffic control privileges. Profiles are accepted but
/// not emulated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl ImpairmentBackend for NoopBackend {
    fn describe(&self) -> String {
        "no impairment".to_string()
    }

    fn apply(&self, profile: &NetworkProfile) -> Result<(), ProfileApplyError> {
        if !profile.is_baseline() {
            warn!(
                profile = %profile.name,
                "no traffic control backend configured; running on the unimpaired path"
            );
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), ProfileApplyError> {
        Ok(())
    }
}

/// Known profiles by name: the presets plus anything registered from files.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, NetworkProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::with_presets()
    }
}

impl ProfileRegistry {
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    pub fn with_presets() -> Self {
        let mut registry = Self::empty();
        for profile in NetworkProfile::presets() {
            registry.register(profile);
        }
        registry
    }

    /// Add or replace a profile; returns the one it replaced.
    pub fn register(&mut self, profile: NetworkProfile) -> Option<NetworkProfile> {
        self.profiles.insert(profile.name.clone(), profile)
    }

    pub fn resolve(&self, name: &str) -> Result<NetworkProfile, ConfigError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.profiles.values()
    }
}

struct ActiveProfile {
    id: u64,
    name: String,
}

struct ControllerInner {
    backend: Box<dyn ImpairmentBackend>,
    active: Mutex<Option<ActiveProfile>>,
    next_id: AtomicU64,
}

impl ControllerInner {
    fn release(&self, id: u64) -> Result<(), ProfileApplyError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = active.as_ref() else {
            return Ok(());
        };
        if current.id != id {
            return Ok(());
        }
        // On failure the slot stays occupied: the path may still be impaired
        // until `restore_baseline` succeeds.
        if let Err(err) = self.backend.clear() {
            warn!(profile = %current.name, "failed to reset network profile: {err}");
            return Err(err);
        }
        info!(profile = %current.name, "network profile reset");
        *active = None;
        Ok(())
    }
}

/// Serialises access to one impairment path. At most one profile is active
/// at a time; it stays applied until its [`ProfileHandle`] is reset or
/// dropped.
#[derive(Clone)]
pub struct NetworkConditionController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for NetworkConditionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConditionController")
            .field("backend", &self.inner.backend.describe())
            .field("active", &self.active_profile())
            .finish()
    }
}

impl NetworkConditionController {
    pub fn new(backend: impl ImpairmentBackend + 'static) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                backend: Box::new(backend),
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn noop() -> Self {
        Self::new(NoopBackend)
    }

    pub fn describe(&self) -> String {
        self.inner.backend.describe()
    }

    pub fn apply(&self, profile: &NetworkProfile) -> Result<ProfileHandle, ProfileApplyError> {
        if let Some(reason) = profile.parameter_problem() {
            return Err(ProfileApplyError::InvalidParameters {
                profile: profile.name.clone(),
                reason,
            });
        }

        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            return Err(ProfileApplyError::AlreadyActive {
                active: current.name.clone(),
            });
        }

        if let Err(err) = self.inner.backend.apply(profile) {
            if let Err(clear_err) = self.inner.backend.clear() {
                warn!(
                    profile = %profile.name,
                    "cleanup after failed apply also failed: {clear_err}"
                );
            }
            return Err(err);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        *active = Some(ActiveProfile {
            id,
            name: profile.name.clone(),
        });
        info!(
            profile = %profile.name,
            latency_ms = profile.latency_ms,
            jitter_ms = profile.jitter_ms,
            loss_percent = profile.loss_percent,
            bandwidth_kbps = profile.bandwidth_kbps,
            backend = %self.inner.backend.describe(),
            "network profile applied"
        );

        Ok(ProfileHandle {
            inner: Arc::clone(&self.inner),
            id,
            profile: profile.clone(),
            released: AtomicBool::new(false),
        })
    }

    /// Restore baseline for `handle`. Calling it again is a no-op.
    ///
    /// A failed clear is reported once; the controller then keeps reporting
    /// the profile as active.
    pub fn reset(&self, handle: &ProfileHandle) -> Result<(), ProfileApplyError> {
        handle.release()
    }

    /// Clear the path regardless of what this controller believes is
    /// applied. Safe to call before any `apply`.
    pub fn restore_baseline(&self) -> Result<(), ProfileApplyError> {
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.backend.clear()?;
        *active = None;
        Ok(())
    }

    pub fn active_profile(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.name.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active_profile().is_some()
    }
}

/// Proof that a profile is applied. Dropping it restores the baseline.
pub struct ProfileHandle {
    inner: Arc<ControllerInner>,
    id: u64,
    profile: NetworkProfile,
    released: AtomicBool,
}

impl ProfileHandle {
    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn release(&self) -> Result<(), ProfileApplyError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.release(self.id)
    }
}

impl std::fmt::Debug for ProfileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileHandle")
            .field("profile", &self.profile.name)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for ProfileHandle {
    fn drop(&mut self) {
        // already logged by the controller
        let _ = self.release();
    }
}
