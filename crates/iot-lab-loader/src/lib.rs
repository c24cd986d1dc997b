mod builtin;
pub mod names;

use anyhow::{Context, Result};
use iot_lab_abstract::{AdapterSection, ProtocolAdapter};
use std::sync::Arc;
use std::time::Duration;

pub use builtin::{FlakyAdapter, LoopbackAdapter};

/// Adapters shipped with the harness, usable without any protocol stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinAdapter {
    Loopback,
    Flaky,
}

/// Tuning knobs shared by the built-in adapters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdapterOptions {
    pub delay_ms: u64,
    pub loss_probability: f64,
    pub error_probability: f64,
    pub seed: u64,
}

impl AdapterOptions {
    /// Options from a scenario `[adapter]` table, falling back to `self`.
    pub fn merged_with(&self, section: &AdapterSection) -> Self {
        Self {
            delay_ms: section.delay_ms.unwrap_or(self.delay_ms),
            loss_probability: section.loss_probability.unwrap_or(self.loss_probability),
            error_probability: section.error_probability.unwrap_or(self.error_probability),
            seed: section.seed.unwrap_or(self.seed),
        }
    }

    fn validate(&self) -> Result<()> {
        for (field, p) in [
            ("loss_probability", self.loss_probability),
            ("error_probability", self.error_probability),
        ] {
            if !(p.is_finite() && (0.0..=1.0).contains(&p)) {
                anyhow::bail!("{field} must be within [0, 1], got {p}");
            }
        }
        if self.loss_probability + self.error_probability > 1.0 {
            anyhow::bail!(
                "loss_probability + error_probability exceeds 1 ({} + {})",
                self.loss_probability,
                self.error_probability
            );
        }
        Ok(())
    }
}

/// Describes how to obtain a protocol adapter.
pub enum AdapterDescriptor {
    BuiltIn(BuiltinAdapter, AdapterOptions),
    Rust(Arc<dyn ProtocolAdapter>),
}

/// Builder for the loader. Sets what a scenario without an `[adapter]`
/// table gets.
pub struct LoaderBuilder {
    default_builtin: BuiltinAdapter,
    defaults: AdapterOptions,
}

impl Default for LoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderBuilder {
    pub fn new() -> Self {
        Self {
            default_builtin: BuiltinAdapter::Loopback,
            defaults: AdapterOptions::default(),
        }
    }

    pub fn default_builtin(mut self, builtin: BuiltinAdapter) -> Self {
        self.default_builtin = builtin;
        self
    }

    pub fn default_options(mut self, options: AdapterOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn build(self) -> Result<AdapterLoader> {
        self.defaults
            .validate()
            .context("Invalid default adapter options")?;
        Ok(AdapterLoader {
            default_builtin: self.default_builtin,
            defaults: self.defaults,
        })
    }
}

/// Turns adapter descriptors into shared adapter instances.
pub struct AdapterLoader {
    default_builtin: BuiltinAdapter,
    defaults: AdapterOptions,
}

impl AdapterLoader {
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::new()
    }

    pub fn load(&self, descriptor: AdapterDescriptor) -> Result<Arc<dyn ProtocolAdapter>> {
        match descriptor {
            AdapterDescriptor::BuiltIn(builtin, options) => {
                options
                    .validate()
                    .with_context(|| format!("Invalid options for builtin {builtin:?}"))?;
                let delay = Duration::from_millis(options.delay_ms);
                Ok(match builtin {
                    BuiltinAdapter::Loopback => Arc::new(LoopbackAdapter::new(delay)),
                    BuiltinAdapter::Flaky => Arc::new(FlakyAdapter::new(
                        delay,
                        options.loss_probability,
                        options.error_probability,
                        options.seed,
                    )),
                })
            }
            AdapterDescriptor::Rust(adapter) => Ok(adapter),
        }
    }

    /// The adapter a scenario's `[adapter]` table asks for.
    pub fn load_section(&self, section: &AdapterSection) -> Result<Arc<dyn ProtocolAdapter>> {
        let builtin = match section.builtin.as_deref() {
            Some(name) => names::builtin_by_name(name)?,
            None => self.default_builtin,
        };
        self.load(AdapterDescriptor::BuiltIn(
            builtin,
            self.defaults.merged_with(section),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iot_lab_abstract::{AdapterError, ClientId, SendAck};

    #[test]
    fn section_selects_builtin_and_overrides_defaults() {
        let loader = AdapterLoader::builder()
            .default_options(AdapterOptions {
                delay_ms: 3,
                ..Default::default()
            })
            .build()
            .unwrap();
        let section = AdapterSection {
            builtin: Some("flaky".into()),
            error_probability: Some(1.0),
            ..Default::default()
        };
        let adapter = loader.load_section(&section).unwrap();
        assert_eq!(adapter.name(), "flaky");
        adapter.start().unwrap();
        assert!(adapter.send(ClientId(0), b"x").is_err());
    }

    #[test]
    fn empty_section_uses_default_builtin() {
        let loader = AdapterLoader::builder().build().unwrap();
        let adapter = loader.load_section(&AdapterSection::default()).unwrap();
        assert_eq!(adapter.name(), "loopback");

        let loader = AdapterLoader::builder()
            .default_builtin(BuiltinAdapter::Flaky)
            .build()
            .unwrap();
        let adapter = loader.load_section(&AdapterSection::default()).unwrap();
        assert_eq!(adapter.name(), "flaky");
    }

    #[test]
    fn rejects_bad_options_and_names() {
        let err = AdapterLoader::builder()
            .default_options(AdapterOptions {
                loss_probability: 1.5,
                ..Default::default()
            })
            .build()
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("loss_probability"));

        let loader = AdapterLoader::builder().build().unwrap();
        let section = AdapterSection {
            builtin: Some("carrier-pigeon".into()),
            ..Default::default()
        };
        assert!(loader.load_section(&section).is_err());

        let section = AdapterSection {
            builtin: Some("flaky".into()),
            loss_probability: Some(0.7),
            error_probability: Some(0.7),
            ..Default::default()
        };
        assert!(loader.load_section(&section).is_err());
    }

    struct Custom;

    impl ProtocolAdapter for Custom {
        fn name(&self) -> &str {
            "custom"
        }

        fn send(&self, _client: ClientId, _payload: &[u8]) -> Result<SendAck, AdapterError> {
            Ok(SendAck::lost())
        }
    }

    #[test]
    fn rust_descriptor_passes_through() {
        let loader = AdapterLoader::builder().build().unwrap();
        let adapter = loader
            .load(AdapterDescriptor::Rust(Arc::new(Custom)))
            .unwrap();
        assert_eq!(adapter.name(), "custom");
    }
}
