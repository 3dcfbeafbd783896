//! Launcher configuration

use anyhow::{bail, Context, Result};
use checkup_lib::{CheckupSettings, ObjectKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const CONFIGMAP_NAMESPACE_ENV: &str = "CONFIGMAP_NAMESPACE";
pub const CONFIGMAP_NAME_ENV: &str = "CONFIGMAP_NAME";

/// Launcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LauncherSettings {
    /// Namespace of the checkup record
    #[serde(default)]
    pub configmap_namespace: Option<String>,

    /// Name of the checkup record
    #[serde(default)]
    pub configmap_name: Option<String>,

    /// Bound for each disposal wait during teardown, in seconds
    #[serde(default = "default_teardown_timeout")]
    pub checkup_teardown_timeout_secs: u64,

    /// Interval between cluster lookups while waiting, in seconds
    #[serde(default = "default_poll_interval")]
    pub checkup_poll_interval_secs: u64,
}

fn default_teardown_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    5
}

impl LauncherSettings {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    /// Load configuration from an explicit set of variables
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_environment(config::Environment::default().source(Some(vars)))
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment)
            .build()
            .context("failed to read launcher environment")?;

        let settings: LauncherSettings = config
            .try_deserialize()
            .context("invalid launcher environment")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            (CONFIGMAP_NAMESPACE_ENV, &self.configmap_namespace),
            (CONFIGMAP_NAME_ENV, &self.configmap_name),
        ];
        for (var, value) in required {
            if value.as_deref().map_or(true, str::is_empty) {
                bail!("missing required environment variable {:?}", var);
            }
        }
        if self.checkup_poll_interval_secs == 0 {
            bail!("CHECKUP_POLL_INTERVAL_SECS must be positive");
        }
        Ok(())
    }

    /// Location of the checkup record
    pub fn record_key(&self) -> ObjectKey {
        ObjectKey::namespaced(
            self.configmap_namespace.clone().unwrap_or_default(),
            self.configmap_name.clone().unwrap_or_default(),
        )
    }

    pub fn checkup_settings(&self) -> CheckupSettings {
        CheckupSettings {
            poll_interval: Duration::from_secs(self.checkup_poll_interval_secs),
            teardown_timeout: Duration::from_secs(self.checkup_teardown_timeout_secs),
            ..Default::default()
        }
    }
}
