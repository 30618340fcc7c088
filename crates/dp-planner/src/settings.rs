use std::collections::BTreeMap;
use std::path::Path;

use dp_adjust::AdjusterConfig;
use dp_config::DeploymentConfiguration;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

const DEFAULT_MAX_SETUP_STEP_ATTEMPTS: u32 = 3;

/// What every machine in an environment gets unless a package asks for more,
/// and what it gets no matter what was asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    #[serde(default)]
    pub defaults: DeploymentConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<DeploymentConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentSettings>,
    /// Configuration folders read after the environment's own, in order.
    #[serde(default)]
    pub config_precedence_after_environment: Vec<String>,
    /// Where packages are unpacked on the machine.
    pub root_deployment_path: String,
    /// Attempt budget handed to whatever executes setup steps.
    #[serde(default = "default_max_setup_step_attempts")]
    pub max_setup_step_attempts: u32,
    /// Applied in order.
    #[serde(default)]
    pub adjusters: Vec<AdjusterConfig>,
}

fn default_max_setup_step_attempts() -> u32 {
    DEFAULT_MAX_SETUP_STEP_ATTEMPTS
}

impl PlannerSettings {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let settings: Self = serde_json::from_str(&json)?;
        info!(
            path = %path.display(),
            environments = settings.environments.len(),
            adjusters = settings.adjusters.len(),
            "planner: settings loaded"
        );
        Ok(settings)
    }

    /// Load from the file named by `PLANNER_SETTINGS_PATH`.
    pub async fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var("PLANNER_SETTINGS_PATH")
            .map_err(|_| Error::MissingEnv("PLANNER_SETTINGS_PATH".into()))?;
        Self::load(path).await
    }

    pub fn environment(&self, environment: &str) -> Result<&EnvironmentSettings> {
        self.environments
            .get(environment)
            .ok_or_else(|| Error::UnknownEnvironment(environment.to_string()))
    }
}
