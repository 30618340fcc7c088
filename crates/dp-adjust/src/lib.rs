//! Rules that look at what is about to be deployed onto a machine and add
//! packages to it.

pub mod add_package;
pub mod config_files;
pub mod harness;
pub mod pipeline;
pub mod resolver;
pub mod tokens;

use std::sync::Arc;

use async_trait::async_trait;
use dp_config::{DeploymentConfiguration, PackagedDeploymentConfiguration};
use serde::{Deserialize, Serialize};

pub use add_package::AddPackageAdjuster;
pub use harness::{MessageBusHarnessAdder, MessageBusHarnessConfiguration};
pub use pipeline::{AdjustmentOutcome, AdjustmentPipeline};
pub use resolver::PackageResolver;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("package resolution failed: {0}")]
    Resolver(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] dp_config::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A package an adjuster added, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedPackage {
    pub reason: String,
    pub packaged: PackagedDeploymentConfiguration,
}

/// Per-instance facts an adjuster may need while building packages.
pub struct AdjustmentContext<'a> {
    pub environment: &'a str,
    pub instance_name: &'a str,
    pub instance_number: u32,
    pub resolver: &'a dyn PackageResolver,
    /// Configuration folders consulted after the environment's own.
    pub config_precedence_after_environment: &'a [String],
    pub root_deployment_path: &'a str,
}

#[async_trait]
pub trait DeploymentAdjuster: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn is_match(
        &self,
        candidates: &[PackagedDeploymentConfiguration],
        config: &DeploymentConfiguration,
    ) -> bool;

    /// Packages to add. Only called after [`DeploymentAdjuster::is_match`]
    /// returned true for the same candidates.
    async fn additional_packages(
        &self,
        ctx: &AdjustmentContext<'_>,
        candidates: &[PackagedDeploymentConfiguration],
        config: &DeploymentConfiguration,
    ) -> Result<Vec<InjectedPackage>>;
}

/// Serializable description of one configured adjuster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdjusterConfig {
    AddPackage(add_package::AddPackageSettings),
    MessageBusHarness(MessageBusHarnessConfiguration),
}

impl AdjusterConfig {
    pub fn build(&self) -> Arc<dyn DeploymentAdjuster> {
        match self {
            Self::AddPackage(settings) => Arc::new(AddPackageAdjuster::new(settings.clone())),
            Self::MessageBusHarness(harness) => {
                Arc::new(MessageBusHarnessAdder::new(harness.clone()))
            }
        }
    }
}
