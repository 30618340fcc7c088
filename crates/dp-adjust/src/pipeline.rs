use std::sync::Arc;

use dp_config::{DeploymentConfiguration, PackagedDeploymentConfiguration};
use tracing::{debug, info};

use crate::{AdjusterConfig, AdjustmentContext, DeploymentAdjuster, InjectedPackage, Result};

/// Packages to deploy after every adjuster has had its turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentOutcome {
    /// Requested packages followed by injected ones, in injection order.
    pub packages: Vec<PackagedDeploymentConfiguration>,
    pub injected: Vec<InjectedPackage>,
}

/// Runs adjusters in their configured order. Each adjuster sees the packages
/// injected by the ones before it, never its own.
#[derive(Clone, Default)]
pub struct AdjustmentPipeline {
    adjusters: Vec<Arc<dyn DeploymentAdjuster>>,
}

impl AdjustmentPipeline {
    pub fn new(adjusters: Vec<Arc<dyn DeploymentAdjuster>>) -> Self {
        Self { adjusters }
    }

    pub fn from_config(configs: &[AdjusterConfig]) -> Self {
        let adjusters = configs
            .iter()
            .map(|config| {
                let adjuster = config.build();
                info!(adjuster = %adjuster.name(), "adjust: registered adjuster");
                adjuster
            })
            .collect();
        Self { adjusters }
    }

    pub fn len(&self) -> usize {
        self.adjusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjusters.is_empty()
    }

    pub async fn run(
        &self,
        ctx: &AdjustmentContext<'_>,
        packages: Vec<PackagedDeploymentConfiguration>,
        config: &DeploymentConfiguration,
    ) -> Result<AdjustmentOutcome> {
        let mut candidates = packages;
        let mut injected = Vec::new();

        for adjuster in &self.adjusters {
            if !adjuster.is_match(&candidates, config) {
                debug!(adjuster = %adjuster.name(), "adjust: no match");
                continue;
            }

            let added = adjuster
                .additional_packages(ctx, &candidates, config)
                .await?;
            info!(
                adjuster = %adjuster.name(),
                added = added.len(),
                environment = %ctx.environment,
                instance = %ctx.instance_name,
                "adjust: adjuster matched"
            );
            candidates.extend(added.iter().map(|i| i.packaged.clone()));
            injected.extend(added);
        }

        Ok(AdjustmentOutcome {
            packages: candidates,
            injected,
        })
    }
}
