use std::sync::Arc;

use dp_adjust::{AdjustmentContext, AdjustmentPipeline, InjectedPackage, PackageResolver};
use dp_config::{
    DeploymentConfiguration, PackageDescription, PackageDescriptionWithOverrides,
    PackagedDeploymentConfiguration, flatten,
};
use dp_tracker::{InfrastructureTracker, InstanceCreationDetails};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;
use crate::settings::PlannerSettings;

/// Packages to put onto one or more identical machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub environment: String,
    pub instance_name: String,
    #[serde(default)]
    pub packages: Vec<PackageDescriptionWithOverrides>,
    #[serde(default)]
    pub bundle_dependencies: bool,
}

/// One machine: how to create it and what to put on it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePlan {
    pub instance_number: u32,
    pub name: String,
    pub deployment_configuration: DeploymentConfiguration,
    pub creation_details: InstanceCreationDetails,
    /// Requested packages first, then injected ones.
    pub packages: Vec<PackagedDeploymentConfiguration>,
    pub injected: Vec<InjectedPackage>,
    pub max_setup_step_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    pub environment: String,
    pub instances: Vec<InstancePlan>,
}

pub struct DeploymentPlanner {
    tracker: Arc<InfrastructureTracker>,
    resolver: Arc<dyn PackageResolver>,
    pipeline: AdjustmentPipeline,
    settings: PlannerSettings,
}

impl DeploymentPlanner {
    /// Adjusters are built from `settings.adjusters`.
    pub fn new(
        tracker: Arc<InfrastructureTracker>,
        resolver: Arc<dyn PackageResolver>,
        settings: PlannerSettings,
    ) -> Self {
        let pipeline = AdjustmentPipeline::from_config(&settings.adjusters);
        Self {
            tracker,
            resolver,
            pipeline,
            settings,
        }
    }

    pub fn with_pipeline(mut self, pipeline: AdjustmentPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn tracker(&self) -> &Arc<InfrastructureTracker> {
        &self.tracker
    }

    /// Resolve every requested package and work out the single configuration
    /// the machines will be created with.
    pub async fn configuration_for(
        &self,
        request: &DeploymentRequest,
    ) -> Result<(Vec<PackagedDeploymentConfiguration>, DeploymentConfiguration)> {
        let environment = self.settings.environment(&request.environment)?;

        let mut packages = Vec::with_capacity(request.packages.len());
        for requested in &request.packages {
            let package = self
                .resolver
                .resolve(&requested.package, request.bundle_dependencies)
                .await?;
            let shipped = package.deployment_configuration.clone().unwrap_or_default();
            let deployment_configuration = match &requested.deployment_configuration {
                Some(overrides) => shipped.apply_overrides(overrides),
                None => shipped,
            };
            packages.push(PackagedDeploymentConfiguration {
                package,
                deployment_configuration,
                initialization_strategies: requested.initialization_strategies.clone(),
                item_to_config_overrides: requested.item_to_config_overrides.clone(),
            });
        }

        let configs: Vec<DeploymentConfiguration> = packages
            .iter()
            .map(|p| p.deployment_configuration.clone())
            .collect();
        let mut config = flatten(&configs)?.apply_defaults(&environment.defaults);
        if let Some(overrides) = &environment.overrides {
            config = config.apply_overrides(overrides);
        }
        debug!(
            environment = %request.environment,
            packages = packages.len(),
            instance_count = config.instance_count,
            "planner: configuration resolved"
        );

        Ok((packages, config))
    }

    /// Plan every machine the request needs, reserving each with the
    /// tracker. Nothing is rolled back if a later reservation fails.
    pub async fn plan(&self, request: &DeploymentRequest) -> Result<DeploymentPlan> {
        let (packages, config) = self.configuration_for(request).await?;
        let count = u32::try_from(config.instance_count.max(1)).unwrap_or(1);

        let mut instances = Vec::new();
        for instance_number in 0..count {
            let name = if count == 1 {
                request.instance_name.clone()
            } else {
                format!("{}-{instance_number}", request.instance_name)
            };

            let ctx = AdjustmentContext {
                environment: &request.environment,
                instance_name: &name,
                instance_number,
                resolver: self.resolver.as_ref(),
                config_precedence_after_environment: &self
                    .settings
                    .config_precedence_after_environment,
                root_deployment_path: &self.settings.root_deployment_path,
            };
            let outcome = self.pipeline.run(&ctx, packages.clone(), &config).await?;

            let intended: Vec<PackageDescription> = outcome
                .packages
                .iter()
                .map(|p| p.package.description.clone())
                .collect();
            let creation_details = self
                .tracker
                .get_new_instance_creation_details(&request.environment, &config, &intended)
                .await?;

            info!(
                environment = %request.environment,
                instance = %name,
                private_ip = %creation_details.private_ip_address,
                packages = outcome.packages.len(),
                injected = outcome.injected.len(),
                "planner: instance planned"
            );
            instances.push(InstancePlan {
                instance_number,
                name,
                deployment_configuration: config.clone(),
                creation_details,
                packages: outcome.packages,
                injected: outcome.injected,
                max_setup_step_attempts: self.settings.max_setup_step_attempts,
            });
        }

        Ok(DeploymentPlan {
            environment: request.environment.clone(),
            instances,
        })
    }
}
