use std::path::Path;

use async_trait::async_trait;
use dp_config::{
    ConfigFileOverride, DeploymentConfiguration, InitializationStrategy,
    PackageDescriptionWithOverrides, PackagedDeploymentConfiguration, SimpleChannel,
    TypeMatchStrategy,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tokens::substitute_channel_name;
use crate::{AdjustmentContext, DeploymentAdjuster, InjectedPackage, Result, config_files};

pub const REASON: &str = "Found a message bus initialization strategy.";
pub const SETTINGS_OVERRIDE_NAME: &str = "MessageBusHarnessSettings";

const POLLING_INTERVAL_SECS: u64 = 60;
const DISPATCHER_WAIT_SLEEP_MS: u64 = 500;

/// The harness package and the settings it runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBusHarnessConfiguration {
    pub package: PackageDescriptionWithOverrides,
    /// The harness process is recycled after this long.
    pub handler_harness_process_time_to_live_secs: u64,
    #[serde(default)]
    pub log_processor_settings: serde_json::Value,
    #[serde(default)]
    pub persistence_connection_configuration: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorRoleSettings {
    pub channels_to_monitor: Vec<SimpleChannel>,
    pub handler_assembly_path: String,
    pub worker_count: i32,
    pub polling_interval_secs: u64,
    pub type_match_strategy: TypeMatchStrategy,
    pub message_dispatcher_wait_thread_sleep_ms: u64,
    pub retry_count: u32,
    pub harness_process_time_to_live_secs: u64,
}

/// Stamped into the harness package as [`SETTINGS_OVERRIDE_NAME`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBusHarnessSettings {
    pub connection_configuration: serde_json::Value,
    pub role_settings: Vec<ExecutorRoleSettings>,
    pub log_processor_settings: serde_json::Value,
}

/// Deploys one message-bus harness next to packages that contain handlers.
pub struct MessageBusHarnessAdder {
    harness: MessageBusHarnessConfiguration,
}

impl MessageBusHarnessAdder {
    pub fn new(harness: MessageBusHarnessConfiguration) -> Self {
        Self { harness }
    }

    /// Overrides shipped with a handler package plus its configuration files
    /// for every folder in the precedence chain.
    async fn handler_overrides(
        &self,
        ctx: &AdjustmentContext<'_>,
        handler: &PackagedDeploymentConfiguration,
    ) -> Result<Vec<ConfigFileOverride>> {
        let mut overrides = handler.item_to_config_overrides.clone();

        let description = &handler.package.description;
        let package_folder = format!(
            "{}.{}",
            description.id,
            description.version.as_deref().unwrap_or_default()
        );

        let chain = std::iter::once(ctx.environment)
            .chain(ctx.config_precedence_after_environment.iter().map(String::as_str));
        for element in chain {
            let prefix = if handler.package.are_dependencies_bundled {
                format!("{package_folder}/Configuration/.config/{element}/")
            } else {
                format!(".config/{element}/")
            };
            let files = ctx.resolver.file_contents(&handler.package, &prefix).await?;
            debug!(package = %description.id, prefix = %prefix, files = files.len(), "harness: config files");

            for (path, contents) in files {
                let stem = Path::new(&path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or(path);
                overrides.push(ConfigFileOverride::new(stem, contents));
            }
        }
        Ok(overrides)
    }

    fn settings(
        &self,
        ctx: &AdjustmentContext<'_>,
        handlers: &[&PackagedDeploymentConfiguration],
    ) -> MessageBusHarnessSettings {
        let mut channels: Vec<&SimpleChannel> = Vec::new();
        let mut worker_count = 0;
        for strategy in handlers.iter().flat_map(|h| &h.initialization_strategies) {
            if let InitializationStrategy::MessageBusHandler {
                channels_to_monitor,
                worker_count: count,
            } = strategy
            {
                worker_count = worker_count.max(*count);
                for channel in channels_to_monitor {
                    if !channels.contains(&channel) {
                        channels.push(channel);
                    }
                }
            }
        }

        let channels_to_monitor = channels
            .into_iter()
            .map(|c| {
                SimpleChannel::new(substitute_channel_name(
                    &c.name,
                    ctx.environment,
                    ctx.instance_name,
                    ctx.instance_number,
                ))
            })
            .collect();

        MessageBusHarnessSettings {
            connection_configuration: self.harness.persistence_connection_configuration.clone(),
            role_settings: vec![ExecutorRoleSettings {
                channels_to_monitor,
                handler_assembly_path: ctx.root_deployment_path.to_string(),
                worker_count: worker_count.max(1),
                polling_interval_secs: POLLING_INTERVAL_SECS,
                type_match_strategy: TypeMatchStrategy::NamespaceAndName,
                message_dispatcher_wait_thread_sleep_ms: DISPATCHER_WAIT_SLEEP_MS,
                retry_count: 0,
                harness_process_time_to_live_secs: self
                    .harness
                    .handler_harness_process_time_to_live_secs,
            }],
            log_processor_settings: self.harness.log_processor_settings.clone(),
        }
    }
}

#[async_trait]
impl DeploymentAdjuster for MessageBusHarnessAdder {
    fn name(&self) -> &str {
        "message-bus-harness"
    }

    fn is_match(
        &self,
        candidates: &[PackagedDeploymentConfiguration],
        _config: &DeploymentConfiguration,
    ) -> bool {
        let has_handlers = candidates.iter().any(|c| c.has_message_bus_handler());
        let harness_present = candidates
            .iter()
            .any(|c| c.id() == self.harness.package.package.id);
        has_handlers && !harness_present
    }

    async fn additional_packages(
        &self,
        ctx: &AdjustmentContext<'_>,
        candidates: &[PackagedDeploymentConfiguration],
        config: &DeploymentConfiguration,
    ) -> Result<Vec<InjectedPackage>> {
        let handlers: Vec<&PackagedDeploymentConfiguration> = candidates
            .iter()
            .filter(|c| c.has_message_bus_handler())
            .collect();

        let mut overrides = Vec::new();
        for handler in &handlers {
            overrides.extend(self.handler_overrides(ctx, handler).await?);
        }
        overrides.extend(self.harness.package.item_to_config_overrides.iter().cloned());

        let settings = self.settings(ctx, &handlers);
        overrides.push(config_files::to_override(SETTINGS_OVERRIDE_NAME, &settings)?);

        let package = ctx
            .resolver
            .resolve(&self.harness.package.package, false)
            .await?;

        let packaged = PackagedDeploymentConfiguration {
            package,
            deployment_configuration: config.clone(),
            initialization_strategies: self.harness.package.initialization_strategies.clone(),
            item_to_config_overrides: overrides,
        };
        info!(
            package = %packaged.id(),
            handlers = handlers.len(),
            environment = %ctx.environment,
            instance = %ctx.instance_name,
            "harness: injecting message bus harness"
        );

        Ok(vec![InjectedPackage {
            reason: REASON.into(),
            packaged,
        }])
    }
}
