use async_trait::async_trait;
use dp_config::{
    DeploymentAdjustmentMatchCriteria, DeploymentConfiguration, PackageDescriptionWithOverrides,
    PackagedDeploymentConfiguration, TypeDescriptor,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::resolver::package_for;
use crate::{AdjustmentContext, DeploymentAdjuster, InjectedPackage, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddPackageSettings {
    pub name: String,
    pub criteria: Vec<DeploymentAdjustmentMatchCriteria>,
    pub packages_to_inject: Vec<PackageDescriptionWithOverrides>,
    #[serde(default)]
    pub bundle_dependencies: bool,
}

/// Adds a fixed set of packages whenever any configured criterion matches.
pub struct AddPackageAdjuster {
    settings: AddPackageSettings,
}

impl AddPackageAdjuster {
    pub fn new(settings: AddPackageSettings) -> Self {
        Self { settings }
    }

    fn matched_criteria(
        &self,
        candidates: &[PackagedDeploymentConfiguration],
        config: &DeploymentConfiguration,
    ) -> Vec<&DeploymentAdjustmentMatchCriteria> {
        let sku = config.windows_sku();
        let strategy_types: Vec<TypeDescriptor> = candidates
            .iter()
            .flat_map(PackagedDeploymentConfiguration::strategy_types)
            .collect();

        self.settings
            .criteria
            .iter()
            .filter(|c| c.matches(sku, &strategy_types))
            .collect()
    }
}

#[async_trait]
impl DeploymentAdjuster for AddPackageAdjuster {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn is_match(
        &self,
        candidates: &[PackagedDeploymentConfiguration],
        config: &DeploymentConfiguration,
    ) -> bool {
        !self.matched_criteria(candidates, config).is_empty()
    }

    async fn additional_packages(
        &self,
        ctx: &AdjustmentContext<'_>,
        candidates: &[PackagedDeploymentConfiguration],
        config: &DeploymentConfiguration,
    ) -> Result<Vec<InjectedPackage>> {
        let reason = self
            .matched_criteria(candidates, config)
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut injected = Vec::with_capacity(self.settings.packages_to_inject.len());
        for request in &self.settings.packages_to_inject {
            let deployment_configuration = match &request.deployment_configuration {
                Some(overrides) => config.apply_overrides(overrides),
                None => config.clone(),
            };
            let packaged = package_for(
                ctx.resolver,
                request,
                deployment_configuration,
                self.settings.bundle_dependencies,
            )
            .await?;
            info!(
                adjuster = %self.settings.name,
                package = %packaged.id(),
                reason = %reason,
                "adjust: injecting package"
            );
            injected.push(InjectedPackage {
                reason: reason.clone(),
                packaged,
            });
        }
        Ok(injected)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::resolver::PackageCatalog;
    use crate::testing::{context, packaged};
    use dp_config::{
        CriteriaMatchStrategy, InitializationStrategy, InstanceType, PackageDescription,
        TypeMatchStrategy, WindowsSku,
    };

    fn criteria(name: &str, skus: Vec<WindowsSku>, kinds: &[&str]) -> DeploymentAdjustmentMatchCriteria {
        DeploymentAdjustmentMatchCriteria {
            name: name.into(),
            skus_to_match: skus,
            initialization_strategies_to_match: kinds
                .iter()
                .map(|k| InitializationStrategy::descriptor_for(k))
                .collect(),
            type_match_strategy: TypeMatchStrategy::NamespaceAndName,
            match_strategy: CriteriaMatchStrategy::MatchAny,
        }
    }

    fn adjuster() -> AddPackageAdjuster {
        AddPackageAdjuster::new(AddPackageSettings {
            name: "monitoring".into(),
            criteria: vec![
                criteria("sql-boxes", vec![WindowsSku::SqlStandard], &[]),
                criteria("web-boxes", vec![], &["Web"]),
            ],
            packages_to_inject: vec![PackageDescriptionWithOverrides::new(PackageDescription::new(
                "Ops.Monitor",
            ))],
            bundle_dependencies: false,
        })
    }

    fn sql_config() -> DeploymentConfiguration {
        DeploymentConfiguration {
            instance_type: Some(InstanceType {
                windows_sku: WindowsSku::SqlStandard,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn injects_with_comma_joined_criteria_names() {
        let mut catalog = PackageCatalog::new();
        catalog.insert("Ops.Monitor", "1.0.0", None, BTreeMap::new());
        let precedence = Vec::new();
        let ctx = context(&catalog, &precedence);

        let web = packaged(
            "Shop.Web",
            vec![InitializationStrategy::Web {
                primary_dns: "shop.example.com".into(),
                ssl_certificate_name: None,
                host_header_for_http_binding: None,
            }],
        );
        let candidates = [web];
        let adjuster = adjuster();
        assert!(adjuster.is_match(&candidates, &sql_config()));

        let injected = adjuster
            .additional_packages(&ctx, &candidates, &sql_config())
            .await
            .unwrap();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].reason, "sql-boxes,web-boxes");
        assert_eq!(injected[0].packaged.id(), "Ops.Monitor");
        assert_eq!(
            injected[0].packaged.package.description.version.as_deref(),
            Some("1.0.0")
        );
        assert_eq!(injected[0].packaged.deployment_configuration, sql_config());
    }

    #[test]
    fn no_matching_criteria_means_no_match() {
        let candidates = [packaged("Shop.Worker", vec![])];
        assert!(!adjuster().is_match(&candidates, &DeploymentConfiguration::default()));
    }
}
