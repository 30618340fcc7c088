use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use dp_config::{
    DeploymentConfiguration, PackageDescription, PackageDescriptionWithOverrides,
    PackagedDeploymentConfiguration, ResolvedPackage,
};

use crate::{Error, Result};

/// Turns package descriptions into downloadable artifacts.
#[async_trait]
pub trait PackageResolver: Send + Sync + 'static {
    /// Resolve `package` to a concrete version, optionally bundling its
    /// dependencies into the artifact.
    async fn resolve(
        &self,
        package: &PackageDescription,
        bundle_dependencies: bool,
    ) -> Result<ResolvedPackage>;

    /// Text files inside the artifact whose path starts with `path_prefix`,
    /// keyed by full path.
    async fn file_contents(
        &self,
        package: &ResolvedPackage,
        path_prefix: &str,
    ) -> Result<BTreeMap<String, String>>;
}

/// Resolve a requested package and attach the configuration it will be
/// deployed with.
pub async fn package_for(
    resolver: &dyn PackageResolver,
    request: &PackageDescriptionWithOverrides,
    deployment_configuration: DeploymentConfiguration,
    bundle_dependencies: bool,
) -> Result<PackagedDeploymentConfiguration> {
    let package = resolver
        .resolve(&request.package, bundle_dependencies)
        .await?;
    Ok(PackagedDeploymentConfiguration {
        package,
        deployment_configuration,
        initialization_strategies: request.initialization_strategies.clone(),
        item_to_config_overrides: request.item_to_config_overrides.clone(),
    })
}

struct CatalogEntry {
    package: ResolvedPackage,
    files: BTreeMap<String, String>,
}

/// Resolver over a fixed set of already-fetched packages.
#[derive(Default)]
pub struct PackageCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl PackageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package. `version` is what resolution reports.
    pub fn insert(
        &mut self,
        id: &str,
        version: &str,
        deployment_configuration: Option<DeploymentConfiguration>,
        files: BTreeMap<String, String>,
    ) {
        self.entries.insert(
            id.to_string(),
            CatalogEntry {
                package: ResolvedPackage {
                    description: PackageDescription::new(id).with_version(version),
                    are_dependencies_bundled: false,
                    deployment_configuration,
                    payload: Vec::new(),
                },
                files,
            },
        );
    }
}

#[async_trait]
impl PackageResolver for PackageCatalog {
    async fn resolve(
        &self,
        package: &PackageDescription,
        bundle_dependencies: bool,
    ) -> Result<ResolvedPackage> {
        let entry = self
            .entries
            .get(&package.id)
            .ok_or_else(|| Error::Resolver(format!("unknown package {}", package.id)))?;
        if let Some(wanted) = &package.version
            && entry.package.description.version.as_deref() != Some(wanted.as_str())
        {
            return Err(Error::Resolver(format!(
                "package {} has no version {wanted}",
                package.id
            )));
        }

        Ok(ResolvedPackage {
            are_dependencies_bundled: bundle_dependencies,
            ..entry.package.clone()
        })
    }

    async fn file_contents(
        &self,
        package: &ResolvedPackage,
        path_prefix: &str,
    ) -> Result<BTreeMap<String, String>> {
        let entry = self
            .entries
            .get(&package.description.id)
            .ok_or_else(|| Error::Resolver(format!("unknown package {}", package.description.id)))?;
        Ok(entry
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(path_prefix))
            .map(|(path, contents)| (path.clone(), contents.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_resolves_versions_and_files() {
        let mut catalog = PackageCatalog::new();
        catalog.insert(
            "Shop.Web",
            "2.1.0",
            None,
            BTreeMap::from([
                (".config/prod/Database.json".to_string(), "{}".to_string()),
                ("bin/Shop.Web.dll".to_string(), String::new()),
            ]),
        );

        let resolved = catalog
            .resolve(&PackageDescription::new("Shop.Web"), true)
            .await
            .unwrap();
        assert_eq!(resolved.description.version.as_deref(), Some("2.1.0"));
        assert!(resolved.are_dependencies_bundled);

        let files = catalog.file_contents(&resolved, ".config/prod/").await.unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), [".config/prod/Database.json"]);

        assert!(catalog
            .resolve(&PackageDescription::new("Shop.Web").with_version("9.9.9"), false)
            .await
            .is_err());
        assert!(catalog.resolve(&PackageDescription::new("Missing"), false).await.is_err());
    }
}
