use serde::{Deserialize, Serialize};

use crate::types::DeploymentConfiguration;

/// Package identity. Two descriptions refer to the same package when their
/// ids are equal; the version is informational.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageDescription {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PackageDescription {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn same_id(&self, other: &PackageDescription) -> bool {
        self.id == other.id
    }
}

/// Structural identity of an initialization-strategy kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl TypeDescriptor {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleChannel {
    pub name: String,
}

impl SimpleChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// How a package gets wired up on the machine once its files are on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InitializationStrategy {
    Web {
        primary_dns: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssl_certificate_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_header_for_http_binding: Option<String>,
    },
    SqlServer {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_directory: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        administrator_password: Option<String>,
    },
    Mongo {
        database_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_directory: Option<String>,
        #[serde(default)]
        no_journaling: bool,
    },
    MessageBusHandler {
        channels_to_monitor: Vec<SimpleChannel>,
        #[serde(default)]
        worker_count: i32,
    },
    SelfHost {
        self_hosted_exe_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheduled_task_account: Option<String>,
    },
    CertificateToInstall {
        certificate_to_install: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_to_grant_private_key_access: Option<String>,
    },
    DirectoryToCreate {
        full_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_control_account: Option<String>,
    },
    Console {
        exe_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
    PrivateDnsEntry {
        private_dns_entry: String,
    },
    ScheduledTask {
        name: String,
        exe_name: String,
        schedule: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
}

impl InitializationStrategy {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Web { .. } => "Web",
            Self::SqlServer { .. } => "SqlServer",
            Self::Mongo { .. } => "Mongo",
            Self::MessageBusHandler { .. } => "MessageBusHandler",
            Self::SelfHost { .. } => "SelfHost",
            Self::CertificateToInstall { .. } => "CertificateToInstall",
            Self::DirectoryToCreate { .. } => "DirectoryToCreate",
            Self::Console { .. } => "Console",
            Self::PrivateDnsEntry { .. } => "PrivateDnsEntry",
            Self::ScheduledTask { .. } => "ScheduledTask",
        }
    }

    pub fn type_descriptor(&self) -> TypeDescriptor {
        Self::descriptor_for(self.kind_name())
    }

    /// Descriptor this build assigns to the strategy kind called `kind_name`.
    pub fn descriptor_for(kind_name: &str) -> TypeDescriptor {
        TypeDescriptor::new(module_path!(), kind_name, env!("CARGO_PKG_VERSION"))
    }

    pub fn is_message_bus_handler(&self) -> bool {
        matches!(self, Self::MessageBusHandler { .. })
    }
}

/// A JSON document to stamp into a package's configuration at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileOverride {
    pub file_name_without_extension: String,
    pub file_contents_json: String,
}

impl ConfigFileOverride {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            file_name_without_extension: name.into(),
            file_contents_json: contents.into(),
        }
    }
}

/// A package as it is requested for deployment, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptionWithOverrides {
    pub package: PackageDescription,
    #[serde(default)]
    pub initialization_strategies: Vec<InitializationStrategy>,
    #[serde(default)]
    pub item_to_config_overrides: Vec<ConfigFileOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
}

impl PackageDescriptionWithOverrides {
    pub fn new(package: PackageDescription) -> Self {
        Self {
            package,
            initialization_strategies: Vec::new(),
            item_to_config_overrides: Vec::new(),
            deployment_configuration: None,
        }
    }
}

/// Output of package resolution: a concrete version plus the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub description: PackageDescription,
    pub are_dependencies_bundled: bool,
    /// Configuration shipped inside the package, used as its defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

/// Everything needed to deploy one package onto one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagedDeploymentConfiguration {
    pub package: ResolvedPackage,
    pub deployment_configuration: DeploymentConfiguration,
    #[serde(default)]
    pub initialization_strategies: Vec<InitializationStrategy>,
    #[serde(default)]
    pub item_to_config_overrides: Vec<ConfigFileOverride>,
}

impl PackagedDeploymentConfiguration {
    pub fn id(&self) -> &str {
        &self.package.description.id
    }

    pub fn strategy_types(&self) -> impl Iterator<Item = TypeDescriptor> + '_ {
        self.initialization_strategies
            .iter()
            .map(InitializationStrategy::type_descriptor)
    }

    pub fn has_message_bus_handler(&self) -> bool {
        self.initialization_strategies
            .iter()
            .any(InitializationStrategy::is_message_bus_handler)
    }
}
