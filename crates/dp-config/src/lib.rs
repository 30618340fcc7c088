//! Deployment configuration model and the merge rules that turn many partial
//! configurations into the single one a machine is built from.

pub mod criteria;
pub mod merge;
pub mod package;
pub mod types;

pub use criteria::{CriteriaMatchStrategy, DeploymentAdjustmentMatchCriteria, TypeMatchStrategy};
pub use merge::flatten;
pub use package::{
    ConfigFileOverride, InitializationStrategy, PackageDescription,
    PackageDescriptionWithOverrides, PackagedDeploymentConfiguration, ResolvedPackage,
    SimpleChannel, TypeDescriptor,
};
pub use types::{
    DeploymentConfiguration, DeploymentStrategy, InstanceAccessibility, InstanceType,
    PostDeploymentStrategy, Volume, VolumeType, WindowsSku,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Merge inputs that no rule can reconcile.
    #[error("configuration conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, Error>;
