//! Computing infrastructure tracking: which machines exist in an environment,
//! how they were reserved, and what has been deployed onto them.

pub mod arcology;
pub mod certs;
pub mod config;
pub mod migrate;
pub mod store;
pub mod tracker;

pub use arcology::{
    Arcology, ArcologyInfo, ComputingContainer, ContainerDetails, DeployedInstance,
    ImageDetails, InstanceCreationDetails, InstanceDescription, PackageDeploymentStatus,
    PackageDescriptionWithDeploymentStatus,
};
pub use config::{StoreKind, TrackerConfig, build_stores, build_tracker};
pub use migrate::{MigrationReport, migrate_arcology};
pub use store::StateStore;
pub use tracker::InfrastructureTracker;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cloud side reported something the ledger never reserved.
    #[error("allocation consistency error: {0}")]
    AllocationConsistency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("encryption certificate not found: {0}")]
    EncryptionCertificateNotFound(String),

    #[error("no free private ip address left in {0}")]
    AddressSpaceExhausted(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("missing env var: {0}")]
    MissingEnv(String),
}

pub type Result<T> = std::result::Result<T, Error>;
