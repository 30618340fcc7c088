//! Turns a deployment request into per-machine plans: merged configuration,
//! adjusted package list, and reserved creation details.

pub mod planner;
pub mod settings;

pub use planner::{DeploymentPlan, DeploymentPlanner, DeploymentRequest, InstancePlan};
pub use settings::{EnvironmentSettings, PlannerSettings};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] dp_config::Error),

    #[error(transparent)]
    Tracker(#[from] dp_tracker::Error),

    #[error(transparent)]
    Adjust(#[from] dp_adjust::Error),

    #[error("no planner settings for environment {0}")]
    UnknownEnvironment(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid planner settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("missing env var: {0}")]
    MissingEnv(String),
}

pub type Result<T> = std::result::Result<T, Error>;
