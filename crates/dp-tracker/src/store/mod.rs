//! Durable storage of an [`Arcology`]. Every backend round-trips the whole
//! aggregate losslessly and reports an unknown environment as `NotFound`.

pub mod document;
pub mod file;
pub mod folder;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::arcology::Arcology;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    File,
    Folder,
    Database,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "folder" => Ok(Self::Folder),
            "database" => Ok(Self::Database),
            other => Err(Error::UnsupportedConfiguration(format!(
                "unknown arcology backend: {other}"
            ))),
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Persist a brand-new arcology. Fails if the environment already exists.
    async fn create(&self, arcology: &Arcology) -> Result<()>;

    async fn load(&self, environment: &str) -> Result<Arcology>;

    /// Replace the stored state of `arcology`'s environment.
    async fn save(&self, arcology: &Arcology) -> Result<()>;

    fn kind(&self) -> StoreKind;
}

fn unknown_environment(environment: &str) -> Error {
    Error::NotFound(format!("no arcology for environment {environment}"))
}

pub(crate) fn already_exists(environment: &str) -> Error {
    Error::UnsupportedConfiguration(format!("arcology for environment {environment} already exists"))
}
