use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{StateStore, StoreKind, already_exists, unknown_environment};
use crate::Result;
use crate::arcology::Arcology;

/// One environment's arcology serialized as a single JSON document.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<Option<Arcology>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, arcology: &Arcology) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_string_pretty(arcology)?).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), "file store: saved");
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn create(&self, arcology: &Arcology) -> Result<()> {
        if self.read().await?.is_some() {
            return Err(already_exists(arcology.environment()));
        }
        self.write(arcology).await
    }

    async fn load(&self, environment: &str) -> Result<Arcology> {
        match self.read().await? {
            Some(arcology) if arcology.environment() == environment => Ok(arcology),
            _ => Err(unknown_environment(environment)),
        }
    }

    async fn save(&self, arcology: &Arcology) -> Result<()> {
        self.load(arcology.environment()).await?;
        self.write(arcology).await
    }

    fn kind(&self) -> StoreKind {
        StoreKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn behaves_like_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("dev.arcology.json"));
        conformance::round_trips_full_lifecycle(&store).await;
    }
}
