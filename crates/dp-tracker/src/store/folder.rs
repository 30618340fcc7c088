use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{StateStore, StoreKind, already_exists, unknown_environment};
use crate::Result;
use crate::arcology::{Arcology, ArcologyInfo, DeployedInstance};

const INFO_FILE_NAME: &str = "ArcologyInfo.json";
const INSTANCE_PREFIX: &str = "Instance--";
const IP_INFIX: &str = "ip--";

#[derive(Serialize, Deserialize)]
struct InstanceFile {
    sequence: usize,
    #[serde(flatten)]
    instance: DeployedInstance,
}

/// `<root>/<environment>/` holding `ArcologyInfo.json` and one file per
/// instance: `Instance--ip--<privateIp>.json` until the instance has a name,
/// `Instance--<name>.json` after.
pub struct FolderStateStore {
    root: PathBuf,
}

impl FolderStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn environment_folder(&self, environment: &str) -> PathBuf {
        self.root.join(environment)
    }

    fn instance_file_name(instance: &DeployedInstance) -> String {
        match &instance.instance_description.name {
            Some(name) => format!("{INSTANCE_PREFIX}{name}.json"),
            None => format!(
                "{INSTANCE_PREFIX}{IP_INFIX}{}.json",
                instance.instance_creation_details.private_ip_address
            ),
        }
    }

    async fn read_info(folder: &Path) -> Result<Option<ArcologyInfo>> {
        match tokio::fs::read_to_string(folder.join(INFO_FILE_NAME)).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn instance_files(folder: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(INSTANCE_PREFIX) && name.ends_with(".json") {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Stage next to `path` and rename over it, so readers never see a
    /// partly written file.
    async fn write_file(path: &Path, contents: String) -> Result<()> {
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, contents).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    /// Instance files go first and the info file last; an environment only
    /// exists once `ArcologyInfo.json` does.
    async fn write_all(folder: &Path, arcology: &Arcology) -> Result<()> {
        let mut wanted = HashSet::new();
        for (sequence, instance) in arcology.instances.iter().enumerate() {
            let file_name = Self::instance_file_name(instance);
            let file = InstanceFile {
                sequence,
                instance: instance.clone(),
            };
            Self::write_file(&folder.join(&file_name), serde_json::to_string_pretty(&file)?)
                .await?;
            wanted.insert(file_name);
        }

        Self::write_file(
            &folder.join(INFO_FILE_NAME),
            serde_json::to_string_pretty(&arcology.info)?,
        )
        .await?;

        // Renamed (ip -> name) and terminated instances leave stale files.
        for stale in Self::instance_files(folder).await? {
            if !wanted.contains(&stale) {
                tokio::fs::remove_file(folder.join(&stale)).await?;
                debug!(file = %stale, "folder store: removed stale instance file");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FolderStateStore {
    async fn create(&self, arcology: &Arcology) -> Result<()> {
        let folder = self.environment_folder(arcology.environment());
        if Self::read_info(&folder).await?.is_some() {
            return Err(already_exists(arcology.environment()));
        }
        tokio::fs::create_dir_all(&folder).await?;
        Self::write_all(&folder, arcology).await?;
        info!(folder = %folder.display(), "folder store: created arcology");
        Ok(())
    }

    async fn load(&self, environment: &str) -> Result<Arcology> {
        let folder = self.environment_folder(environment);
        if !tokio::fs::try_exists(&folder).await? {
            return Err(unknown_environment(environment));
        }
        let info = Self::read_info(&folder)
            .await?
            .ok_or_else(|| unknown_environment(environment))?;

        let mut files = Vec::new();
        for name in Self::instance_files(&folder).await? {
            let raw = tokio::fs::read_to_string(folder.join(&name)).await?;
            files.push(serde_json::from_str::<InstanceFile>(&raw)?);
        }
        files.sort_by_key(|f| f.sequence);

        Ok(Arcology {
            info,
            instances: files.into_iter().map(|f| f.instance).collect(),
        })
    }

    async fn save(&self, arcology: &Arcology) -> Result<()> {
        let folder = self.environment_folder(arcology.environment());
        if Self::read_info(&folder).await?.is_none() {
            return Err(unknown_environment(arcology.environment()));
        }
        Self::write_all(&folder, arcology).await
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Folder
    }
}
