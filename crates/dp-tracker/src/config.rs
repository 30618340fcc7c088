use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::certs::document::DocumentCertificateRecords;
use crate::certs::file::FileCertificateRecords;
use crate::certs::{
    CertificateRecords, CertificateStore, EncryptedCertificateStore, LocalKeyStore,
    NullCertificateStore,
};
use crate::store::StateStore;
use crate::store::document::{DocumentDatabase, DocumentStateStore};
use crate::store::file::FileStateStore;
use crate::store::folder::FolderStateStore;
use crate::tracker::InfrastructureTracker;
use crate::{Error, Result};

pub use crate::store::StoreKind;

/// Where tracker state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    File { path: PathBuf },
    Folder { root: PathBuf },
    Database { url: String },
}

impl BackendConfig {
    pub fn kind(&self) -> StoreKind {
        match self {
            Self::File { .. } => StoreKind::File,
            Self::Folder { .. } => StoreKind::Folder,
            Self::Database { .. } => StoreKind::Database,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub environment: String,
    pub backend: BackendConfig,
    /// Folder holding `<environment>.Certificates.json` for the file-based
    /// backends. `None` means no certificates are tracked.
    pub certificates_path: Option<PathBuf>,
    pub keystore_path: PathBuf,
}

impl TrackerConfig {
    /// Create from env vars:
    ///
    /// - `ARCOLOGY_ENVIRONMENT` (required)
    /// - `ARCOLOGY_BACKEND` (`file` | `folder` | `database`, default: `folder`)
    /// - `ARCOLOGY_FILE_PATH` (required for `file`)
    /// - `ARCOLOGY_ROOT_FOLDER` (required for `folder`)
    /// - `ARCOLOGY_DATABASE_URL` (required for `database`)
    /// - `ARCOLOGY_CERTIFICATES_PATH` (optional)
    /// - `ARCOLOGY_KEYSTORE_PATH` (default: `./keys`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Self::from_prefixed_lookup("ARCOLOGY", lookup)
    }

    /// Same variables as [`TrackerConfig::from_env`] with `ARCOLOGY` replaced
    /// by `prefix`, so two backends can be configured side by side.
    pub fn from_prefixed_lookup(
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |suffix: &str| format!("{prefix}_{suffix}");
        let require = |suffix: &str| {
            let name = var(suffix);
            lookup(&name).ok_or(Error::MissingEnv(name))
        };

        let environment = require("ENVIRONMENT")?;
        let kind: StoreKind = lookup(&var("BACKEND"))
            .unwrap_or_else(|| "folder".into())
            .parse()?;

        let backend = match kind {
            StoreKind::File => BackendConfig::File {
                path: require("FILE_PATH")?.into(),
            },
            StoreKind::Folder => BackendConfig::Folder {
                root: require("ROOT_FOLDER")?.into(),
            },
            StoreKind::Database => BackendConfig::Database {
                url: require("DATABASE_URL")?,
            },
        };

        Ok(Self {
            environment,
            backend,
            certificates_path: lookup(&var("CERTIFICATES_PATH")).map(PathBuf::from),
            keystore_path: lookup(&var("KEYSTORE_PATH"))
                .unwrap_or_else(|| "./keys".into())
                .into(),
        })
    }
}

/// Build the configured state and certificate stores.
pub async fn build_stores(
    config: &TrackerConfig,
) -> Result<(Arc<dyn StateStore>, Arc<dyn CertificateStore>)> {
    let keys = Arc::new(LocalKeyStore::new(&config.keystore_path));

    let store: Arc<dyn StateStore>;
    let records: Option<Arc<dyn CertificateRecords>>;
    match &config.backend {
        BackendConfig::File { path } => {
            store = Arc::new(FileStateStore::new(path));
            records = file_records(config);
        }
        BackendConfig::Folder { root } => {
            store = Arc::new(FolderStateStore::new(root));
            records = file_records(config);
        }
        BackendConfig::Database { url } => {
            let db = DocumentDatabase::connect(url).await?;
            records = Some(Arc::new(DocumentCertificateRecords::new(
                db.clone(),
                config.environment.clone(),
            )));
            store = Arc::new(DocumentStateStore::new(db));
        }
    }

    let certificates: Arc<dyn CertificateStore> = match records {
        Some(records) => Arc::new(EncryptedCertificateStore::new(records, keys)),
        None => {
            tracing::debug!("no certificate location configured, using null store");
            Arc::new(NullCertificateStore)
        }
    };

    info!(
        environment = %config.environment,
        backend = %config.backend.kind(),
        "registered arcology backend"
    );
    Ok((store, certificates))
}

/// [`build_stores`] wrapped in a tracker.
pub async fn build_tracker(config: &TrackerConfig) -> Result<InfrastructureTracker> {
    let (store, certificates) = build_stores(config).await?;
    Ok(InfrastructureTracker::new(store, certificates))
}

fn file_records(config: &TrackerConfig) -> Option<Arc<dyn CertificateRecords>> {
    config.certificates_path.as_ref().map(|folder| {
        Arc::new(FileCertificateRecords::for_environment(folder, &config.environment))
            as Arc<dyn CertificateRecords>
    })
}
