use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CertificateContainer, CertificateRecords};
use crate::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CertificateFile {
    #[serde(default)]
    certificates: Vec<CertificateContainer>,
}

/// All certificates of one environment in a single JSON file, conventionally
/// `<folder>/<environment>.Certificates.json`.
pub struct FileCertificateRecords {
    path: PathBuf,
    write: Mutex<()>,
}

impl FileCertificateRecords {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn for_environment(folder: &Path, environment: &str) -> Self {
        Self::new(folder.join(format!("{environment}.Certificates.json")))
    }

    async fn read(&self) -> Result<CertificateFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CertificateFile::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CertificateRecords for FileCertificateRecords {
    async fn get(&self, name: &str) -> Result<Option<CertificateContainer>> {
        Ok(self
            .read()
            .await?
            .certificates
            .into_iter()
            .find(|c| c.id.eq_ignore_ascii_case(name)))
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self.read().await?.certificates.into_iter().map(|c| c.id).collect())
    }

    async fn put(&self, container: CertificateContainer) -> Result<()> {
        let _guard = self.write.lock().await;

        let mut file = self.read().await?;
        file.certificates
            .retain(|c| !c.id.eq_ignore_ascii_case(&container.id));
        file.certificates.push(container);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&file)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::certs::testing::sample_certificate;
    use crate::certs::{
        CertificateLocator, CertificateStore, EncryptedCertificateStore, LocalKeyStore,
    };

    #[tokio::test]
    async fn persists_encrypted_and_reads_back_clear() {
        let dir = tempfile::tempdir().unwrap();
        let keys = LocalKeyStore::new(dir.path().join("keys"));
        let locator = CertificateLocator::new("AB12CD", "My", "LocalMachine");
        keys.create_key(&locator, None).unwrap();

        let records = Arc::new(FileCertificateRecords::for_environment(dir.path(), "prod"));
        let store = EncryptedCertificateStore::new(records, Arc::new(keys));

        let certificate = sample_certificate("Web-Wildcard");
        store.persist_certificate(&certificate, &locator).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("prod.Certificates.json")).unwrap();
        assert!(!raw.contains("hunter2"));

        let loaded = store.get_certificate_by_name("web-wildcard").await.unwrap();
        assert_eq!(loaded, Some(certificate.clone()));

        // Same name again replaces rather than duplicates.
        store.persist_certificate(&certificate, &locator).await.unwrap();
        assert_eq!(store.get_all_certificate_names().await.unwrap(), ["Web-Wildcard"]);
    }

    #[tokio::test]
    async fn missing_file_means_no_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let records = FileCertificateRecords::for_environment(dir.path(), "dev");
        assert!(records.names().await.unwrap().is_empty());
        assert!(records.get("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_ascii_letters_fold_case() {
        let dir = tempfile::tempdir().unwrap();
        let keys = LocalKeyStore::new(dir.path().join("keys"));
        let locator = CertificateLocator::new("AB12CD", "My", "LocalMachine");
        keys.create_key(&locator, None).unwrap();

        let records = Arc::new(FileCertificateRecords::for_environment(dir.path(), "dev"));
        let store = EncryptedCertificateStore::new(records, Arc::new(keys));

        store
            .persist_certificate(&sample_certificate("Café-Tls"), &locator)
            .await
            .unwrap();
        assert!(store.get_certificate_by_name("CAFé-TLS").await.unwrap().is_some());
        assert!(store.get_certificate_by_name("CAFÉ-TLS").await.unwrap().is_none());
    }
}
