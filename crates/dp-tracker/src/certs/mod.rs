//! Certificates tracked alongside an arcology. Payloads are encrypted at rest
//! and only decrypted when read through a [`CertificateStore`].

pub mod document;
pub mod encryption;
pub mod file;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};
pub use encryption::{CertificateEncryptor, LocalKeyStore};

/// Names a key in a local certificate store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateLocator {
    pub thumbprint: String,
    pub is_valid: bool,
    pub store_name: String,
    pub store_location: String,
}

impl CertificateLocator {
    pub fn new(
        thumbprint: impl Into<String>,
        store_name: impl Into<String>,
        store_location: impl Into<String>,
    ) -> Self {
        Self {
            thumbprint: thumbprint.into(),
            is_valid: true,
            store_name: store_name.into(),
            store_location: store_location.into(),
        }
    }

    /// Thumbprints are copied out of tools with spaces and odd casing.
    pub fn normalized_thumbprint(&self) -> String {
        self.thumbprint
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }

    /// Two locators naming the same key after normalization.
    pub fn same_key(&self, other: &CertificateLocator) -> bool {
        self.normalized_thumbprint() == other.normalized_thumbprint()
            && self.store_name == other.store_name
            && self.store_location == other.store_location
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

/// Certificate metadata extracted from the X.509 payload by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDescription {
    pub friendly_name: String,
    pub thumbprint: String,
    pub validity_window_in_utc: ValidityWindow,
    #[serde(default)]
    pub certificate_attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_signing_request_pem_encoded: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDescriptionWithClearPfx {
    pub description: CertificateDescription,
    pub pfx_bytes: Vec<u8>,
    pub pfx_password_in_clear_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDescriptionWithEncryptedPfx {
    #[serde(flatten)]
    pub description: CertificateDescription,
    pub encrypting_certificate_locator: CertificateLocator,
    pub pfx_bytes_encrypted_base64: String,
    pub pfx_password_encrypted_base64: String,
}

impl CertificateDescriptionWithClearPfx {
    pub fn to_encrypted(
        &self,
        locator: &CertificateLocator,
        encryptor: &dyn CertificateEncryptor,
    ) -> Result<CertificateDescriptionWithEncryptedPfx> {
        let pfx = encryptor.encrypt(locator, &self.pfx_bytes)?;
        let password = encryptor.encrypt(locator, self.pfx_password_in_clear_text.as_bytes())?;
        Ok(CertificateDescriptionWithEncryptedPfx {
            description: self.description.clone(),
            encrypting_certificate_locator: locator.clone(),
            pfx_bytes_encrypted_base64: STANDARD.encode(pfx),
            pfx_password_encrypted_base64: STANDARD.encode(password),
        })
    }
}

impl CertificateDescriptionWithEncryptedPfx {
    pub fn to_clear(
        &self,
        encryptor: &dyn CertificateEncryptor,
    ) -> Result<CertificateDescriptionWithClearPfx> {
        let locator = &self.encrypting_certificate_locator;
        let pfx = STANDARD
            .decode(&self.pfx_bytes_encrypted_base64)
            .map_err(|e| Error::Encryption(format!("pfx payload is not base64: {e}")))?;
        let password = STANDARD
            .decode(&self.pfx_password_encrypted_base64)
            .map_err(|e| Error::Encryption(format!("pfx password is not base64: {e}")))?;

        let password = String::from_utf8(encryptor.decrypt(locator, &password)?)
            .map_err(|e| Error::Encryption(format!("pfx password is not utf-8: {e}")))?;

        Ok(CertificateDescriptionWithClearPfx {
            description: self.description.clone(),
            pfx_bytes: encryptor.decrypt(locator, &pfx)?,
            pfx_password_in_clear_text: password,
        })
    }
}

/// One persisted certificate, keyed by friendly name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateContainer {
    pub id: String,
    pub certificate: CertificateDescriptionWithEncryptedPfx,
    pub record_last_modified_utc: DateTime<Utc>,
}

impl CertificateContainer {
    pub fn new(certificate: CertificateDescriptionWithEncryptedPfx) -> Self {
        Self {
            id: certificate.description.friendly_name.clone(),
            certificate,
            record_last_modified_utc: Utc::now(),
        }
    }
}

/// Read/write access to certificates in clear form.
#[async_trait]
pub trait CertificateStore: Send + Sync + 'static {
    /// Lookup by friendly name, ignoring ASCII case.
    async fn get_certificate_by_name(
        &self,
        name: &str,
    ) -> Result<Option<CertificateDescriptionWithClearPfx>>;

    async fn get_all_certificate_names(&self) -> Result<Vec<String>>;

    /// Encrypt under `locator` and persist, replacing any same-named entry.
    async fn persist_certificate(
        &self,
        certificate: &CertificateDescriptionWithClearPfx,
        locator: &CertificateLocator,
    ) -> Result<()>;
}

/// Raw storage of encrypted certificate records.
#[async_trait]
pub trait CertificateRecords: Send + Sync + 'static {
    async fn get(&self, name: &str) -> Result<Option<CertificateContainer>>;

    async fn names(&self) -> Result<Vec<String>>;

    async fn put(&self, container: CertificateContainer) -> Result<()>;
}

/// Adds encryption on top of any [`CertificateRecords`].
pub struct EncryptedCertificateStore {
    records: Arc<dyn CertificateRecords>,
    encryptor: Arc<dyn CertificateEncryptor>,
}

impl EncryptedCertificateStore {
    pub fn new(
        records: Arc<dyn CertificateRecords>,
        encryptor: Arc<dyn CertificateEncryptor>,
    ) -> Self {
        Self { records, encryptor }
    }
}

#[async_trait]
impl CertificateStore for EncryptedCertificateStore {
    async fn get_certificate_by_name(
        &self,
        name: &str,
    ) -> Result<Option<CertificateDescriptionWithClearPfx>> {
        match self.records.get(name).await? {
            Some(container) => Ok(Some(container.certificate.to_clear(self.encryptor.as_ref())?)),
            None => Ok(None),
        }
    }

    async fn get_all_certificate_names(&self) -> Result<Vec<String>> {
        self.records.names().await
    }

    async fn persist_certificate(
        &self,
        certificate: &CertificateDescriptionWithClearPfx,
        locator: &CertificateLocator,
    ) -> Result<()> {
        let encrypted = certificate.to_encrypted(locator, self.encryptor.as_ref())?;
        self.records.put(CertificateContainer::new(encrypted)).await?;
        info!(
            name = %certificate.description.friendly_name,
            thumbprint = %locator.normalized_thumbprint(),
            "certificates: persisted"
        );
        Ok(())
    }
}

/// A store with no certificates that refuses writes.
pub struct NullCertificateStore;

#[async_trait]
impl CertificateStore for NullCertificateStore {
    async fn get_certificate_by_name(
        &self,
        _name: &str,
    ) -> Result<Option<CertificateDescriptionWithClearPfx>> {
        Ok(None)
    }

    async fn get_all_certificate_names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn persist_certificate(
        &self,
        _certificate: &CertificateDescriptionWithClearPfx,
        _locator: &CertificateLocator,
    ) -> Result<()> {
        Err(Error::UnsupportedConfiguration(
            "the null certificate store cannot persist certificates".into(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbprint_normalization_strips_noise() {
        let locator = CertificateLocator::new(" ab 12:cd\u{200e}", "My", "LocalMachine");
        assert_eq!(locator.normalized_thumbprint(), "AB12CD");
        assert!(locator.same_key(&CertificateLocator::new("AB12CD", "My", "LocalMachine")));
        assert!(!locator.same_key(&CertificateLocator::new("AB12CD", "Root", "LocalMachine")));
    }

    #[tokio::test]
    async fn null_store_is_empty_and_read_only() {
        let store = NullCertificateStore;
        assert!(store.get_certificate_by_name("web").await.unwrap().is_none());
        assert!(store.get_all_certificate_names().await.unwrap().is_empty());

        let locator = CertificateLocator::new("AB12CD", "My", "LocalMachine");
        let result = store
            .persist_certificate(&testing::sample_certificate("web"), &locator)
            .await;
        assert!(matches!(result, Err(Error::UnsupportedConfiguration(_))));
    }
}
