use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use age::secrecy::ExposeSecret;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::CertificateLocator;
use crate::{Error, Result};

const NOT_AFTER_PREFIX: &str = "# not-after: ";

/// Encrypts and decrypts certificate payloads with a key named by a
/// [`CertificateLocator`].
pub trait CertificateEncryptor: Send + Sync + 'static {
    fn encrypt(&self, locator: &CertificateLocator, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, locator: &CertificateLocator, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Local key store holding one age x25519 identity per locator at
/// `<root>/<store_location>/<store_name>/<THUMBPRINT>.key`.
///
/// A key file may carry a `# not-after: <rfc3339>` comment; once that moment
/// has passed the key is invisible to locators that ask for valid keys only.
pub struct LocalKeyStore {
    root: PathBuf,
}

impl LocalKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, locator: &CertificateLocator) -> PathBuf {
        self.root
            .join(&locator.store_location)
            .join(&locator.store_name)
            .join(format!("{}.key", locator.normalized_thumbprint()))
    }

    /// Generate and write a fresh identity for `locator`.
    pub fn create_key(
        &self,
        locator: &CertificateLocator,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<age::x25519::Recipient> {
        let path = self.key_path(locator);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let identity = age::x25519::Identity::generate();
        let mut contents = format!("# created: {}\n", Utc::now().to_rfc3339());
        if let Some(not_after) = not_after {
            contents.push_str(&format!("{NOT_AFTER_PREFIX}{}\n", not_after.to_rfc3339()));
        }
        contents.push_str(identity.to_string().expose_secret());
        contents.push('\n');

        // Owner-only on unix, including a key file being replaced.
        #[cfg(unix)]
        let mut file = {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
            file
        };

        #[cfg(not(unix))]
        let mut file = fs::File::create(&path)?;

        file.write_all(contents.as_bytes())?;

        debug!(path = %path.display(), "keystore: created key");
        Ok(identity.to_public())
    }

    fn load_identity(&self, locator: &CertificateLocator) -> Result<age::x25519::Identity> {
        let path = self.key_path(locator);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found(locator, &self.root));
            }
            Err(e) => return Err(e.into()),
        };

        if locator.is_valid && expired(&contents)? {
            return Err(not_found(locator, &self.root));
        }

        contents
            .lines()
            .find(|line| !line.starts_with('#') && !line.trim().is_empty())
            .ok_or_else(|| Error::Encryption(format!("key file {} is empty", path.display())))?
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| Error::Encryption(format!("invalid identity in {}: {e}", path.display())))
    }
}

fn expired(contents: &str) -> Result<bool> {
    let Some(raw) = contents.lines().find_map(|line| line.strip_prefix(NOT_AFTER_PREFIX)) else {
        return Ok(false);
    };
    let not_after = DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| Error::Encryption(format!("invalid not-after stamp: {e}")))?;
    Ok(not_after < Utc::now())
}

fn not_found(locator: &CertificateLocator, root: &Path) -> Error {
    Error::EncryptionCertificateNotFound(format!(
        "thumbprint: {}, is valid: {}, store name: {}, store location: {}, key store: {}",
        locator.normalized_thumbprint(),
        locator.is_valid,
        locator.store_name,
        locator.store_location,
        root.display(),
    ))
}

impl CertificateEncryptor for LocalKeyStore {
    fn encrypt(&self, locator: &CertificateLocator, plaintext: &[u8]) -> Result<Vec<u8>> {
        let recipient = self.load_identity(locator)?.to_public();
        let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient)])
            .ok_or_else(|| Error::Encryption("no valid encryption recipients".into()))?;

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        writer.write_all(plaintext)?;
        writer.finish()?;

        Ok(encrypted)
    }

    fn decrypt(&self, locator: &CertificateLocator, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let identity = self.load_identity(locator)?;
        let age::Decryptor::Recipients(decryptor) =
            age::Decryptor::new(ciphertext).map_err(|e| Error::Encryption(e.to_string()))?
        else {
            return Err(Error::Encryption("unexpected decryptor type".into()));
        };

        let mut decrypted = vec![];
        let identity: &dyn age::Identity = &identity;
        let mut reader = decryptor
            .decrypt(std::iter::once(identity))
            .map_err(|e| Error::Encryption(e.to_string()))?;
        reader.read_to_end(&mut decrypted)?;

        Ok(decrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn locator() -> CertificateLocator {
        CertificateLocator::new("ab:12:cd", "My", "LocalMachine")
    }

    #[test]
    fn round_trips_through_generated_key() {
        let dir = tempfile::tempdir().unwrap();
        let keys = LocalKeyStore::new(dir.path());
        keys.create_key(&locator(), None).unwrap();

        let ciphertext = keys.encrypt(&locator(), b"pfx-bytes").unwrap();
        assert_ne!(ciphertext, b"pfx-bytes");

        // Same key, differently formatted thumbprint.
        let same = CertificateLocator::new("AB12CD", "My", "LocalMachine");
        assert_eq!(keys.decrypt(&same, &ciphertext).unwrap(), b"pfx-bytes");
    }

    #[cfg(unix)]
    #[test]
    fn key_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let keys = LocalKeyStore::new(dir.path());
        let path = dir.path().join("LocalMachine").join("My").join("AB12CD.key");

        keys.create_key(&locator(), None).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // Replacing a key left readable by others tightens it again.
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        keys.create_key(&locator(), None).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn missing_key_is_reported_with_locator() {
        let dir = tempfile::tempdir().unwrap();
        let keys = LocalKeyStore::new(dir.path());
        let err = keys.encrypt(&locator(), b"x").unwrap_err();
        match err {
            Error::EncryptionCertificateNotFound(msg) => {
                assert!(msg.contains("AB12CD"));
                assert!(msg.contains("LocalMachine"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expired_key_only_visible_when_validity_not_required() {
        let dir = tempfile::tempdir().unwrap();
        let keys = LocalKeyStore::new(dir.path());
        keys.create_key(&locator(), Some(Utc::now() - Duration::days(1)))
            .unwrap();

        assert!(matches!(
            keys.encrypt(&locator(), b"x"),
            Err(Error::EncryptionCertificateNotFound(_))
        ));

        let any = CertificateLocator {
            is_valid: false,
            ..locator()
        };
        let ciphertext = keys.encrypt(&any, b"x").unwrap();
        assert_eq!(keys.decrypt(&any, &ciphertext).unwrap(), b"x");
    }
}
