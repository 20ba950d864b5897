//! The `Vault` service object.
//!
//! Construct one per process and hand it to the collaborators that need it.
//! It owns the session secret; everything that encrypts or decrypts blobs
//! goes through the unlocked session, never through the login password.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::blob_store::{BlobId, BlobStore, DecryptedTemp};
use crate::config::VaultConfig;
use crate::credentials::{CredentialVault, VaultState};
use crate::device::DeviceIdentity;
use crate::error::{Result, VaultError};
use crate::journal::{Journal, VaultEvent};
#[cfg(feature = "reencrypt")]
use crate::reencrypt::{CancelFlag, ReencryptProgress, Reencryptor};
use crate::secure_store::SecureStore;
use crate::session::Session;

const BLOB_DIR: &str = "blobs";

pub struct Vault {
    credentials: CredentialVault,
    blobs: Arc<BlobStore>,
    session: Session,
    journal: Journal,
    config: VaultConfig,
    #[cfg(feature = "reencrypt")]
    reencryptor: Arc<Reencryptor>,
}

impl Vault {
    /// Open a vault whose blobs live under `dir/blobs`.
    pub fn open(
        dir: impl AsRef<Path>,
        store: Arc<dyn SecureStore>,
        device: Arc<dyn DeviceIdentity>,
        config: VaultConfig,
    ) -> Result<Self> {
        let config = config.validate()?;
        let blobs = Arc::new(BlobStore::open(
            dir.as_ref().join(BLOB_DIR),
            config.clone(),
        )?);
        Ok(Self {
            credentials: CredentialVault::new(store, device),
            #[cfg(feature = "reencrypt")]
            reencryptor: Arc::new(Reencryptor::new(Arc::clone(&blobs))),
            blobs,
            session: Session::new(),
            journal: Journal::new(),
            config,
        })
    }

    pub fn credentials(&self) -> &CredentialVault {
        &self.credentials
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    pub fn state(&self) -> Result<VaultState> {
        self.credentials.state()
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_active()
    }

    fn secret(&self) -> Result<&str> {
        self.session.secret().ok_or(VaultError::Locked)
    }

    // -- session -------------------------------------------------------------

    /// First-run setup. Leaves the vault unlocked.
    pub fn setup(&mut self, login_password: &str) -> Result<()> {
        let secret = self.credentials.setup(login_password)?;
        self.session.begin(secret);
        self.journal.record(VaultEvent::Initialized);
        Ok(())
    }

    /// Check `login_password` and start a session. Every rejection looks
    /// the same to the caller.
    pub fn unlock(&mut self, login_password: &str) -> Result<()> {
        if !self
            .credentials
            .verify(login_password, self.config.verify_delay())?
        {
            return Err(VaultError::DataCorrupted);
        }
        let secret = self.credentials.unwrap_content_secret(login_password)?;
        self.session.begin(secret);
        info!("vault unlocked");
        Ok(())
    }

    /// End the session and wipe the content secret from memory.
    pub fn lock(&mut self) {
        if self.session.is_active() {
            info!("vault locked");
        }
        self.session.end();
    }

    pub fn change_login_password(&mut self, old: &str, new: &str) -> Result<()> {
        self.secret()?;
        let secret = self.credentials.change_login_password(old, new)?;
        self.session.replace(secret);
        self.journal.record(VaultEvent::LoginPasswordChanged);
        Ok(())
    }

    // -- sub-credentials -----------------------------------------------------

    pub fn set_guest_password(&mut self, guest: &str) -> Result<()> {
        self.secret()?;
        self.credentials.set_guest_password(guest)?;
        self.journal.record(VaultEvent::GuestPasswordSet);
        Ok(())
    }

    pub fn clear_guest_password(&mut self) -> Result<()> {
        self.secret()?;
        self.credentials.clear_guest_password()?;
        self.journal.record(VaultEvent::GuestPasswordCleared);
        Ok(())
    }

    pub fn set_disguise_password(&mut self, disguise: &str) -> Result<()> {
        self.secret()?;
        self.credentials.set_disguise_password(disguise)?;
        self.journal.record(VaultEvent::DisguisePasswordSet);
        Ok(())
    }

    pub fn clear_disguise_password(&mut self) -> Result<()> {
        self.secret()?;
        self.credentials.clear_disguise_password()?;
        self.journal.record(VaultEvent::DisguisePasswordCleared);
        Ok(())
    }

    // -- content -------------------------------------------------------------

    pub fn import_bytes(&mut self, plaintext: &[u8]) -> Result<BlobId> {
        let id = self.blobs.put_bytes(plaintext, self.secret()?)?;
        self.journal.record(VaultEvent::BlobStored {
            blob: id.to_string(),
            bytes: plaintext.len() as u64,
        });
        Ok(id)
    }

    /// Import a file from disk, streaming it when it is large.
    pub fn import_file(&mut self, source: impl AsRef<Path>) -> Result<BlobId> {
        let source = source.as_ref();
        let bytes = source
            .metadata()
            .map_err(|e| VaultError::from_io(e, source))?
            .len();
        let id = self.blobs.put_file(source, self.secret()?)?;
        self.journal.record(VaultEvent::BlobStored {
            blob: id.to_string(),
            bytes,
        });
        Ok(id)
    }

    pub fn read(&self, id: &BlobId) -> Result<Vec<u8>> {
        self.blobs.get_decrypted(id, self.secret()?)
    }

    pub fn open_temp(&self, id: &BlobId, extension_hint: Option<&str>) -> Result<DecryptedTemp> {
        self.blobs
            .open_decrypted_temp(id, self.secret()?, extension_hint)
    }

    /// Delete a blob. Removing an unknown blob succeeds and records nothing.
    pub fn remove(&mut self, id: &BlobId) -> Result<()> {
        self.secret()?;
        let existed = self.blobs.exists(id)?;
        self.blobs.delete(id)?;
        if existed {
            self.journal
                .record(VaultEvent::BlobDeleted { blob: id.to_string() });
        }
        Ok(())
    }

    // -- re-encryption -------------------------------------------------------

    /// Shared handle to the orchestrator, for running a pass off the
    /// owner's thread.
    #[cfg(feature = "reencrypt")]
    pub fn reencryptor(&self) -> Arc<Reencryptor> {
        Arc::clone(&self.reencryptor)
    }

    /// Re-encrypt the blobs in `ids` from `old` to `new`.
    ///
    /// This is a migration tool for blobs written directly under a password.
    /// `change_login_password` never needs it. Every blob in `ids` must be
    /// under `old`; blobs under the content secret must be left out, or the
    /// pass aborts at the first of them.
    #[cfg(feature = "reencrypt")]
    pub fn reencrypt_all<F>(
        &mut self,
        ids: &[BlobId],
        old: &str,
        new: &str,
        cancel: &CancelFlag,
        progress: F,
    ) -> Result<usize>
    where
        F: FnMut(ReencryptProgress),
    {
        self.secret()?;
        let blobs = self
            .reencryptor
            .reencrypt_all(ids, old, new, cancel, progress)?;
        self.journal
            .record(VaultEvent::ReencryptionCompleted { blobs });
        Ok(blobs)
    }

    // -- reset ---------------------------------------------------------------

    /// Irreversibly wipe every credential and every blob.
    pub fn reset(&mut self) -> Result<()> {
        self.session.end();
        for id in self.blobs.list()? {
            self.blobs.delete(&id)?;
        }
        self.credentials.reset()?;
        self.journal.record(VaultEvent::Reset);
        Ok(())
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("blobs", &self.blobs)
            .field("session", &self.session)
            .field("journal", &self.journal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FixedDeviceIdentity;
    use crate::secure_store::MemorySecureStore;

    fn vault(dir: &Path) -> Vault {
        let config = VaultConfig {
            min_free_space: 0,
            ..VaultConfig::default()
        };
        Vault::open(
            dir,
            Arc::new(MemorySecureStore::new()),
            Arc::new(FixedDeviceIdentity::new("test-device")),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_locked_vault_refuses_content_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = vault(dir.path());
        v.setup("pw").unwrap();
        let id = v.import_bytes(b"hello").unwrap();

        v.lock();
        assert!(!v.is_unlocked());
        assert!(matches!(v.read(&id), Err(VaultError::Locked)));
        assert!(matches!(v.import_bytes(b"x"), Err(VaultError::Locked)));
        assert!(matches!(v.remove(&id), Err(VaultError::Locked)));

        v.unlock("pw").unwrap();
        assert_eq!(v.read(&id).unwrap(), b"hello");
    }

    #[test]
    fn test_wrong_password_looks_like_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = vault(dir.path());
        v.setup("pw").unwrap();
        v.lock();
        let err = v.unlock("nope").unwrap_err();
        assert!(err.is_authentication_failure());
        assert!(!v.is_unlocked());
    }

    #[test]
    fn test_journal_tracks_events_without_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = vault(dir.path());
        v.setup("hunter2").unwrap();
        let id = v.import_bytes(b"payload").unwrap();
        v.remove(&id).unwrap();
        v.remove(&id).unwrap();

        let events: Vec<_> = v.journal().iter().map(|r| r.event.clone()).collect();
        assert_eq!(
            events,
            vec![
                VaultEvent::Initialized,
                VaultEvent::BlobStored {
                    blob: id.to_string(),
                    bytes: 7
                },
                VaultEvent::BlobDeleted { blob: id.to_string() },
            ]
        );
        let dump = serde_json::to_string(&v.journal().iter().collect::<Vec<_>>()).unwrap();
        assert!(!dump.contains("hunter2"));
        assert!(!dump.contains("payload"));
    }

    #[test]
    fn test_reset_wipes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = vault(dir.path());
        v.setup("pw").unwrap();
        v.import_bytes(b"a").unwrap();
        v.reset().unwrap();

        assert_eq!(v.state().unwrap(), VaultState::Uninitialized);
        assert!(v.blobs().list().unwrap().is_empty());
        assert!(!v.is_unlocked());
        v.setup("again").unwrap();
    }
}
