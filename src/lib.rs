//! # sealvault
//!
//! Local, offline encrypted-content vault core.
//!
//! Every imported item is stored on disk only as ciphertext and decrypted
//! transiently on access. A login password unlocks a separate content secret;
//! only the content secret ever encrypts blob payloads, so changing the
//! password re-wraps one small value and never touches stored files.
//!
//! ## Layout
//!
//! - `keys`, `crypto`, `stream`: the encryption engine. PBKDF2-HMAC-SHA256
//!   key derivation, single-shot AES-256-GCM, and a chunked streaming format
//!   for payloads too large to buffer.
//! - `credentials`: the key hierarchy over a `SecureStore`, plus the guest
//!   and disguise sub-credentials.
//! - `blob_store`: the encrypted blob directory.
//! - `reencrypt`: bulk re-encryption between passwords (feature
//!   `reencrypt`, on by default).
//! - `vault`: the `Vault` service object tying the above to a session.
//!
//! All operations are synchronous and blocking. Run them off any
//! latency-sensitive thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sealvault::{FileSecureStore, InstallIdentity, Vault, VaultConfig};
//!
//! # fn main() -> sealvault::Result<()> {
//! let store = Arc::new(FileSecureStore::open("/var/lib/app", "vault")?);
//! let device = Arc::new(InstallIdentity::new("/var/lib/app/install-id"));
//! let mut vault = Vault::open("/var/lib/app", store, device, VaultConfig::default())?;
//!
//! vault.setup("correct-horse")?;
//! let id = vault.import_bytes(b"hello")?;
//! assert_eq!(vault.read(&id)?, b"hello");
//! vault.lock();
//! # Ok(())
//! # }
//! ```

pub mod blob_store;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod device;
pub mod error;
pub mod journal;
pub mod keys;
#[cfg(feature = "reencrypt")]
pub mod reencrypt;
pub mod secure_store;
pub mod session;
pub mod stream;
pub mod vault;

pub use blob_store::{BlobId, BlobStore, DecryptedTemp};
pub use config::VaultConfig;
pub use credentials::{CredentialVault, VaultState};
pub use device::{DeviceIdentity, FixedDeviceIdentity, InstallIdentity};
pub use error::{Result, VaultError};
pub use journal::{FileJournalSink, Journal, JournalRecord, JournalSink, VaultEvent};
#[cfg(feature = "reencrypt")]
pub use reencrypt::{CancelFlag, ReencryptProgress, Reencryptor};
pub use secure_store::{FileSecureStore, MemorySecureStore, SecureStore};
pub use session::Session;
pub use vault::Vault;
