//! Error types for sealvault.
//!
//! Every variant is a distinct failure mode of the vault core. Messages are
//! intentionally minimal. In particular, a wrong password, a tampered
//! ciphertext and a structurally malformed blob all render the same text so
//! that nothing above the core can tell them apart.

use std::io;
use std::path::Path;

/// The single error type for all sealvault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The password was empty or did not meet the format rules of the
    /// credential it was offered for (e.g. a non-numeric guest password).
    #[error("invalid password")]
    InvalidPassword,

    /// PBKDF2 failed at the primitive level.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// The AEAD seal operation failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// The ciphertext is too short or its framing is malformed.
    #[error("data could not be decrypted")]
    InvalidData,

    /// The authentication tag did not verify: wrong password or tampered bytes.
    #[error("data could not be decrypted")]
    DataCorrupted,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file access denied: {0}")]
    FileAccessDenied(String),

    /// Free space on the target volume is below payload size plus headroom.
    #[error("insufficient storage: need {required} bytes, {available} available")]
    InsufficientStorage { required: u64, available: u64 },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The secure credential store rejected an operation.
    #[error("secure store error: {0}")]
    SecureStore(String),

    /// No login password has been set up yet.
    #[error("vault is not initialized")]
    NotInitialized,

    /// `setup` was called on a vault that already has a login password.
    #[error("vault is already initialized")]
    AlreadyInitialized,

    /// The operation needs an unlocked session.
    #[error("vault is locked")]
    Locked,

    /// A bulk re-encryption pass is already running.
    #[error("re-encryption already in progress")]
    AlreadyInProgress,

    /// The caller cancelled a re-encryption pass between batches.
    #[error("re-encryption cancelled after {completed} blobs")]
    Cancelled { completed: usize },

    /// A single blob failed during re-encryption; the pass was aborted.
    #[error("re-encryption aborted at blob {blob} after {completed} blobs: {source}")]
    ReencryptionFailed {
        blob: String,
        completed: usize,
        #[source]
        source: Box<VaultError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VaultError {
    /// Classify an I/O error against the path it was raised for.
    pub(crate) fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => Self::FileAccessDenied(path.display().to_string()),
            _ => Self::Io(err),
        }
    }

    /// True for every failure that must be presented to a user as a single
    /// "wrong password or damaged data" message.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::InvalidData | Self::DataCorrupted)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;
