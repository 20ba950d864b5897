//! Device identity providers.
//!
//! Material that must be checkable before login (the disguise password) is
//! wrapped under a secret derived from a stable per-install identifier. The
//! credential vault receives that identifier through `DeviceIdentity` so it
//! can be tested without real hardware identifiers.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, VaultError};

/// Supplies a stable identifier for this installation.
pub trait DeviceIdentity: Send + Sync {
    fn device_id(&self) -> Result<String>;
}

/// A fixed identifier, for tests and for hosts that manage their own.
#[derive(Debug, Clone)]
pub struct FixedDeviceIdentity(String);

impl FixedDeviceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl DeviceIdentity for FixedDeviceIdentity {
    fn device_id(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// A random identifier generated on first use and kept in a file.
///
/// Deleting the file changes the identity, which makes any disguise
/// password wrapped under the old one unreadable.
#[derive(Debug, Clone)]
pub struct InstallIdentity {
    path: PathBuf,
}

impl InstallIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a fresh id beside the target and link it into place, so the
    /// file is never observed empty or half written.
    fn create(&self) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| VaultError::from_io(e, dir))?;

        let mut pending = tempfile::Builder::new()
            .prefix(".install-id-")
            .tempfile_in(dir)
            .map_err(|e| VaultError::from_io(e, dir))?;
        pending.write_all(id.as_bytes())?;
        pending.as_file().sync_all()?;

        match pending.persist_noclobber(&self.path) {
            Ok(_) => {
                debug!(path = %self.path.display(), "created install identity");
                Ok(id)
            }
            // Lost a race with another creator: theirs wins.
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => self.read_existing(),
            Err(e) => Err(VaultError::from_io(e.error, &self.path)),
        }
    }

    fn read_existing(&self) -> Result<String> {
        let raw = fs::read_to_string(&self.path).map_err(|e| VaultError::from_io(e, &self.path))?;
        let id = raw.trim();
        Uuid::parse_str(id).map_err(|_| VaultError::InvalidData)?;
        Ok(id.to_string())
    }
}

impl DeviceIdentity for InstallIdentity {
    fn device_id(&self) -> Result<String> {
        if self.path.exists() {
            self.read_existing()
        } else {
            self.create()
        }
    }
}
