//! Access-controlled secret storage for credential records.
//!
//! The credential vault never touches a keychain API directly; it talks to a
//! `SecureStore`. Platform builds plug in their keychain ("unlocked, this
//! device only" protection class). Two implementations ship here:
//!
//! - `MemorySecureStore` for tests and ephemeral sessions.
//! - `FileSecureStore`, a single JSON file per namespace with owner-only
//!   permissions, rewritten atomically on every mutation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Logical field names of the credential record.
pub mod field {
    pub const LOGIN_VERIFIER_HASH: &str = "loginVerifierHash";
    pub const LOGIN_SALT: &str = "loginSalt";
    pub const IS_LOGIN_SET: &str = "isLoginSet";
    pub const WRAPPED_CONTENT_SECRET: &str = "wrappedContentSecret";
    pub const GUEST_VERIFIER_HASH: &str = "guestVerifierHash";
    pub const GUEST_SALT: &str = "guestSalt";
    pub const IS_GUEST_SET: &str = "isGuestSet";
    pub const WRAPPED_DISGUISE_SECRET: &str = "wrappedDisguiseSecret";
    pub const IS_DISGUISE_SET: &str = "isDisguiseSet";

    /// Every field, in the order a full wipe deletes them.
    pub const ALL: [&str; 9] = [
        LOGIN_VERIFIER_HASH,
        LOGIN_SALT,
        IS_LOGIN_SET,
        WRAPPED_CONTENT_SECRET,
        GUEST_VERIFIER_HASH,
        GUEST_SALT,
        IS_GUEST_SET,
        WRAPPED_DISGUISE_SECRET,
        IS_DISGUISE_SET,
    ];
}

/// Opaque key/value storage for secret material.
pub trait SecureStore: Send + Sync {
    /// Read a value. `Ok(None)` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Write several values together. Implementations that can commit them
    /// atomically should override this.
    fn set_many(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove several values together.
    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> VaultError {
    VaultError::SecureStore("lock poisoned".into())
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// In-memory store. Nothing survives the process.
#[derive(Default)]
pub struct MemorySecureStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecureStore for MemorySecureStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.to_vec());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

const FILE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    /// Hex-encoded values.
    entries: BTreeMap<String, String>,
}

/// A namespace-scoped JSON file holding hex-encoded values.
///
/// Every mutation rewrites the whole file through a temp file and rename,
/// so a crash leaves either the old or the new record set, never a mix.
pub struct FileSecureStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSecureStore {
    /// Open the store for `namespace` inside `dir`. The directory is created
    /// if missing; the file itself appears on first write.
    pub fn open(dir: impl AsRef<Path>, namespace: &str) -> Result<Self> {
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(VaultError::Config(format!("invalid store namespace: {namespace:?}")));
        }
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| VaultError::from_io(e, dir))?;
        Ok(Self {
            path: dir.join(format!("{namespace}.keystore.json")),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreFile> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes)
                    .map_err(|e| VaultError::SecureStore(format!("corrupt store file: {e}")))?;
                if file.version != FILE_FORMAT_VERSION {
                    return Err(VaultError::SecureStore(format!(
                        "unsupported store version {}",
                        file.version
                    )));
                }
                Ok(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile {
                version: FILE_FORMAT_VERSION,
                entries: BTreeMap::new(),
            }),
            Err(e) => Err(VaultError::from_io(e, &self.path)),
        }
    }

    fn save(&self, file: &StoreFile) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let json = serde_json::to_vec(file)
            .map_err(|e| VaultError::SecureStore(format!("encode store file: {e}")))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".keystore")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| VaultError::from_io(e, dir))?;
        restrict_permissions(tmp.as_file())?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| VaultError::from_io(e.error, &self.path))?;
        Ok(())
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let mut file = self.load()?;
        apply(&mut file.entries);
        file.version = FILE_FORMAT_VERSION;
        self.save(&file)
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> Result<()> {
    Ok(())
}

impl SecureStore for FileSecureStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let file = self.load()?;
        match file.entries.get(key) {
            Some(encoded) => hex::decode(encoded)
                .map(Some)
                .map_err(|_| VaultError::SecureStore(format!("corrupt value for {key}"))),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.delete_many(&[key])
    }

    fn set_many(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        self.mutate(|map| {
            for (key, value) in entries {
                map.insert((*key).to_string(), hex::encode(value));
            }
        })
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        self.mutate(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
    }
}
