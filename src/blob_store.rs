//! The encrypted blob directory.
//!
//! Every stored item is one file named `<32 hex chars>.enc`. The name is
//! random and carries nothing of the original file name. Writes go to a
//! hidden `.part` file in the same directory and are renamed into place, so
//! a reader only ever sees a complete old blob or a complete new one.
//!
//! Decrypted copies handed to viewers live in `.decrypted/` and are removed
//! when their `DecryptedTemp` handle drops. Leftovers from a crash are purged
//! when the store is opened.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::crypto::{self, SINGLE_SHOT_HEADER_LEN};
use crate::error::{Result, VaultError};
use crate::stream::{self, StreamStats};

/// Fixed suffix of every blob file.
pub const BLOB_SUFFIX: &str = ".enc";

const DECRYPTED_DIR: &str = ".decrypted";
const PART_PREFIX: &str = ".blob-";
const PART_SUFFIX: &str = ".part";
const MAX_EXTENSION_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Blob id
// ---------------------------------------------------------------------------

/// Name of a stored blob. Only ids produced by the store or accepted by
/// `parse` exist, so an id can never point outside the blob directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(String);

impl BlobId {
    fn generate() -> Self {
        Self(format!("{}{BLOB_SUFFIX}", Uuid::new_v4().simple()))
    }

    /// Validate an id that came from outside, e.g. the metadata layer.
    pub fn parse(raw: &str) -> Result<Self> {
        let stem = raw
            .strip_suffix(BLOB_SUFFIX)
            .ok_or_else(|| VaultError::FileNotFound(raw.to_string()))?;
        let well_formed = stem.len() == 32
            && stem
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(VaultError::FileNotFound(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BlobId {
    type Error = VaultError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Decrypted temp file
// ---------------------------------------------------------------------------

/// A decrypted copy of a blob on disk. The file is deleted when this handle
/// drops, on every exit path.
pub struct DecryptedTemp {
    path: TempPath,
}

impl DecryptedTemp {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detach the file from this handle; the caller becomes responsible for
    /// deleting it.
    pub fn keep(self) -> Result<PathBuf> {
        self.path.keep().map_err(|e| VaultError::Io(e.error))
    }
}

impl fmt::Debug for DecryptedTemp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedTemp")
            .field("path", &self.path())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct BlobStore {
    root: PathBuf,
    config: VaultConfig,
}

impl BlobStore {
    /// Open (creating if needed) the blob directory at `root`.
    pub fn open(root: impl Into<PathBuf>, config: VaultConfig) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| VaultError::from_io(e, &root))?;
        let store = Self { root, config };
        store.purge_decrypted()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn path_of(&self, id: &BlobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn decrypted_dir(&self) -> PathBuf {
        self.root.join(DECRYPTED_DIR)
    }

    fn purge_decrypted(&self) -> Result<()> {
        let dir = self.decrypted_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "purged stale decrypted files");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::from_io(e, &dir)),
        }
    }

    // -- space ---------------------------------------------------------------

    /// Free bytes on the volume holding the store, if the platform says.
    pub fn available_space(&self) -> Option<u64> {
        free_space(&self.root)
    }

    fn ensure_space(&self, payload: u64) -> Result<()> {
        let Some(available) = self.available_space() else {
            warn!(dir = %self.root.display(), "free space unknown; skipping space check");
            return Ok(());
        };
        let required = payload.saturating_add(self.config.min_free_space);
        if available < required {
            return Err(VaultError::InsufficientStorage {
                required,
                available,
            });
        }
        Ok(())
    }

    // -- writes --------------------------------------------------------------

    /// Write `dest` through a sibling temp file and rename it into place.
    /// `dest` is untouched unless `write` succeeds and the rename lands.
    fn write_atomic<F>(&self, dest: &Path, write: F) -> Result<()>
    where
        F: FnOnce(&mut File) -> Result<()>,
    {
        let mut part = tempfile::Builder::new()
            .prefix(PART_PREFIX)
            .suffix(PART_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|e| VaultError::from_io(e, &self.root))?;
        write(part.as_file_mut())?;
        part.as_file().sync_all()?;
        part.persist(dest)
            .map_err(|e| VaultError::from_io(e.error, dest))?;
        Ok(())
    }

    /// Store a small payload in the single-shot format.
    pub fn put_bytes(&self, plaintext: &[u8], password: &str) -> Result<BlobId> {
        self.ensure_space((plaintext.len() + SINGLE_SHOT_HEADER_LEN) as u64)?;
        let blob = crypto::encrypt(plaintext, password)?;
        let id = BlobId::generate();
        self.write_atomic(&self.path_of(&id), |f| Ok(f.write_all(&blob)?))?;
        info!(blob = %id, bytes = blob.len(), "stored blob");
        Ok(id)
    }

    /// Stream `reader` into a new blob in the streaming format.
    ///
    /// `size_hint` is the expected plaintext size, used for the free-space
    /// check. An empty reader is stored single-shot, since a stream with no
    /// chunks would open under any password.
    pub fn put_reader<R: Read>(
        &self,
        reader: &mut R,
        size_hint: u64,
        password: &str,
    ) -> Result<BlobId> {
        let mut first = [0u8; 1];
        let probed = loop {
            match reader.read(&mut first) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if probed == 0 {
            return self.put_bytes(&[], password);
        }

        self.ensure_space(size_hint)?;
        let id = BlobId::generate();
        let chunk_size = self.config.chunk_size;
        let mut source = (&first[..]).chain(reader);
        let mut stats = StreamStats::default();
        self.write_atomic(&self.path_of(&id), |f| {
            stats = stream::encrypt_stream(&mut source, BufWriter::new(f), password, chunk_size)?;
            Ok(())
        })?;
        info!(
            blob = %id,
            bytes = stats.plaintext_bytes,
            chunks = stats.chunks,
            "stored streamed blob"
        );
        Ok(id)
    }

    /// Import a file. Files below the configured threshold use the
    /// single-shot format, larger ones are streamed without being buffered.
    pub fn put_file(&self, source: &Path, password: &str) -> Result<BlobId> {
        let mut file = File::open(source).map_err(|e| VaultError::from_io(e, source))?;
        let len = file
            .metadata()
            .map_err(|e| VaultError::from_io(e, source))?
            .len();

        if len < self.config.stream_threshold {
            let mut plaintext = Vec::with_capacity(len as usize);
            file.read_to_end(&mut plaintext)?;
            return self.put_bytes(&plaintext, password);
        }
        self.put_reader(&mut BufReader::new(file), len, password)
    }

    /// Rewrite an existing blob in place through `write`.
    pub(crate) fn replace_with<F>(&self, id: &BlobId, write: F) -> Result<()>
    where
        F: FnOnce(&mut File) -> Result<()>,
    {
        let current = self.size(id)?;
        self.ensure_space(current)?;
        self.write_atomic(&self.path_of(id), write)
    }

    // -- reads ---------------------------------------------------------------

    /// Raw ciphertext bytes of a blob.
    pub fn get(&self, id: &BlobId) -> Result<Vec<u8>> {
        let path = self.path_of(id);
        fs::read(&path).map_err(|e| VaultError::from_io(e, &path))
    }

    /// Open a blob's ciphertext for reading.
    pub fn open_reader(&self, id: &BlobId) -> Result<BufReader<File>> {
        let path = self.path_of(id);
        let file = File::open(&path).map_err(|e| VaultError::from_io(e, &path))?;
        Ok(BufReader::new(file))
    }

    /// True if the blob is in the streaming format.
    pub fn is_streaming(&self, id: &BlobId) -> Result<bool> {
        let mut magic = [0u8; 4];
        let mut reader = self.open_reader(id)?;
        let mut filled = 0;
        while filled < magic.len() {
            match reader.read(&mut magic[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(stream::is_stream_format(&magic[..filled]))
    }

    /// Decrypt a blob of either format into memory.
    pub fn get_decrypted(&self, id: &BlobId, password: &str) -> Result<Vec<u8>> {
        let mut reader = self.open_reader(id)?;
        let mut plaintext = Vec::new();
        stream::decrypt_stream(&mut reader, &mut plaintext, password)?;
        Ok(plaintext)
    }

    /// Decrypt a blob into a fresh temp file for a viewer.
    ///
    /// `extension_hint` (e.g. `"mp4"`) becomes the file's extension when it
    /// is short and alphanumeric, so players can sniff the type.
    pub fn open_decrypted_temp(
        &self,
        id: &BlobId,
        password: &str,
        extension_hint: Option<&str>,
    ) -> Result<DecryptedTemp> {
        let mut reader = self.open_reader(id)?;

        let dir = self.decrypted_dir();
        fs::create_dir_all(&dir).map_err(|e| VaultError::from_io(e, &dir))?;
        let suffix = extension_hint
            .filter(|ext| {
                !ext.is_empty()
                    && ext.len() <= MAX_EXTENSION_LEN
                    && ext.bytes().all(|b| b.is_ascii_alphanumeric())
            })
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        let mut temp = tempfile::Builder::new()
            .prefix("plain-")
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| VaultError::from_io(e, &dir))?;

        // On failure `temp` drops here and takes the partial file with it.
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            stream::decrypt_stream(&mut reader, &mut writer, password)?;
            writer.flush()?;
        }

        debug!(blob = %id, "opened decrypted temp file");
        Ok(DecryptedTemp {
            path: temp.into_temp_path(),
        })
    }

    // -- metadata ------------------------------------------------------------

    pub fn exists(&self, id: &BlobId) -> Result<bool> {
        let path = self.path_of(id);
        path.try_exists().map_err(|e| VaultError::from_io(e, &path))
    }

    /// Size of the stored ciphertext in bytes.
    pub fn size(&self, id: &BlobId) -> Result<u64> {
        let path = self.path_of(id);
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| VaultError::from_io(e, &path))
    }

    /// Every blob in the store, sorted by id.
    pub fn list(&self) -> Result<Vec<BlobId>> {
        let entries = fs::read_dir(&self.root).map_err(|e| VaultError::from_io(e, &self.root))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| BlobId::parse(n).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove a blob. Removing a blob that does not exist succeeds.
    pub fn delete(&self, id: &BlobId) -> Result<()> {
        let path = self.path_of(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(blob = %id, "deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::from_io(e, &path)),
        }
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore").field("root", &self.root).finish()
    }
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
fn free_space(dir: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(dir.as_os_str().as_bytes()).ok()?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL-terminated and `stat` is a valid out-pointer.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return None;
    }
    // SAFETY: statvfs returned 0, so it initialised `stat`.
    let stat = unsafe { stat.assume_init() };
    Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
fn free_space(_dir: &Path) -> Option<u64> {
    None
}
