//! Bulk re-encryption of stored blobs from one password to another.
//!
//! Blobs are processed one at a time; each is fully rewritten and renamed
//! into place before the next starts. The first failure aborts the pass and
//! names the blob, since a store split across two passwords is only
//! recoverable if the caller knows where the split is.

use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::blob_store::{BlobId, BlobStore};
use crate::crypto;
use crate::error::{Result, VaultError};
use crate::stream::{self, StreamSealer};

/// Cooperative cancellation for a re-encryption pass. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Honoured at the next batch boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reported after every re-encrypted blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReencryptProgress {
    pub completed: usize,
    pub total: usize,
}

/// Clears the running flag on every exit path.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reencryptor {
    store: Arc<BlobStore>,
    running: AtomicBool,
}

impl Reencryptor {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Re-encrypt every blob in `ids` from `old` to `new`, in order.
    ///
    /// Returns the number of blobs rewritten. A second call while a pass is
    /// running fails with `AlreadyInProgress`.
    pub fn reencrypt_all<F>(
        &self,
        ids: &[BlobId],
        old: &str,
        new: &str,
        cancel: &CancelFlag,
        mut progress: F,
    ) -> Result<usize>
    where
        F: FnMut(ReencryptProgress),
    {
        if old.is_empty() || new.is_empty() {
            return Err(VaultError::InvalidPassword);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VaultError::AlreadyInProgress);
        }
        let _guard = RunGuard(&self.running);

        let config = self.store.config();
        let total = ids.len();
        let mut completed = 0;
        info!(total, batch = config.reencrypt_batch_size, "re-encryption started");

        for (index, batch) in ids.chunks(config.reencrypt_batch_size.max(1)).enumerate() {
            if index > 0 {
                thread::sleep(config.batch_pause());
            }
            if cancel.is_cancelled() {
                warn!(completed, total, "re-encryption cancelled");
                return Err(VaultError::Cancelled { completed });
            }

            for id in batch {
                if let Err(source) = self.reencrypt_one(id, old, new) {
                    warn!(blob = %id, completed, "re-encryption aborted");
                    return Err(VaultError::ReencryptionFailed {
                        blob: id.to_string(),
                        completed,
                        source: Box::new(source),
                    });
                }
                completed += 1;
                progress(ReencryptProgress { completed, total });
            }
            debug!(batch = index, completed, "re-encryption batch done");
        }

        info!(completed, "re-encryption finished");
        Ok(completed)
    }

    /// Rewrite one blob under `new`, keeping its format.
    pub fn reencrypt_one(&self, id: &BlobId, old: &str, new: &str) -> Result<()> {
        if self.store.is_streaming(id)? {
            let mut reader = self.store.open_reader(id)?;
            let chunk_size = self.store.config().chunk_size;
            self.store.replace_with(id, |file| {
                let mut sealer = StreamSealer::new(BufWriter::new(file), new, chunk_size)?;
                stream::decrypt_stream(&mut reader, &mut sealer, old)?;
                sealer.finish()?;
                Ok(())
            })
        } else {
            let blob = self.store.get(id)?;
            let plaintext = Zeroizing::new(crypto::decrypt(&blob, old)?);
            let sealed = crypto::encrypt(&plaintext, new)?;
            self.store.replace_with(id, |file| Ok(file.write_all(&sealed)?))
        }
    }
}

impl std::fmt::Debug for Reencryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reencryptor")
            .field("running", &self.is_running())
            .finish()
    }
}
