//! Append-only journal of vault events.
//!
//! Records what happened and when, never with what: no passwords, secrets
//! or plaintext ever reach a record. Blob ids and sizes are the most a
//! record carries. Supports pluggable sinks for persisting records.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, VaultError};

/// Something that changed the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    Initialized,
    LoginPasswordChanged,
    GuestPasswordSet,
    GuestPasswordCleared,
    DisguisePasswordSet,
    DisguisePasswordCleared,
    Reset,
    BlobStored { blob: String, bytes: u64 },
    BlobDeleted { blob: String },
    ReencryptionCompleted { blobs: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    #[serde(flatten)]
    pub event: VaultEvent,
    pub timestamp: DateTime<Utc>,
}

impl JournalRecord {
    pub fn now(event: VaultEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Receives a copy of every journal record.
pub trait JournalSink: Send {
    fn append(&mut self, record: &JournalRecord);
}

/// In-memory journal that forwards to any attached sinks.
#[derive(Default)]
pub struct Journal {
    records: Vec<JournalRecord>,
    sinks: Vec<Box<dyn JournalSink>>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("records", &self.records.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn JournalSink>) {
        self.sinks.push(sink);
    }

    pub fn record(&mut self, event: VaultEvent) {
        let record = JournalRecord::now(event);
        for sink in &mut self.sinks {
            sink.append(&record);
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, JournalRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&JournalRecord> {
        self.records.last()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Appends records to a file as JSON lines.
pub struct FileJournalSink {
    file: File,
}

impl FileJournalSink {
    /// Open or create `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| VaultError::from_io(e, path))?;
        Ok(Self { file })
    }

    /// Read back every record in a journal file.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| VaultError::from_io(e, path))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line).map_err(|_| VaultError::InvalidData)?);
        }
        Ok(records)
    }
}

impl JournalSink for FileJournalSink {
    fn append(&mut self, record: &JournalRecord) {
        let written = serde_json::to_string(record)
            .map_err(std::io::Error::other)
            .and_then(|line| {
                writeln!(self.file, "{line}")?;
                self.file.flush()
            });
        if let Err(e) = written {
            warn!(error = %e, "failed to append journal record");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Collect(Arc<Mutex<Vec<VaultEvent>>>);

    impl JournalSink for Collect {
        fn append(&mut self, record: &JournalRecord) {
            self.0.lock().unwrap().push(record.event.clone());
        }
    }

    #[test]
    fn test_records_are_forwarded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut journal = Journal::new();
        journal.add_sink(Box::new(Collect(Arc::clone(&seen))));

        journal.record(VaultEvent::Initialized);
        journal.record(VaultEvent::BlobDeleted { blob: "x.enc".into() });

        assert_eq!(journal.len(), 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(
            journal.last().map(|r| &r.event),
            Some(&VaultEvent::BlobDeleted { blob: "x.enc".into() })
        );
    }

    #[test]
    fn test_file_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let mut journal = Journal::new();
        journal.add_sink(Box::new(FileJournalSink::open(&path).unwrap()));
        journal.record(VaultEvent::BlobStored {
            blob: "a.enc".into(),
            bytes: 12,
        });
        journal.record(VaultEvent::ReencryptionCompleted { blobs: 3 });

        let records = FileJournalSink::read_all(&path).unwrap();
        let events: Vec<_> = records.into_iter().map(|r| r.event).collect();
        assert_eq!(
            events,
            vec![
                VaultEvent::BlobStored {
                    blob: "a.enc".into(),
                    bytes: 12
                },
                VaultEvent::ReencryptionCompleted { blobs: 3 },
            ]
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.lines().next().unwrap().contains(r#""event":"blob_stored""#));
    }
}
