//! Full lifecycle through the `Vault` service object.

use std::fs;
use std::sync::Arc;

use sealvault::{
    FileJournalSink, FileSecureStore, InstallIdentity, Vault, VaultConfig, VaultEvent,
};

fn open(dir: &std::path::Path) -> Vault {
    let store = Arc::new(FileSecureStore::open(dir, "vault").unwrap());
    let device = Arc::new(InstallIdentity::new(dir.join("install-id")));
    let config = VaultConfig {
        min_free_space: 0,
        ..VaultConfig::default()
    };
    Vault::open(dir, store, device, config).unwrap()
}

#[test]
fn test_setup_import_rotate_read() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("movie.bin");
    let payload: Vec<u8> = (0..10_000_000u32).map(|i| (i ^ (i >> 8)) as u8).collect();
    fs::write(&source, &payload).unwrap();

    let mut vault = open(dir.path());
    vault.setup("correct-horse").unwrap();

    let id = vault.import_file(&source).unwrap();
    assert!(vault.blobs().is_streaming(&id).unwrap());
    assert_eq!(vault.read(&id).unwrap(), payload);
    {
        let temp = vault.open_temp(&id, Some("bin")).unwrap();
        assert_eq!(fs::read(temp.path()).unwrap(), payload);
    }

    let ciphertext_before = vault.blobs().get(&id).unwrap();
    vault
        .change_login_password("correct-horse", "new-pass")
        .unwrap();

    // Rotation does not touch the blob.
    assert_eq!(vault.blobs().get(&id).unwrap(), ciphertext_before);
    assert_eq!(vault.read(&id).unwrap(), payload);

    // A fresh process unlocks with the new password only.
    drop(vault);
    let mut vault = open(dir.path());
    assert!(vault
        .credentials()
        .unwrap_content_secret("correct-horse")
        .unwrap_err()
        .is_authentication_failure());
    assert!(vault.unlock("correct-horse").is_err());
    vault.unlock("new-pass").unwrap();
    assert_eq!(vault.read(&id).unwrap(), payload);
}

#[test]
fn test_journal_file_records_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.jsonl");

    let mut vault = open(dir.path());
    vault
        .journal_mut()
        .add_sink(Box::new(FileJournalSink::open(&journal_path).unwrap()));
    vault.setup("pw").unwrap();
    let id = vault.import_bytes(b"note").unwrap();
    vault.set_guest_password("192837").unwrap();
    vault.change_login_password("pw", "pw2").unwrap();
    vault.remove(&id).unwrap();
    vault.reset().unwrap();

    let events: Vec<_> = FileJournalSink::read_all(&journal_path)
        .unwrap()
        .into_iter()
        .map(|r| r.event)
        .collect();
    assert_eq!(
        events,
        vec![
            VaultEvent::Initialized,
            VaultEvent::BlobStored {
                blob: id.to_string(),
                bytes: 4
            },
            VaultEvent::GuestPasswordSet,
            VaultEvent::LoginPasswordChanged,
            VaultEvent::BlobDeleted { blob: id.to_string() },
            VaultEvent::Reset,
        ]
    );
}

#[cfg(feature = "reencrypt")]
#[test]
fn test_reencrypt_through_vault_is_journaled() {
    use sealvault::CancelFlag;

    let dir = tempfile::tempdir().unwrap();
    let mut vault = open(dir.path());
    vault.setup("pw").unwrap();
    let id = vault.blobs().put_bytes(b"direct", "legacy-pass").unwrap();

    let done = vault
        .reencrypt_all(&[id.clone()], "legacy-pass", "fresh-pass", &CancelFlag::new(), |_| {})
        .unwrap();
    assert_eq!(done, 1);
    assert_eq!(vault.blobs().get_decrypted(&id, "fresh-pass").unwrap(), b"direct");
    assert_eq!(
        vault.journal().last().map(|r| r.event.clone()),
        Some(VaultEvent::ReencryptionCompleted { blobs: 1 })
    );
}

#[cfg(feature = "reencrypt")]
#[test]
fn test_reencrypt_skips_content_secret_blobs_left_out_of_the_pass() {
    use sealvault::CancelFlag;

    let dir = tempfile::tempdir().unwrap();
    let mut vault = open(dir.path());
    vault.setup("pw").unwrap();
    let current = vault.import_bytes(b"under the content secret").unwrap();
    let legacy = vault.blobs().put_bytes(b"under a password", "legacy-pass").unwrap();

    let done = vault
        .reencrypt_all(&[legacy.clone()], "legacy-pass", "fresh-pass", &CancelFlag::new(), |_| {})
        .unwrap();
    assert_eq!(done, 1);
    assert_eq!(vault.read(&current).unwrap(), b"under the content secret");
    assert_eq!(
        vault.blobs().get_decrypted(&legacy, "fresh-pass").unwrap(),
        b"under a password"
    );
}
