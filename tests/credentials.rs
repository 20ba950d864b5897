//! Credential vault behaviour over the file-backed store, across reopen.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sealvault::secure_store::field;
use sealvault::{
    CredentialVault, FileSecureStore, InstallIdentity, SecureStore, VaultError, VaultState,
};

fn open(dir: &std::path::Path) -> (CredentialVault, Arc<FileSecureStore>) {
    let store = Arc::new(FileSecureStore::open(dir, "creds").unwrap());
    let device = Arc::new(InstallIdentity::new(dir.join("install-id")));
    (CredentialVault::new(store.clone(), device), store)
}

#[test]
fn test_credentials_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let secret = {
        let (vault, _) = open(dir.path());
        let secret = vault.setup("correct-horse").unwrap();
        vault.set_guest_password("135790").unwrap();
        vault.set_disguise_password("0.5").unwrap();
        secret
    };

    let (vault, _) = open(dir.path());
    assert_eq!(vault.state().unwrap(), VaultState::Active);
    assert_eq!(*vault.unwrap_content_secret("correct-horse").unwrap(), *secret);
    assert!(vault.verify_guest("135790", Duration::ZERO).unwrap());
    assert!(vault.verify_disguise("0.5").unwrap());
}

#[test]
fn test_stored_values_hold_no_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, store) = open(dir.path());
    let secret = vault.setup("correct-horse").unwrap();
    vault.set_disguise_password("777").unwrap();

    let raw = std::fs::read(store.path()).unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert!(!text.contains("correct-horse"));
    assert!(!text.contains(secret.as_str()));
    assert!(!text.contains(&hex::encode(secret.as_bytes())));

    let wrapped = store.get(field::WRAPPED_CONTENT_SECRET).unwrap().unwrap();
    assert!(!wrapped
        .windows(secret.len())
        .any(|w| w == secret.as_bytes()));
}

#[test]
fn test_rotation_returns_identical_secret() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, _) = open(dir.path());
    vault.setup("first").unwrap();

    let before = vault.unwrap_content_secret("first").unwrap();
    let returned = vault.change_login_password("first", "second").unwrap();
    let after = vault.unwrap_content_secret("second").unwrap();

    assert_eq!(*before, *returned);
    assert_eq!(*before, *after);
    assert!(vault
        .unwrap_content_secret("first")
        .unwrap_err()
        .is_authentication_failure());
}

#[test]
fn test_wrong_old_password_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, store) = open(dir.path());
    vault.setup("first").unwrap();
    let wrapped = store.get(field::WRAPPED_CONTENT_SECRET).unwrap();

    assert!(vault.change_login_password("guess", "second").is_err());
    assert_eq!(store.get(field::WRAPPED_CONTENT_SECRET).unwrap(), wrapped);
    assert!(vault.verify("first", Duration::ZERO).unwrap());
}

#[test]
fn test_verify_always_waits_the_delay() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, _) = open(dir.path());
    vault.setup("pw").unwrap();

    let delay = Duration::from_millis(50);
    for candidate in ["pw", "nope"] {
        let start = Instant::now();
        vault.verify(candidate, delay).unwrap();
        assert!(start.elapsed() >= delay, "{candidate}");
    }
}

#[test]
fn test_guest_requires_initialized_vault() {
    let dir = tempfile::tempdir().unwrap();
    let (vault, _) = open(dir.path());
    assert!(matches!(
        vault.set_guest_password("123456"),
        Err(VaultError::NotInitialized)
    ));
    assert!(!vault.verify_guest("123456", Duration::ZERO).unwrap());
}
