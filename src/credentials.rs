//! The credential vault: login verification and the content-secret hierarchy.
//!
//! ```text
//! login password ──PBKDF2──▶ loginVerifierHash        (checks the password)
//! login password ──encrypt─▶ wrappedContentSecret     (unwraps the secret)
//! content secret ──encrypt─▶ every blob payload
//! ```
//!
//! The content secret is the only key that ever encrypts blob payloads.
//! Changing the login password re-wraps that one fixed-size secret and never
//! touches a blob.
//!
//! Guest and disguise passwords are independent sub-credentials. A guest
//! password is a 6 to 8 digit PIN that may not equal the login password. A
//! disguise password is numeric (decimal points allowed) and is wrapped under
//! a device-derived secret so it can be checked before any login.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto;
use crate::device::DeviceIdentity;
use crate::error::{Result, VaultError};
use crate::keys::{self, PasswordVerifier};
use crate::secure_store::{field, SecureStore};

const FLAG_SET: [u8; 1] = [1];

/// Inclusive length bounds of a guest PIN.
pub const GUEST_PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=8;

/// Where a vault sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Uninitialized,
    Active,
}

/// Key-hierarchy manager over a secure store.
#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn SecureStore>,
    device: Arc<dyn DeviceIdentity>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn SecureStore>, device: Arc<dyn DeviceIdentity>) -> Self {
        Self { store, device }
    }

    fn flag(&self, key: &str) -> Result<bool> {
        Ok(self.store.get(key)?.as_deref() == Some(&FLAG_SET[..]))
    }

    fn verifier(&self, hash_key: &str, salt_key: &str) -> Result<Option<PasswordVerifier>> {
        match (self.store.get(hash_key)?, self.store.get(salt_key)?) {
            (Some(hash), Some(salt)) => PasswordVerifier::from_parts(&salt, &hash).map(Some),
            _ => Ok(None),
        }
    }

    fn login_verifier(&self) -> Result<PasswordVerifier> {
        if !self.is_initialized()? {
            return Err(VaultError::NotInitialized);
        }
        self.verifier(field::LOGIN_VERIFIER_HASH, field::LOGIN_SALT)?
            .ok_or(VaultError::NotInitialized)
    }

    fn guest_verifier(&self) -> Result<Option<PasswordVerifier>> {
        if !self.is_guest_set()? {
            return Ok(None);
        }
        self.verifier(field::GUEST_VERIFIER_HASH, field::GUEST_SALT)
    }

    pub fn is_initialized(&self) -> Result<bool> {
        self.flag(field::IS_LOGIN_SET)
    }

    pub fn state(&self) -> Result<VaultState> {
        Ok(if self.is_initialized()? {
            VaultState::Active
        } else {
            VaultState::Uninitialized
        })
    }

    // -----------------------------------------------------------------------
    // Primary credential
    // -----------------------------------------------------------------------

    /// First-time setup. Generates the content secret, stores the login
    /// verifier and the wrapped secret, and returns the secret.
    pub fn setup(&self, login_password: &str) -> Result<Zeroizing<String>> {
        if login_password.is_empty() {
            return Err(VaultError::InvalidPassword);
        }
        if self.is_initialized()? {
            return Err(VaultError::AlreadyInitialized);
        }

        let secret = keys::generate_content_secret()?;
        let verifier = PasswordVerifier::compute(login_password)?;
        let wrapped = crypto::encrypt(secret.as_bytes(), login_password)?;

        self.store.set_many(&[
            (field::LOGIN_VERIFIER_HASH, &verifier.hash()[..]),
            (field::LOGIN_SALT, &verifier.salt()[..]),
            (field::WRAPPED_CONTENT_SECRET, &wrapped[..]),
            (field::IS_LOGIN_SET, &FLAG_SET[..]),
        ])?;

        info!("credential vault initialized");
        Ok(secret)
    }

    /// Check a candidate login password.
    ///
    /// `delay` is imposed by the caller's brute-force policy and is slept on
    /// every call, match or not.
    pub fn verify(&self, candidate: &str, delay: Duration) -> Result<bool> {
        let verifier = self.login_verifier()?;
        let matched = verifier.matches(candidate);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        debug!(matched, "login verification");
        Ok(matched)
    }

    /// Recover the content secret with the login password.
    ///
    /// A credential created before the content secret existed has no wrapped
    /// secret; for it the login password itself is the content secret, and
    /// its wrapped form is persisted on this first unwrap.
    pub fn unwrap_content_secret(&self, login_password: &str) -> Result<Zeroizing<String>> {
        if login_password.is_empty() {
            return Err(VaultError::InvalidPassword);
        }

        match self.store.get(field::WRAPPED_CONTENT_SECRET)? {
            Some(wrapped) => decode_secret(crypto::decrypt(&wrapped, login_password)?),
            None => {
                if !self.login_verifier()?.matches(login_password) {
                    return Err(VaultError::DataCorrupted);
                }
                let wrapped = crypto::encrypt(login_password.as_bytes(), login_password)?;
                self.store.set(field::WRAPPED_CONTENT_SECRET, &wrapped)?;
                warn!("migrated legacy credential to wrapped content secret");
                Ok(Zeroizing::new(login_password.to_string()))
            }
        }
    }

    /// Rotate the login password. The content secret is re-wrapped, not
    /// regenerated, and is returned so the caller's session stays valid.
    pub fn change_login_password(&self, old: &str, new: &str) -> Result<Zeroizing<String>> {
        if new.is_empty() {
            return Err(VaultError::InvalidPassword);
        }
        if !self.login_verifier()?.matches(old) {
            return Err(VaultError::DataCorrupted);
        }
        if let Some(guest) = self.guest_verifier()? {
            if guest.matches(new) {
                return Err(VaultError::InvalidPassword);
            }
        }

        let secret = self.unwrap_content_secret(old)?;
        let verifier = PasswordVerifier::compute(new)?;
        let wrapped = crypto::encrypt(secret.as_bytes(), new)?;

        self.store.set_many(&[
            (field::LOGIN_VERIFIER_HASH, &verifier.hash()[..]),
            (field::LOGIN_SALT, &verifier.salt()[..]),
            (field::WRAPPED_CONTENT_SECRET, &wrapped[..]),
        ])?;

        info!("login password changed");
        Ok(secret)
    }

    // -----------------------------------------------------------------------
    // Guest credential
    // -----------------------------------------------------------------------

    pub fn is_guest_set(&self) -> Result<bool> {
        self.flag(field::IS_GUEST_SET)
    }

    pub fn set_guest_password(&self, guest: &str) -> Result<()> {
        if !GUEST_PASSWORD_LEN.contains(&guest.len()) || !guest.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(VaultError::InvalidPassword);
        }
        if self.login_verifier()?.matches(guest) {
            return Err(VaultError::InvalidPassword);
        }

        let verifier = PasswordVerifier::compute(guest)?;
        self.store.set_many(&[
            (field::GUEST_VERIFIER_HASH, &verifier.hash()[..]),
            (field::GUEST_SALT, &verifier.salt()[..]),
            (field::IS_GUEST_SET, &FLAG_SET[..]),
        ])?;
        info!("guest password set");
        Ok(())
    }

    /// Check a candidate guest password. False when no guest password is set.
    pub fn verify_guest(&self, candidate: &str, delay: Duration) -> Result<bool> {
        let matched = match self.guest_verifier()? {
            Some(verifier) => verifier.matches(candidate),
            None => false,
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(matched)
    }

    pub fn clear_guest_password(&self) -> Result<()> {
        self.store.delete_many(&[
            field::GUEST_VERIFIER_HASH,
            field::GUEST_SALT,
            field::IS_GUEST_SET,
        ])?;
        info!("guest password cleared");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Disguise credential
    // -----------------------------------------------------------------------

    pub fn is_disguise_set(&self) -> Result<bool> {
        self.flag(field::IS_DISGUISE_SET)
    }

    pub fn set_disguise_password(&self, disguise: &str) -> Result<()> {
        if disguise.is_empty() || !disguise.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            return Err(VaultError::InvalidPassword);
        }
        let device_secret = keys::device_secret(&self.device.device_id()?);
        let wrapped = crypto::encrypt(disguise.as_bytes(), &device_secret)?;

        self.store.set_many(&[
            (field::WRAPPED_DISGUISE_SECRET, &wrapped[..]),
            (field::IS_DISGUISE_SET, &FLAG_SET[..]),
        ])?;
        info!("disguise password set");
        Ok(())
    }

    /// Unwrap the stored disguise password. `None` when none is set.
    pub fn reveal_disguise_password(&self) -> Result<Option<Zeroizing<String>>> {
        if !self.is_disguise_set()? {
            return Ok(None);
        }
        let Some(wrapped) = self.store.get(field::WRAPPED_DISGUISE_SECRET)? else {
            return Ok(None);
        };
        let device_secret = keys::device_secret(&self.device.device_id()?);
        decode_secret(crypto::decrypt(&wrapped, &device_secret)?).map(Some)
    }

    pub fn verify_disguise(&self, candidate: &str) -> Result<bool> {
        Ok(match self.reveal_disguise_password()? {
            Some(stored) => stored.as_bytes().ct_eq(candidate.as_bytes()).into(),
            None => false,
        })
    }

    pub fn clear_disguise_password(&self) -> Result<()> {
        self.store
            .delete_many(&[field::WRAPPED_DISGUISE_SECRET, field::IS_DISGUISE_SET])?;
        info!("disguise password cleared");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    /// Delete every stored field. The vault returns to `Uninitialized` and
    /// anything encrypted under the old content secret is unrecoverable.
    pub fn reset(&self) -> Result<()> {
        self.store.delete_many(&field::ALL)?;
        warn!("credential vault wiped");
        Ok(())
    }
}

/// Interpret decrypted bytes as a UTF-8 secret, wiping them on failure.
fn decode_secret(raw: Vec<u8>) -> Result<Zeroizing<String>> {
    match String::from_utf8(raw) {
        Ok(secret) => Ok(Zeroizing::new(secret)),
        Err(e) => {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            Err(VaultError::DataCorrupted)
        }
    }
}
