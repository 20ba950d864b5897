//! Key derivation and ownership.
//!
//! This module owns three responsibilities:
//! 1. Deriving 256-bit AEAD keys from passwords with PBKDF2-HMAC-SHA256.
//! 2. Producing and checking salted password verifiers.
//! 3. Generating the random material the vault needs (salts, content secret).
//!
//! This is one of exactly two modules permitted to import `ring` directly
//! (the other is `crypto`).
//!
//! ## Derivation structure
//!
//! ```text
//! PBKDF2-HMAC-SHA256(
//!     secret     = password (UTF-8),
//!     salt       = 16 random bytes,
//!     iterations = 100_000,
//!     dkLen      = 32
//! )
//! ```
//!
//! Password strength is not policed here. An empty password derives a key
//! like any other; callers that care reject it before reaching this layer.

use std::num::NonZeroU32;

use ring::digest;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Result, VaultError};

/// Size of a derived key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of every salt the vault generates.
pub const SALT_LEN: usize = 16;

/// Fixed PBKDF2 work factor. Changing it breaks every existing blob.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Random bytes behind a freshly generated content secret.
const CONTENT_SECRET_BYTES: usize = 32;

const DEVICE_SECRET_DOMAIN: &[u8] = b"sealvault:disguise:v1:";

fn iterations() -> Result<NonZeroU32> {
    NonZeroU32::new(PBKDF2_ITERATIONS).ok_or(VaultError::KeyDerivationFailed)
}

// ---------------------------------------------------------------------------
// Derived key
// ---------------------------------------------------------------------------

/// A key derived from a password and salt.
///
/// - Not `Clone`. A key lives exactly as long as the operation that needs it.
/// - Zeroised on drop.
/// - Raw bytes never leave the crate.
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    /// Borrow the raw key bytes for use in encrypt/decrypt operations.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derive a 256-bit key from `password` and `salt`.
///
/// Fails with `KeyDerivationFailed` only if the primitive itself cannot run.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<DerivedKey> {
    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations()?,
        salt,
        password.as_bytes(),
        &mut bytes,
    );
    Ok(DerivedKey { bytes })
}

// ---------------------------------------------------------------------------
// Randomness
// ---------------------------------------------------------------------------

/// Fill `buf` from the system CSPRNG.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| VaultError::RandomnessFailure)
}

/// Generate a fresh random salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Generate a new content secret: 32 random bytes in lowercase hex.
///
/// The secret is a password-equivalent string so it can be fed through the
/// same `encrypt`/`decrypt` path as a user password.
pub fn generate_content_secret() -> Result<Zeroizing<String>> {
    let mut raw = Zeroizing::new([0u8; CONTENT_SECRET_BYTES]);
    fill_random(&mut raw[..])?;
    Ok(Zeroizing::new(hex::encode(&raw[..])))
}

/// Turn a stable device identifier into a password-equivalent secret.
///
/// Used to wrap material that must be checkable before any login, so it
/// cannot depend on a user password.
pub(crate) fn device_secret(device_id: &str) -> Zeroizing<String> {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(DEVICE_SECRET_DOMAIN);
    ctx.update(device_id.as_bytes());
    Zeroizing::new(hex::encode(ctx.finish().as_ref()))
}

// ---------------------------------------------------------------------------
// Password verifier
// ---------------------------------------------------------------------------

/// A salted, non-reversible password hash.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordVerifier {
    salt: [u8; SALT_LEN],
    hash: [u8; KEY_LEN],
}

impl PasswordVerifier {
    /// Hash `password` under a fresh random salt.
    pub fn compute(password: &str) -> Result<Self> {
        let salt = generate_salt()?;
        let mut hash = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations()?,
            &salt,
            password.as_bytes(),
            &mut hash,
        );
        Ok(Self { salt, hash })
    }

    /// Rebuild a verifier from persisted salt and hash bytes.
    ///
    /// Returns `InvalidData` if either slice has the wrong length.
    pub fn from_parts(salt: &[u8], hash: &[u8]) -> Result<Self> {
        let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| VaultError::InvalidData)?;
        let hash: [u8; KEY_LEN] = hash.try_into().map_err(|_| VaultError::InvalidData)?;
        Ok(Self { salt, hash })
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn hash(&self) -> &[u8; KEY_LEN] {
        &self.hash
    }

    /// Constant-time check of `candidate` against the stored hash.
    pub fn matches(&self, candidate: &str) -> bool {
        match iterations() {
            Ok(iter) => pbkdf2::verify(
                pbkdf2::PBKDF2_HMAC_SHA256,
                iter,
                &self.salt,
                candidate.as_bytes(),
                &self.hash,
            )
            .is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordVerifier").finish_non_exhaustive()
    }
}
