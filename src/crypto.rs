//! Low-level authenticated encryption and the single-shot blob format.
//!
//! This module is one of exactly two places in the crate that import `ring`
//! directly (the other is `keys`). The streaming codec in `stream` seals and
//! opens its chunks exclusively through the functions exposed here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption, 16-byte tag)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//! - **Key**: 256 bits, derived per blob from the password and a random salt
//!
//! # Single-shot layout
//! ```text
//! [ salt (16) ][ nonce (12) ][ tag (16) ][ ciphertext (N) ]
//! ```
//! There is no length prefix; `N` is the blob length minus 44.

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};

use crate::error::{Result, VaultError};
use crate::keys::{self, DerivedKey, SALT_LEN};
use crate::stream;

/// The AEAD algorithm used throughout sealvault.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Minimum length of a single-shot blob: everything but the ciphertext.
pub const SINGLE_SHOT_HEADER_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// Generate a cryptographically secure random nonce.
///
/// A fresh nonce is generated for every seal. There is no nonce caching or
/// counter-based generation.
pub(crate) fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut buf = [0u8; NONCE_LEN];
    keys::fill_random(&mut buf)?;
    Ok(buf)
}

fn aead_key(key: &DerivedKey) -> Result<LessSafeKey> {
    let unbound =
        UnboundKey::new(ALGORITHM, key.as_bytes()).map_err(|_| VaultError::KeyDerivationFailed)?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `in_out` in place and return the detached tag.
pub(crate) fn seal_detached(
    key: &DerivedKey,
    nonce: [u8; NONCE_LEN],
    aad: &[u8],
    in_out: &mut [u8],
) -> Result<[u8; TAG_LEN]> {
    let tag = aead_key(key)?
        .seal_in_place_separate_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), in_out)
        .map_err(|_| VaultError::EncryptionFailed)?;

    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(tag.as_ref());
    Ok(out)
}

/// Authenticate and decrypt `ciphertext_and_tag` in place.
///
/// Returns the plaintext prefix of the buffer. A tag mismatch is always
/// `DataCorrupted`, whatever the cause.
pub(crate) fn open_detached<'a>(
    key: &DerivedKey,
    nonce: [u8; NONCE_LEN],
    aad: &[u8],
    ciphertext_and_tag: &'a mut [u8],
) -> Result<&'a mut [u8]> {
    aead_key(key)?
        .open_in_place(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(aad),
            ciphertext_and_tag,
        )
        .map_err(|_| VaultError::DataCorrupted)
}

/// Encrypt `plaintext` under `password` into the single-shot format.
///
/// Every call draws a fresh salt and nonce, so two encryptions of the same
/// input never produce the same bytes.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(VaultError::InvalidPassword);
    }

    // A salt opening with the stream magic would make the blob read as a
    // stream.
    let mut salt = keys::generate_salt()?;
    while stream::is_stream_format(&salt) {
        salt = keys::generate_salt()?;
    }
    let nonce = generate_nonce()?;
    let key = keys::derive_key(password, &salt)?;

    let mut output = Vec::with_capacity(SINGLE_SHOT_HEADER_LEN + plaintext.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&[0u8; TAG_LEN]);
    output.extend_from_slice(plaintext);

    let tag = seal_detached(&key, nonce, &[], &mut output[SINGLE_SHOT_HEADER_LEN..])?;
    output[SALT_LEN + NONCE_LEN..SINGLE_SHOT_HEADER_LEN].copy_from_slice(&tag);

    Ok(output)
}

/// Decrypt a single-shot blob produced by `encrypt`.
///
/// If the password is wrong or any byte has been altered, the GCM check
/// fails and this returns `DataCorrupted`. The caller receives no partial
/// plaintext.
pub fn decrypt(blob: &[u8], password: &str) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(VaultError::InvalidPassword);
    }
    if blob.len() < SINGLE_SHOT_HEADER_LEN {
        return Err(VaultError::InvalidData);
    }

    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce, rest) = rest.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| VaultError::InvalidData)?;
    let key = keys::derive_key(password, salt)?;

    // ring expects the tag appended to the ciphertext.
    let mut payload = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    payload.extend_from_slice(ciphertext);
    payload.extend_from_slice(tag);

    let plaintext_len = open_detached(&key, nonce, &[], &mut payload)?.len();
    payload.truncate(plaintext_len);
    Ok(payload)
}
