//! The unwrapped content secret of an authenticated session.
//!
//! This is the one piece of mutable shared state in the vault. It is owned
//! by whoever holds the `Session`; every replacement and every end of the
//! session zeroes the previous bytes. It is never logged, cloned or
//! serialised.

use zeroize::Zeroizing;

/// Holder for the content secret while a session is active.
#[derive(Default)]
pub struct Session {
    secret: Option<Zeroizing<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with `secret`, zeroing any previous one.
    pub fn begin(&mut self, secret: Zeroizing<String>) {
        // Dropping the old Zeroizing value wipes its buffer.
        self.secret = Some(secret);
    }

    /// Swap in a superseding secret. Equivalent to `begin`.
    pub fn replace(&mut self, secret: Zeroizing<String>) {
        self.begin(secret);
    }

    /// The active content secret, if any.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().map(String::as_str)
    }

    pub fn is_active(&self) -> bool {
        self.secret.is_some()
    }

    /// End the session and wipe the secret.
    pub fn end(&mut self) {
        self.secret = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.is_active())
            .finish()
    }
}
