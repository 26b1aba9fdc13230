//! Payload obfuscation with a caller-owned key.
//!
//! The transform XORs every byte with a keystream derived from the key: byte `i` uses
//! `key[i % len]` plus the number of times the key has wrapped so far. XOR makes it an
//! involution, so encryption and decryption are the same operation and the buffer
//! length never changes. This hides payloads from casual listeners on the band; it
//! does not authenticate anything.
use crate::error::CipherError;

/// Keystream transform applied in place.
pub fn apply_keystream(key: &[u8], msg: &mut [u8]) {
    if key.is_empty() {
        return;
    }
    for (i, byte) in msg.iter_mut().enumerate() {
        let round = (i / key.len()) as u8;
        *byte ^= key[i % key.len()].wrapping_add(round.wrapping_mul(0x9D));
    }
}

/// Cipher state of a server: an on/off switch and a borrowed key.
///
/// The key is never copied. The caller keeps it alive for `'k` and swaps it through
/// [set_key](Cipher::set_key) when it wants to rotate it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cipher<'k> {
    enabled: bool,
    key: Option<&'k [u8]>,
}

impl<'k> Cipher<'k> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&mut self, key: &'k [u8]) -> Result<(), CipherError> {
        if key.is_empty() {
            return Err(CipherError::EmptyKey);
        }
        self.key = Some(key);
        Ok(())
    }

    pub fn key(&self) -> Option<&'k [u8]> {
        self.key
    }

    /// Turns encryption on or off. Turning it on without a key is refused.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), CipherError> {
        if enabled && self.key.is_none() {
            return Err(CipherError::MissingKey);
        }
        self.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks that the current state can be used for a session.
    pub fn ensure_ready(&self) -> Result<(), CipherError> {
        if self.enabled && self.key.is_none() {
            return Err(CipherError::MissingKey);
        }
        Ok(())
    }

    pub fn encrypt(&self, msg: &mut [u8]) {
        if let (true, Some(key)) = (self.enabled, self.key) {
            apply_keystream(key, msg);
        }
    }

    pub fn decrypt(&self, msg: &mut [u8]) {
        self.encrypt(msg)
    }
}
