use std::fmt;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use tracing::trace;

use super::{kind::CipherKind, util};
use crate::consts::{Error, SALT_LEN};

/// One AEAD key for one link, derived from the shared password and the link's salt.
///
/// Every frame carries its own random nonce, so the same session seals both
/// directions of a link. Sessions are never shared across connections.
pub struct Session {
    kind: CipherKind,
    key: LessSafeKey,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl Session {
    /// Starts a session as the initiator: a fresh random salt is generated and
    /// must be written to the peer before the first frame.
    pub fn new(password: &str, kind: CipherKind) -> Result<(Session, [u8; SALT_LEN]), Error> {
        let mut salt = [0u8; SALT_LEN];
        util::fill_random(&mut salt);
        trace!("generated AEAD cipher salt {:?}", salt);
        let session = Self::from_salt(password, kind, &salt)?;
        Ok((session, salt))
    }

    /// Same derivation as [`Session::new`], for the side that read the salt from its peer.
    pub fn from_salt(password: &str, kind: CipherKind, salt: &[u8]) -> Result<Session, Error> {
        let key = util::derive_key(password.as_bytes(), salt);
        let unbound = UnboundKey::new(kind.algorithm(), &key).map_err(Error::CipherError)?;
        Ok(Session {
            kind,
            key: LessSafeKey::new(unbound),
        })
    }

    /// Session for a method given by name, e.g. `"chacha20-poly1305"`.
    pub fn from_method(password: &str, method: &str, salt: &[u8]) -> Result<Session, Error> {
        Self::from_salt(password, method.parse()?, salt)
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn nonce_len(&self) -> usize {
        self.kind.nonce_len()
    }

    pub fn overhead(&self) -> usize {
        self.kind.tag_len()
    }

    pub fn random_nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        util::fill_random(&mut nonce);
        nonce
    }

    /// Encrypts `plaintext`, returning ciphertext with the tag appended.
    pub fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(Error::CipherError)?;
        let mut in_out = Vec::with_capacity(plaintext.len() + self.overhead());
        in_out.extend_from_slice(plaintext);
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(Error::CipherError)?;
        Ok(in_out)
    }

    /// Decrypts and authenticates `ciphertext` (tag included).
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < self.overhead() {
            return Err(Error::CiphertextTooShort {
                len: ciphertext.len(),
                min: self.overhead(),
            });
        }
        let nonce =
            Nonce::try_assume_unique_for_key(nonce).map_err(|_| Error::AuthenticationFailed)?;
        let mut in_out = ciphertext.to_vec();
        let len = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::AuthenticationFailed)?
            .len();
        in_out.truncate(len);
        Ok(in_out)
    }
}
