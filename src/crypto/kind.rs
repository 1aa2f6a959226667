use std::{fmt::Debug, str::FromStr};

use ring::aead::{Algorithm, AES_256_GCM, CHACHA20_POLY1305};
use serde::{Deserialize, Serialize};

use crate::consts::Error;

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum CipherKind {
    #[serde(rename = "aes-256-gcm")]
    AES_256_GCM,
    #[serde(rename = "chacha20-poly1305")]
    CHACHA20_POLY1305,
}

impl CipherKind {
    pub fn algorithm(&self) -> &'static Algorithm {
        match self {
            CipherKind::AES_256_GCM => &AES_256_GCM,
            CipherKind::CHACHA20_POLY1305 => &CHACHA20_POLY1305,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::AES_256_GCM => "aes-256-gcm",
            CipherKind::CHACHA20_POLY1305 => "chacha20-poly1305",
        }
    }
    pub fn nonce_len(&self) -> usize {
        self.algorithm().nonce_len()
    }
    pub fn key_len(&self) -> usize {
        self.algorithm().key_len()
    }
    pub fn tag_len(&self) -> usize {
        self.algorithm().tag_len()
    }
    /// Largest plaintext that still fits the 2-byte length field once the tag is appended.
    pub fn max_payload_size(&self) -> usize {
        crate::consts::MAX_FRAME_LEN - self.tag_len()
    }
}

impl FromStr for CipherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(CipherKind::AES_256_GCM),
            "chacha20-poly1305" => Ok(CipherKind::CHACHA20_POLY1305),
            other => Err(Error::UnsupportedCipherMethod(other.to_owned())),
        }
    }
}

impl Debug for CipherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
