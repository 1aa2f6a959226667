use std::num::NonZeroU32;

use rand::{Rng, RngCore};
use ring::pbkdf2;

use crate::consts::{KEY_LEN, PBKDF2_ITERATIONS};

/// PBKDF2-HMAC-SHA256 over the password and the session salt.
pub fn derive_key(password: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    derive_key_with_iterations(password, salt, PBKDF2_ITERATIONS)
}

pub fn derive_key_with_iterations(password: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let iterations = NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN);
    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password,
        &mut key,
    );
    key
}

pub fn fill_random(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// Random password drawn from letters, digits and a few symbols.
pub fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";
    let len = len.max(16);
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf2_sha256_vectors() {
        assert_eq!(
            derive_key_with_iterations(b"password", b"salt", 1),
            [
                0x12, 0x0f, 0xb6, 0xcf, 0xfc, 0xf8, 0xb3, 0x2c, 0x43, 0xe7, 0x22, 0x52, 0x56, 0xc4,
                0xf8, 0x37, 0xa8, 0x65, 0x48, 0xc9, 0x2c, 0xcc, 0x35, 0x48, 0x08, 0x05, 0x98, 0x7c,
                0xb7, 0x0b, 0xe1, 0x7b
            ]
        );
        assert_eq!(
            derive_key_with_iterations(b"password", b"salt", 2),
            [
                0xae, 0x4d, 0x0c, 0x95, 0xaf, 0x6b, 0x46, 0xd3, 0x2d, 0x0a, 0xdf, 0xf9, 0x28, 0xf0,
                0x6d, 0xd0, 0x2a, 0x30, 0x3f, 0x8e, 0xf3, 0xc2, 0x51, 0xdf, 0xd6, 0xe2, 0xd8, 0x5a,
                0x95, 0x47, 0x4c, 0x43
            ]
        );
    }

    #[test]
    fn test_derive_key_depends_on_salt() {
        let a = derive_key(b"123456", &[0u8; 32]);
        let b = derive_key(b"123456", &[1u8; 32]);
        assert_ne!(a, b);
        assert_eq!(a, derive_key(b"123456", &[0u8; 32]));
    }

    #[test]
    fn test_generate_password() {
        let p = generate_password(32);
        assert_eq!(p.len(), 32);
        assert_eq!(generate_password(4).len(), 16);
        assert_ne!(generate_password(32), p);
    }
}
