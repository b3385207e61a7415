//! Cipher engines and password handling.
//!
//! The engine for an entry is picked once, when the entry is opened, from
//! the encryption method recorded in its header.

mod aes;
mod kdf;
mod zipcrypto;

pub use aes::{AES_BLOCK_SIZE, AUTH_CODE_LENGTH, AesDecrypter, AesEncrypter};
pub use kdf::{AesKeyMaterial, PASSWORD_VERIFIER_LENGTH, PBKDF2_ITERATIONS, derive_aes_keys};
pub use zipcrypto::{ZIPCRYPTO_HEADER_LENGTH, ZipCryptoDecrypter, ZipCryptoEncrypter};

use std::fmt;

use crate::zip::FileHeader;

/// Password bytes as they enter the key schedule.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Vec<u8>);

impl Password {
    /// UTF-8 bytes of `text`, as AES entries and modern tools expect.
    pub fn utf8(text: &str) -> Self {
        Password(text.as_bytes().to_vec())
    }

    /// Low byte of each character, matching legacy tools that never encoded
    /// ZipCrypto passwords.
    pub fn legacy(text: &str) -> Self {
        Password(text.chars().map(|c| c as u32 as u8).collect())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Password(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Supplies the password for an encrypted entry, or `None` if there is none.
pub trait PasswordSupplier {
    fn password(&self, entry: &FileHeader) -> Option<Password>;
}

impl PasswordSupplier for Password {
    fn password(&self, _entry: &FileHeader) -> Option<Password> {
        Some(self.clone())
    }
}

impl<F> PasswordSupplier for F
where
    F: Fn(&FileHeader) -> Option<Password>,
{
    fn password(&self, entry: &FileHeader) -> Option<Password> {
        self(entry)
    }
}

/// For archives known to hold no encrypted entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPassword;

impl PasswordSupplier for NoPassword {
    fn password(&self, _entry: &FileHeader) -> Option<Password> {
        None
    }
}

/// Engine decrypting one entry.
pub enum Decrypter {
    ZipCrypto(ZipCryptoDecrypter),
    Aes(AesDecrypter),
}

impl Decrypter {
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        match self {
            Decrypter::ZipCrypto(d) => d.decrypt(buf),
            Decrypter::Aes(d) => d.decrypt(buf),
        }
    }
}

/// Engine encrypting one entry.
pub enum Encrypter {
    ZipCrypto(ZipCryptoEncrypter),
    Aes(AesEncrypter),
}

impl Encrypter {
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        match self {
            Encrypter::ZipCrypto(e) => e.encrypt(buf),
            Encrypter::Aes(e) => e.encrypt(buf),
        }
    }

    /// Block size the cipher stream must align writes to.
    pub fn block_size(&self) -> usize {
        match self {
            Encrypter::ZipCrypto(_) => 1,
            Encrypter::Aes(_) => AES_BLOCK_SIZE,
        }
    }

    /// Bytes written after the ciphertext.
    pub fn finish(self) -> Vec<u8> {
        match self {
            Encrypter::ZipCrypto(_) => Vec::new(),
            Encrypter::Aes(e) => e.finish().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_password_keeps_low_bytes() {
        assert_eq!(Password::legacy("pä").as_bytes(), &[b'p', 0xE4]);
        assert_eq!(Password::utf8("pä").as_bytes(), "pä".as_bytes());
        assert_eq!(format!("{:?}", Password::utf8("x")), "Password(***)");
    }
}
