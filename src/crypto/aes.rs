//! WinZip AES: AES-CTR with a little-endian counter starting at 1, and an
//! HMAC-SHA1 over the ciphertext truncated to 10 bytes.
//!
//! Entry payload layout: `salt | verifier | ciphertext | auth code`.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;

use super::kdf::{AesKeyMaterial, PASSWORD_VERIFIER_LENGTH, derive_aes_keys};
use crate::error::{ZipError, ZipResult};
use crate::zip::AesKeyStrength;

pub const AES_BLOCK_SIZE: usize = 16;
pub const AUTH_CODE_LENGTH: usize = 10;

type HmacSha1 = Hmac<Sha1>;

enum BlockCipher {
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
}

impl BlockCipher {
    fn new(key: &[u8]) -> ZipResult<Self> {
        let invalid = |_| ZipError::format("invalid AES key length");
        Ok(match key.len() {
            16 => BlockCipher::Aes128(aes::Aes128::new_from_slice(key).map_err(invalid)?),
            24 => BlockCipher::Aes192(aes::Aes192::new_from_slice(key).map_err(invalid)?),
            32 => BlockCipher::Aes256(aes::Aes256::new_from_slice(key).map_err(invalid)?),
            _ => return Err(ZipError::format("invalid AES key length")),
        })
    }

    fn encrypt_block(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            BlockCipher::Aes128(c) => c.encrypt_block(block),
            BlockCipher::Aes192(c) => c.encrypt_block(block),
            BlockCipher::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// Key stream of the zip variant of AES-CTR: no nonce, and the counter is
/// serialized little-endian into the whole block.
pub(crate) struct AesCtrKeyStream {
    counter: u128,
    cipher: BlockCipher,
    buffer: [u8; AES_BLOCK_SIZE],
    /// Bytes of `buffer` already used.
    pos: usize,
}

impl AesCtrKeyStream {
    fn new(key: &[u8]) -> ZipResult<Self> {
        Ok(Self {
            counter: 1,
            cipher: BlockCipher::new(key)?,
            buffer: [0u8; AES_BLOCK_SIZE],
            pos: AES_BLOCK_SIZE,
        })
    }

    /// XORs the key stream into `target`; encryption and decryption are the
    /// same operation.
    fn crypt(&mut self, mut target: &mut [u8]) {
        while !target.is_empty() {
            if self.pos == AES_BLOCK_SIZE {
                self.buffer = self.counter.to_le_bytes();
                self.cipher.encrypt_block(&mut self.buffer);
                self.counter += 1;
                self.pos = 0;
            }
            let n = target.len().min(AES_BLOCK_SIZE - self.pos);
            for (t, k) in target[..n].iter_mut().zip(&self.buffer[self.pos..self.pos + n]) {
                *t ^= *k;
            }
            target = &mut target[n..];
            self.pos += n;
        }
    }
}

fn new_mac(key: &[u8]) -> ZipResult<HmacSha1> {
    <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| ZipError::format("invalid HMAC key length"))
}

pub struct AesEncrypter {
    key_stream: AesCtrKeyStream,
    mac: HmacSha1,
    salt: Vec<u8>,
    verifier: [u8; PASSWORD_VERIFIER_LENGTH],
}

impl AesEncrypter {
    /// Derives keys from `password` under a fresh random salt.
    pub fn new(password: &[u8], strength: AesKeyStrength) -> ZipResult<Self> {
        let mut salt = vec![0u8; strength.salt_length()];
        OsRng.fill_bytes(&mut salt);
        Self::with_salt(password, strength, salt)
    }

    pub(crate) fn with_salt(
        password: &[u8],
        strength: AesKeyStrength,
        salt: Vec<u8>,
    ) -> ZipResult<Self> {
        let AesKeyMaterial {
            aes_key,
            mac_key,
            verifier,
        } = derive_aes_keys(password, &salt, strength)?;
        Ok(Self {
            key_stream: AesCtrKeyStream::new(&aes_key)?,
            mac: new_mac(&mac_key)?,
            salt,
            verifier,
        })
    }

    /// Salt followed by the password verifier, written before the
    /// ciphertext.
    pub fn header(&self) -> Vec<u8> {
        let mut out = self.salt.clone();
        out.extend_from_slice(&self.verifier);
        out
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.key_stream.crypt(buf);
        self.mac.update(buf);
    }

    /// Authentication code over all ciphertext produced so far.
    pub fn finish(self) -> [u8; AUTH_CODE_LENGTH] {
        let digest = self.mac.finalize().into_bytes();
        let mut code = [0u8; AUTH_CODE_LENGTH];
        code.copy_from_slice(&digest[..AUTH_CODE_LENGTH]);
        code
    }
}

pub struct AesDecrypter {
    key_stream: AesCtrKeyStream,
    mac: HmacSha1,
}

impl AesDecrypter {
    /// Fails with [`ZipError::WrongPassword`] when the stored verifier does
    /// not match, before any payload is touched.
    pub fn new(
        password: &[u8],
        strength: AesKeyStrength,
        salt: &[u8],
        stored_verifier: &[u8],
    ) -> ZipResult<Self> {
        let keys = derive_aes_keys(password, salt, strength)?;
        if stored_verifier != keys.verifier {
            return Err(ZipError::WrongPassword);
        }
        Ok(Self {
            key_stream: AesCtrKeyStream::new(&keys.aes_key)?,
            mac: new_mac(&keys.mac_key)?,
        })
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.mac.update(buf);
        self.key_stream.crypt(buf);
    }

    /// Compares the stored authentication code with the one computed over
    /// every byte passed to [`decrypt`](Self::decrypt).
    pub fn verify(self, stored: &[u8]) -> bool {
        stored.len() == AUTH_CODE_LENGTH && self.mac.verify_truncated_left(stored).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctr_matches_winzip_key_stream() {
        let ciphertext: [u8; 5] = [0xdc, 0x99, 0x93, 0x5e, 0xbf];
        let key = [
            0xd1, 0x51, 0xa6, 0xab, 0x53, 0x68, 0xd7, 0xb7, 0xbf, 0x49, 0xf7, 0xf5, 0x8a, 0x4e,
            0x10, 0x36, 0x25, 0x1c, 0x13, 0xba, 0x12, 0x45, 0x37, 0x65, 0xa9, 0xe4, 0xed, 0x9f,
            0x4a, 0xa8, 0xda, 0x3b,
        ];
        let mut stream = AesCtrKeyStream::new(&key).unwrap();
        let mut plaintext = ciphertext;
        stream.crypt(&mut plaintext);
        assert_eq!(&plaintext, b"asdf\n");
    }

    #[test]
    fn key_stream_ignores_chunking() {
        let key = [9u8; 16];
        let mut whole = vec![0u8; 100];
        AesCtrKeyStream::new(&key).unwrap().crypt(&mut whole);

        let mut pieces = vec![0u8; 100];
        let mut stream = AesCtrKeyStream::new(&key).unwrap();
        for chunk in pieces.chunks_mut(7) {
            stream.crypt(chunk);
        }
        assert_eq!(whole, pieces);
    }

    #[test]
    fn encrypt_then_decrypt_authenticates() {
        let mut enc = AesEncrypter::new(b"hunter2", AesKeyStrength::Aes192).unwrap();
        let header = enc.header();
        let mut data = b"attack at dawn".to_vec();
        enc.encrypt(&mut data);
        let code = enc.finish();

        let (salt, verifier) = header.split_at(AesKeyStrength::Aes192.salt_length());
        let mut dec =
            AesDecrypter::new(b"hunter2", AesKeyStrength::Aes192, salt, verifier).unwrap();
        let mut tampered = data.clone();
        dec.decrypt(&mut data);
        assert_eq!(data, b"attack at dawn");
        assert!(dec.verify(&code));

        tampered[0] ^= 1;
        let mut dec =
            AesDecrypter::new(b"hunter2", AesKeyStrength::Aes192, salt, verifier).unwrap();
        dec.decrypt(&mut tampered);
        assert!(!dec.verify(&code));
    }

    #[test]
    fn wrong_password_fails_at_verifier() {
        let enc = AesEncrypter::with_salt(b"right", AesKeyStrength::Aes128, vec![3u8; 8]).unwrap();
        let header = enc.header();
        let (salt, verifier) = header.split_at(8);
        let result = AesDecrypter::new(b"wrong", AesKeyStrength::Aes128, salt, verifier);
        // The 2-byte verifier lets one password in 65536 through.
        if let Err(err) = result {
            assert!(matches!(err, ZipError::WrongPassword));
        }
    }
}
