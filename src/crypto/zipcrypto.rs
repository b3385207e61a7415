//! Traditional PKWARE encryption.
//!
//! Three 32-bit words seeded from the password evolve with every plaintext
//! byte. A 12-byte header of random bytes, whose last byte is a check value
//! the reader can predict, precedes the payload.

use rand::RngCore;
use rand::rngs::OsRng;

use crate::crc::crc32_update;
use crate::error::{ZipError, ZipResult};

pub const ZIPCRYPTO_HEADER_LENGTH: usize = 12;

#[derive(Clone, Copy)]
struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    fn new(password: &[u8]) -> Self {
        let mut keys = ZipCryptoKeys {
            key0: 0x1234_5678,
            key1: 0x2345_6789,
            key2: 0x3456_7890,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.key0 = crc32_update(self.key0, plain);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.key2 = crc32_update(self.key2, (self.key1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.key2 | 2) & 0xffff;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }

    fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }
}

pub struct ZipCryptoEncrypter {
    keys: ZipCryptoKeys,
}

impl ZipCryptoEncrypter {
    /// Returns the encrypter and the encrypted header to write ahead of the
    /// payload. `check_byte` becomes the header's last plaintext byte.
    pub fn new(password: &[u8], check_byte: u8) -> (Self, [u8; ZIPCRYPTO_HEADER_LENGTH]) {
        let mut header = [0u8; ZIPCRYPTO_HEADER_LENGTH];
        OsRng.fill_bytes(&mut header[..ZIPCRYPTO_HEADER_LENGTH - 1]);
        header[ZIPCRYPTO_HEADER_LENGTH - 1] = check_byte;

        let mut encrypter = Self {
            keys: ZipCryptoKeys::new(password),
        };
        encrypter.encrypt(&mut header);
        (encrypter, header)
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.keys.encrypt_byte(*b);
        }
    }
}

pub struct ZipCryptoDecrypter {
    keys: ZipCryptoKeys,
}

impl ZipCryptoDecrypter {
    /// Consumes the 12-byte header. A check byte mismatch is a wrong
    /// password; a match still lets roughly one wrong password in 256
    /// through, to be caught later by the CRC.
    pub fn new(
        password: &[u8],
        header: &[u8; ZIPCRYPTO_HEADER_LENGTH],
        check_byte: u8,
    ) -> ZipResult<Self> {
        let mut decrypter = Self {
            keys: ZipCryptoKeys::new(password),
        };
        let mut plain = *header;
        decrypter.decrypt(&mut plain);
        if plain[ZIPCRYPTO_HEADER_LENGTH - 1] != check_byte {
            return Err(ZipError::WrongPassword);
        }
        Ok(decrypter)
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.keys.decrypt_byte(*b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_across_chunks() {
        let (mut enc, header) = ZipCryptoEncrypter::new(b"s3cret", 0xA5);
        let mut data = b"legacy encryption still ships everywhere".to_vec();
        let plain = data.clone();
        for chunk in data.chunks_mut(3) {
            enc.encrypt(chunk);
        }
        assert_ne!(data, plain);

        let mut dec = ZipCryptoDecrypter::new(b"s3cret", &header, 0xA5).unwrap();
        dec.decrypt(&mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn check_byte_catches_most_wrong_passwords() {
        let (_, header) = ZipCryptoEncrypter::new(b"right", 0x42);
        let rejected = (0..256)
            .filter(|i| {
                let guess = format!("wrong-{i}");
                ZipCryptoDecrypter::new(guess.as_bytes(), &header, 0x42).is_err()
            })
            .count();
        // One wrong password in 256 passes the check on average.
        assert!(rejected >= 230, "only {rejected} of 256 rejected");
    }
}
