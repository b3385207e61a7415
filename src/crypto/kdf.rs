//! Password-based key derivation for WinZip AES.
//!
//! PBKDF2-HMAC-SHA1 over the password and a per-entry salt yields
//! `aes key ‖ mac key ‖ 2-byte verifier`, the key lengths depending on the
//! key strength.

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

use crate::error::{ZipError, ZipResult};
use crate::zip::AesKeyStrength;

pub const PBKDF2_ITERATIONS: u32 = 1000;
pub const PASSWORD_VERIFIER_LENGTH: usize = 2;

/// Keys derived for one AES-encrypted entry.
pub struct AesKeyMaterial {
    pub aes_key: Vec<u8>,
    pub mac_key: Vec<u8>,
    pub verifier: [u8; PASSWORD_VERIFIER_LENGTH],
}

pub fn derive_aes_keys(
    password: &[u8],
    salt: &[u8],
    strength: AesKeyStrength,
) -> ZipResult<AesKeyMaterial> {
    if salt.len() != strength.salt_length() {
        return Err(ZipError::Format(format!(
            "AES salt is {} bytes, expected {}",
            salt.len(),
            strength.salt_length()
        )));
    }
    let key_len = strength.key_length();
    let mut derived = vec![0u8; 2 * key_len + PASSWORD_VERIFIER_LENGTH];
    pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ITERATIONS, &mut derived);

    let verifier = [derived[2 * key_len], derived[2 * key_len + 1]];
    Ok(AesKeyMaterial {
        aes_key: derived[..key_len].to_vec(),
        mac_key: derived[key_len..2 * key_len].to_vec(),
        verifier,
    })
}
