//! The encrypted-at-rest envelope for collection files.
//!
//! A collection file in encrypted mode stores `salt : iv : ciphertext`, each
//! field hex-encoded. The key is derived from the configured passphrase with
//! PBKDF2-HMAC-SHA256 (100,000 iterations, 32-byte output) over a fresh
//! 16-byte salt generated on every save; the plaintext is encrypted with
//! AES-256-CBC under a fresh 16-byte IV, also generated on every save, so
//! that encrypting the same plaintext twice never yields the same
//! ciphertext.
//!
//! A legacy two-field form (`iv:ct`) is accepted on read for backward
//! compatibility: it derives its key by hashing the passphrase with SHA-256
//! directly, with no salt and no KDF. New writes always use the three-field
//! form.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, TdbxResult};

const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypts `plaintext` under `passphrase`, producing the on-disk
/// `salt:iv:ciphertext` text form (current, non-legacy format).
pub fn encrypt(passphrase: &str, plaintext: &[u8]) -> TdbxResult<String> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut iv);

    let key = derive_key(passphrase, &salt)?;
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(format!(
        "{}:{}:{}",
        hex::encode(salt),
        hex::encode(iv),
        hex::encode(ciphertext)
    ))
}

/// Decrypts an envelope produced by [`encrypt`], or a legacy two-field
/// envelope, under `passphrase`.
pub fn decrypt(passphrase: &str, envelope: &str) -> TdbxResult<Vec<u8>> {
    let fields: Vec<&str> = envelope.split(':').collect();
    match fields.as_slice() {
        [salt_hex, iv_hex, ct_hex] => {
            let salt = hex::decode(salt_hex)
                .map_err(|e| Error::Decryption(format!("bad salt hex: {e}")))?;
            if salt.len() != SALT_LEN {
                return Err(Error::Decryption(format!(
                    "salt must be {SALT_LEN} bytes, got {}",
                    salt.len()
                )));
            }
            let iv = hex::decode(iv_hex).map_err(|e| Error::Decryption(format!("bad iv hex: {e}")))?;
            let ciphertext =
                hex::decode(ct_hex).map_err(|e| Error::Decryption(format!("bad ciphertext hex: {e}")))?;

            let key = derive_key(passphrase, &salt)?;
            decrypt_with_key(&key, &iv, &ciphertext)
        }
        [iv_hex, ct_hex] => {
            let iv = hex::decode(iv_hex).map_err(|e| Error::Decryption(format!("bad iv hex: {e}")))?;
            let ciphertext =
                hex::decode(ct_hex).map_err(|e| Error::Decryption(format!("bad ciphertext hex: {e}")))?;

            let mut hasher = Sha256::new();
            hasher.update(passphrase.as_bytes());
            let key: [u8; KEY_LEN] = hasher.finalize().into();
            decrypt_with_key(&key, &iv, &ciphertext)
        }
        _ => Err(Error::Decryption(format!(
            "envelope has {} fields, expected 2 (legacy) or 3",
            fields.len()
        ))),
    }
}

fn decrypt_with_key(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8]) -> TdbxResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(Error::Decryption(format!(
            "iv must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| Error::Decryption(format!("cipher/padding check failed: {e}")))
}

fn derive_key(passphrase: &str, salt: &[u8]) -> TdbxResult<[u8; KEY_LEN]> {
    if salt.len() != SALT_LEN {
        return Err(Error::Decryption(format!(
            "salt must be {SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    let mut key = [0u8; KEY_LEN];
    pbkdf2::<Hmac<Sha256>>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key)
        .map_err(|e| Error::Encryption(format!("KDF failure: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let envelope = encrypt("correct horse battery staple", b"hello world").unwrap();
        let plaintext = decrypt("correct horse battery staple", &envelope).unwrap();
        assert_eq!(plaintext, b"hello world");
    }

    #[test]
    fn same_plaintext_encrypts_differently_each_time() {
        let a = encrypt("passphrase", b"same plaintext").unwrap();
        let b = encrypt("passphrase", b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let envelope = encrypt("right-passphrase", b"secret").unwrap();
        assert!(decrypt("wrong-passphrase", &envelope).is_err());
    }

    #[test]
    fn legacy_two_field_envelope_decrypts() {
        let mut hasher = Sha256::new();
        hasher.update(b"legacy-pass");
        let key: [u8; KEY_LEN] = hasher.finalize().into();
        let iv = [7u8; IV_LEN];
        let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(b"old data");
        let envelope = format!("{}:{}", hex::encode(iv), hex::encode(ciphertext));

        let plaintext = decrypt("legacy-pass", &envelope).unwrap();
        assert_eq!(plaintext, b"old data");
    }

    #[test]
    fn malformed_envelope_is_a_decryption_error() {
        let err = decrypt("pass", "not-an-envelope").unwrap_err();
        assert_eq!(err.kind(), "decryption-error");
    }

    #[test]
    fn wrong_salt_length_is_rejected() {
        let bad = format!("{}:{}:{}", hex::encode([0u8; 4]), hex::encode([0u8; IV_LEN]), hex::encode(b"x"));
        let err = decrypt("pass", &bad).unwrap_err();
        assert_eq!(err.kind(), "decryption-error");
    }
}
