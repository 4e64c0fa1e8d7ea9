use aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::anyhow;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::NetError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Transformation applied to the bodies of critical messages before framing. Checksums are
///  computed over the transformed bytes, so integrity checking composes with (and never
///  depends on) decryption.
pub trait PayloadCrypto: Send + Sync + 'static {
    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn decrypt(&self, transmitted: &[u8]) -> Result<Vec<u8>, NetError>;
}

pub struct NoCrypto;
impl PayloadCrypto for NoCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, transmitted: &[u8]) -> Result<Vec<u8>, NetError> {
        Ok(transmitted.to_vec())
    }
}

/// AES-256-GCM with the key derived from a shared secret. Every message gets a fresh random
///  nonce which is transmitted in front of the ciphertext.
pub struct AesGcmCrypto {
    cipher: Aes256Gcm,
}
impl AesGcmCrypto {
    pub fn from_secret(shared_secret: &[u8]) -> AesGcmCrypto {
        let key = Sha256::digest(shared_secret);
        AesGcmCrypto {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice())),
        }
    }
}
impl PayloadCrypto for AesGcmCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self.cipher.encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| anyhow!("encryption error: {}", e))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, transmitted: &[u8]) -> Result<Vec<u8>, NetError> {
        if transmitted.len() < NONCE_LEN + TAG_LEN {
            return Err(NetError::MalformedFrame("encrypted body shorter than nonce and tag".to_string()));
        }

        let (nonce, ciphertext) = transmitted.split_at(NONCE_LEN);
        self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| NetError::MalformedFrame("payload decryption failed".to_string()))
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(b"" as &[u8])]
    #[case::short(b"hello")]
    #[case::binary(&[0u8, 255, 1, 254, 2, 253])]
    fn test_encrypt_decrypt_roundtrip(#[case] plaintext: &[u8]) {
        let crypto = AesGcmCrypto::from_secret(b"test secret");

        let transmitted = crypto.encrypt(plaintext).unwrap();
        assert_eq!(transmitted.len(), NONCE_LEN + plaintext.len() + TAG_LEN);
        assert_eq!(crypto.decrypt(&transmitted).unwrap(), plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let crypto = AesGcmCrypto::from_secret(b"test secret");

        let a = crypto.encrypt(b"same plaintext").unwrap();
        let b = crypto.encrypt(b"same plaintext").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let crypto = AesGcmCrypto::from_secret(b"test secret");

        let mut transmitted = crypto.encrypt(b"payload").unwrap();
        let last = transmitted.len() - 1;
        transmitted[last] ^= 0x01;

        assert!(matches!(crypto.decrypt(&transmitted), Err(NetError::MalformedFrame(_))));
    }

    #[test]
    fn test_decrypt_rejects_wrong_secret() {
        let sender = AesGcmCrypto::from_secret(b"secret a");
        let receiver = AesGcmCrypto::from_secret(b"secret b");

        let transmitted = sender.encrypt(b"payload").unwrap();
        assert!(matches!(receiver.decrypt(&transmitted), Err(NetError::MalformedFrame(_))));
    }

    #[test]
    fn test_decrypt_rejects_truncated_body() {
        let crypto = AesGcmCrypto::from_secret(b"test secret");
        assert!(matches!(crypto.decrypt(&[0u8; NONCE_LEN]), Err(NetError::MalformedFrame(_))));
    }

    #[test]
    fn test_no_crypto_passthrough() {
        let crypto = NoCrypto;
        assert_eq!(crypto.encrypt(b"abc").unwrap(), b"abc");
        assert_eq!(crypto.decrypt(b"abc").unwrap(), b"abc");
    }
}
