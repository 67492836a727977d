use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use rand::RngCore;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("buffer too short for an AEAD tag")]
    ShortBuffer,
}

/// A single peer's AES-256-GCM key, bound once at `Mapping` construction.
pub struct SealingKey {
    cipher: Aes256Gcm,
}

impl SealingKey {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::BadKeyLength(key.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Draws a fresh random 96-bit nonce into `nonce_out`.
    pub fn random_nonce(nonce_out: &mut [u8]) {
        debug_assert_eq!(nonce_out.len(), NONCE_LEN);
        rand::thread_rng().fill_bytes(nonce_out);
    }

    /// Encrypts `plaintext` in place and appends the detached tag to
    /// `tag_out`. `plaintext` is mutated to become the ciphertext.
    pub fn seal_in_place(
        &self,
        nonce: &[u8],
        plaintext: &mut [u8],
        tag_out: &mut [u8],
    ) -> Result<(), CryptoError> {
        let nonce = Nonce::from_slice(nonce);
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, &[], plaintext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        tag_out.copy_from_slice(tag.as_slice());
        Ok(())
    }

    /// Decrypts `ciphertext_and_tag` in place given a detached `tag`.
    /// On success, the first `ciphertext_and_tag.len()` bytes hold plaintext.
    pub fn open_in_place(
        &self,
        nonce: &[u8],
        ciphertext: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError> {
        if tag.len() != TAG_LEN {
            return Err(CryptoError::ShortBuffer);
        }
        let nonce = Nonce::from_slice(nonce);
        let tag = Tag::from_slice(tag);
        self.cipher
            .decrypt_in_place_detached(nonce, &[], ciphertext, tag)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SealingKey {
        SealingKey::new(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn seal_then_open_roundtrips() {
        let k = key();
        let mut nonce = [0u8; NONCE_LEN];
        SealingKey::random_nonce(&mut nonce);
        let mut buf = *b"hello overlay!!!";
        let mut tag = [0u8; TAG_LEN];
        k.seal_in_place(&nonce, &mut buf, &mut tag).unwrap();
        assert_ne!(&buf, b"hello overlay!!!");
        k.open_in_place(&nonce, &mut buf, &tag).unwrap();
        assert_eq!(&buf, b"hello overlay!!!");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let k = key();
        let mut nonce = [0u8; NONCE_LEN];
        SealingKey::random_nonce(&mut nonce);
        let mut buf = *b"hello overlay!!!";
        let mut tag = [0u8; TAG_LEN];
        k.seal_in_place(&nonce, &mut buf, &mut tag).unwrap();
        buf[0] ^= 0xff;
        assert!(k.open_in_place(&nonce, &mut buf, &tag).is_err());
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            SealingKey::new(&[0u8; 16]),
            Err(CryptoError::BadKeyLength(16))
        ));
    }
}
