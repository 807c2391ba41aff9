//! Symmetric cryptography provider for portage transmissions.
//!
//! Both peers agree on a [`SecurityMode`] and a shared passphrase
//! out-of-band; the key is derived from the passphrase with BLAKE3.
//! Encryption is applied exactly once per logical unit — the fully
//! assembled plaintext before the length-prefix handshake — never
//! per-chunk inside a buffered-transfer loop.
//!
//! Every non-none mode adds a fixed, mode-specific number of bytes to the
//! ciphertext. The length-prefix value always describes ciphertext length,
//! so both sides account for the overhead with [`SecurityMode::overhead`].
//!
//! Key material is wiped from memory on drop. There is no unsafe code in
//! this module.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

type Aes128Ctr = ctr::Ctr64LE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr64LE<aes::Aes256>;

/// Random nonce prefix length for the authenticated high modes.
const GCM_NONCE_LEN: usize = 12;
/// GCM authentication tag length.
const GCM_TAG_LEN: usize = 16;
/// Random IV prefix length for the unauthenticated low modes.
const CTR_IV_LEN: usize = 16;

/// Domain-separation context for passphrase key derivation.
/// Changing this string is a breaking protocol change.
const KEY_CONTEXT: &str = "portage symmetric transmission key v1";

// ── Security mode ────────────────────────────────────────────────────────────

/// The symmetric protection applied to each transmission.
///
/// "High" modes are authenticated (AES-GCM: nonce + tag). "Low" modes are
/// confidentiality-only (AES-CTR: IV prefix, no tag) with a smaller fixed
/// overhead. Both peers must configure the same mode out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    #[default]
    None,
    Sym128Low,
    Sym128High,
    Sym256Low,
    Sym256High,
}

impl SecurityMode {
    /// Fixed ciphertext expansion in bytes:
    /// `len(encrypt(x)) == len(x) + overhead()`, exactly.
    pub fn overhead(self) -> usize {
        match self {
            SecurityMode::None => 0,
            SecurityMode::Sym128Low | SecurityMode::Sym256Low => CTR_IV_LEN,
            SecurityMode::Sym128High | SecurityMode::Sym256High => GCM_NONCE_LEN + GCM_TAG_LEN,
        }
    }

    /// Key length consumed from the derived key material.
    pub fn key_len(self) -> usize {
        match self {
            SecurityMode::None => 0,
            SecurityMode::Sym128Low | SecurityMode::Sym128High => 16,
            SecurityMode::Sym256Low | SecurityMode::Sym256High => 32,
        }
    }

    pub fn is_none(self) -> bool {
        self == SecurityMode::None
    }
}

// ── Cipher ───────────────────────────────────────────────────────────────────

/// A configured symmetric cipher: one mode, one derived key.
///
/// Construction derives 32 bytes of key material from the passphrase via
/// `blake3::derive_key`; each mode consumes its own prefix of it. The
/// derived bytes are zeroized when the cipher is dropped.
pub struct Cipher {
    mode: SecurityMode,
    key: Zeroizing<[u8; 32]>,
}

impl Cipher {
    pub fn new(mode: SecurityMode, passphrase: &str) -> Self {
        let key = if mode.is_none() {
            Zeroizing::new([0u8; 32])
        } else {
            Zeroizing::new(blake3::derive_key(KEY_CONTEXT, passphrase.as_bytes()))
        };
        Self { mode, key }
    }

    /// A pass-through cipher for unencrypted jobs.
    pub fn plaintext() -> Self {
        Self::new(SecurityMode::None, "")
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Encrypt one fully assembled plaintext.
    ///
    /// Output is `plaintext.len() + mode.overhead()` bytes: a random nonce
    /// or IV prefix followed by the ciphertext (and, for high modes, the
    /// appended tag). `None` mode copies the input through unchanged.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.mode {
            SecurityMode::None => Ok(plaintext.to_vec()),

            SecurityMode::Sym128Low => self.encrypt_ctr::<Aes128Ctr>(plaintext),
            SecurityMode::Sym256Low => self.encrypt_ctr::<Aes256Ctr>(plaintext),

            SecurityMode::Sym128High => {
                let cipher = Aes128Gcm::new_from_slice(&self.key[..16])
                    .map_err(|_| CryptoError::BadKey)?;
                let nonce = random_nonce();
                let body = cipher
                    .encrypt(Nonce::from_slice(&nonce), plaintext)
                    .map_err(|_| CryptoError::Cipher)?;
                Ok(prefix_nonce(&nonce, body))
            }
            SecurityMode::Sym256High => {
                let cipher = Aes256Gcm::new_from_slice(&self.key[..32])
                    .map_err(|_| CryptoError::BadKey)?;
                let nonce = random_nonce();
                let body = cipher
                    .encrypt(Nonce::from_slice(&nonce), plaintext)
                    .map_err(|_| CryptoError::Cipher)?;
                Ok(prefix_nonce(&nonce, body))
            }
        }
    }

    /// Decrypt one fully received ciphertext. Inverse of [`Cipher::encrypt`].
    ///
    /// Rejects inputs shorter than the mode's overhead. For high modes a
    /// wrong key or tampered ciphertext fails tag verification.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < self.mode.overhead() {
            return Err(CryptoError::TooShort {
                got: ciphertext.len(),
                need: self.mode.overhead(),
            });
        }

        match self.mode {
            SecurityMode::None => Ok(ciphertext.to_vec()),

            SecurityMode::Sym128Low => self.decrypt_ctr::<Aes128Ctr>(ciphertext),
            SecurityMode::Sym256Low => self.decrypt_ctr::<Aes256Ctr>(ciphertext),

            SecurityMode::Sym128High => {
                let cipher = Aes128Gcm::new_from_slice(&self.key[..16])
                    .map_err(|_| CryptoError::BadKey)?;
                let nonce = Nonce::from_slice(&ciphertext[..GCM_NONCE_LEN]);
                cipher
                    .decrypt(nonce, &ciphertext[GCM_NONCE_LEN..])
                    .map_err(|_| CryptoError::Tag)
            }
            SecurityMode::Sym256High => {
                let cipher = Aes256Gcm::new_from_slice(&self.key[..32])
                    .map_err(|_| CryptoError::BadKey)?;
                let nonce = Nonce::from_slice(&ciphertext[..GCM_NONCE_LEN]);
                cipher
                    .decrypt(nonce, &ciphertext[GCM_NONCE_LEN..])
                    .map_err(|_| CryptoError::Tag)
            }
        }
    }

    fn encrypt_ctr<C>(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>
    where
        C: KeyIvInit + StreamCipher,
    {
        let mut iv = [0u8; CTR_IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut cipher = C::new_from_slices(&self.key[..self.mode.key_len()], &iv)
            .map_err(|_| CryptoError::BadKey)?;

        let mut out = Vec::with_capacity(CTR_IV_LEN + plaintext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(plaintext);
        cipher.apply_keystream(&mut out[CTR_IV_LEN..]);
        Ok(out)
    }

    fn decrypt_ctr<C>(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>
    where
        C: KeyIvInit + StreamCipher,
    {
        let (iv, body) = ciphertext.split_at(CTR_IV_LEN);
        let mut cipher = C::new_from_slices(&self.key[..self.mode.key_len()], iv)
            .map_err(|_| CryptoError::BadKey)?;

        let mut out = body.to_vec();
        cipher.apply_keystream(&mut out);
        Ok(out)
    }
}

fn random_nonce() -> [u8; GCM_NONCE_LEN] {
    let mut nonce = [0u8; GCM_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

fn prefix_nonce(nonce: &[u8; GCM_NONCE_LEN], body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(GCM_NONCE_LEN + body.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&body);
    out
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext too short: got {got} bytes, mode overhead is {need}")]
    TooShort { got: usize, need: usize },

    #[error("authenticated decryption failed (wrong key or tampered data)")]
    Tag,

    #[error("cipher operation failed")]
    Cipher,

    #[error("derived key has wrong length for mode — this is a bug")]
    BadKey,
}

// ── Tests ────────────────────────────────────────────────────────────────────
