//! Password- and key-based authenticated encryption
//!
//! Argon2id stretches the key material, an AEAD seals the payload. Two
//! suites exist, one per encrypted wallet version:
//!
//! | Suite              | Argon2 version | AEAD              |
//! |--------------------|----------------|-------------------|
//! | `ChaCha20Poly1305` | 0x10           | ChaCha20-Poly1305 |
//! | `Aes256Gcm`        | 0x13           | AES-256-GCM       |
//!
//! # Blob format
//!
//! ```text
//! [tag (1)][m_cost (4 LE)][t_cost (4 LE)][p_cost (4 LE)][salt (16)][nonce (12)][ciphertext + tag]
//! ```
//!
//! The 13-byte header is authenticated as associated data, so a blob cannot
//! be replayed under a different suite or cheaper KDF cost.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const AEAD_TAG_LEN: usize = 16;
const HEADER_LEN: usize = 13;

/// Upper bounds accepted when parsing a blob, so a hostile record cannot
/// make unlock allocate unbounded memory.
const MAX_M_COST: u32 = 1 << 21;
const MAX_T_COST: u32 = 64;
const MAX_P_COST: u32 = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Invalid ciphertext format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    ChaCha20Poly1305,
    Aes256Gcm,
}

impl CipherSuite {
    pub fn tag(self) -> u8 {
        match self {
            CipherSuite::ChaCha20Poly1305 => 2,
            CipherSuite::Aes256Gcm => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CryptoError> {
        match tag {
            2 => Ok(CipherSuite::ChaCha20Poly1305),
            3 => Ok(CipherSuite::Aes256Gcm),
            other => Err(CryptoError::InvalidFormat(format!(
                "unknown suite tag {}",
                other
            ))),
        }
    }

    fn argon2_version(self) -> Version {
        match self {
            CipherSuite::ChaCha20Poly1305 => Version::V0x10,
            CipherSuite::Aes256Gcm => Version::V0x13,
        }
    }

    /// Cost used when the key material is a user password.
    pub fn password_kdf(self) -> KdfParams {
        match self {
            CipherSuite::ChaCha20Poly1305 => KdfParams::new(19_456, 2, 1),
            CipherSuite::Aes256Gcm => KdfParams::new(65_536, 3, 4),
        }
    }
}

/// Argon2id cost parameters (memory in KiB, iterations, lanes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl KdfParams {
    pub const fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost,
            t_cost,
            p_cost,
        }
    }

    /// Cost used when the key material is already a random 256-bit secret.
    pub const fn subkey() -> Self {
        Self::new(1024, 1, 1)
    }

    fn check_bounds(&self) -> Result<(), CryptoError> {
        if self.m_cost > MAX_M_COST || self.t_cost > MAX_T_COST || self.p_cost > MAX_P_COST {
            return Err(CryptoError::InvalidFormat(format!(
                "KDF cost out of range: m={} t={} p={}",
                self.m_cost, self.t_cost, self.p_cost
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct EncryptedBlob {
    suite: CipherSuite,
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = self.suite.tag();
        header[1..5].copy_from_slice(&self.kdf.m_cost.to_le_bytes());
        header[5..9].copy_from_slice(&self.kdf.t_cost.to_le_bytes());
        header[9..13].copy_from_slice(&self.kdf.p_cost.to_le_bytes());
        header
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(HEADER_LEN + SALT_LEN + NONCE_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.header());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let min = HEADER_LEN + SALT_LEN + NONCE_LEN + AEAD_TAG_LEN + 1;
        if bytes.len() < min {
            return Err(CryptoError::InvalidFormat(format!(
                "{} bytes, need at least {}",
                bytes.len(),
                min
            )));
        }

        let suite = CipherSuite::from_tag(bytes[0])?;
        let le = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let kdf = KdfParams::new(le(1), le(5), le(9));
        kdf.check_bounds()?;

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        salt.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + SALT_LEN]);
        nonce.copy_from_slice(&bytes[HEADER_LEN + SALT_LEN..HEADER_LEN + SALT_LEN + NONCE_LEN]);
        let ciphertext = bytes[HEADER_LEN + SALT_LEN + NONCE_LEN..].to_vec();

        Ok(Self {
            suite,
            kdf,
            salt,
            nonce,
            ciphertext,
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(s.trim())
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("suite", &self.suite)
            .field("kdf", &self.kdf)
            .field("len", &self.ciphertext.len())
            .finish()
    }
}

fn derive_key(
    suite: CipherSuite,
    kdf: &KdfParams,
    key_material: &[u8],
    salt: &[u8; SALT_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, suite.argon2_version(), params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(key_material, salt, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

/// Seal `plaintext` under `key_material` (a password or a secret).
///
/// Each call draws a fresh random salt and nonce.
pub fn encrypt(
    suite: CipherSuite,
    kdf: KdfParams,
    plaintext: &[u8],
    key_material: &[u8],
) -> Result<EncryptedBlob, CryptoError> {
    kdf.check_bounds()?;
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let mut blob = EncryptedBlob {
        suite,
        kdf,
        salt,
        nonce,
        ciphertext: Vec::new(),
    };
    let key = derive_key(suite, &kdf, key_material, &salt)?;
    let header = blob.header();
    let payload = Payload {
        msg: plaintext,
        aad: &header,
    };

    blob.ciphertext = match suite {
        CipherSuite::ChaCha20Poly1305 => {
            ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key[..]))
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload)
        }
        CipherSuite::Aes256Gcm => Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key[..]))
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload),
    }
    .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(blob)
}

/// Open a blob. A wrong password and a tampered blob are indistinguishable.
pub fn decrypt(blob: &EncryptedBlob, key_material: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = derive_key(blob.suite, &blob.kdf, key_material, &blob.salt)?;
    let header = blob.header();
    let payload = Payload {
        msg: blob.ciphertext.as_slice(),
        aad: &header,
    };

    let plaintext = match blob.suite {
        CipherSuite::ChaCha20Poly1305 => {
            ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key[..]))
                .decrypt(chacha20poly1305::Nonce::from_slice(&blob.nonce), payload)
        }
        CipherSuite::Aes256Gcm => Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key[..]))
            .decrypt(aes_gcm::Nonce::from_slice(&blob.nonce), payload),
    }
    .map_err(|_| CryptoError::DecryptionFailed("Invalid password or corrupted data".to_string()))?;

    Ok(Zeroizing::new(plaintext))
}
