//! Versioned primary-key envelopes
//!
//! | Version | Stored                                   | Unlocked with                 |
//! |---------|------------------------------------------|-------------------------------|
//! | v1      | primary mnemonic                         | mnemonic + BIP-39 passphrase  |
//! | v2      | seed under secret, secret under password | ChaCha20-Poly1305, Argon2 0x10|
//! | v3      | seed under secret, secret under password | AES-256-GCM, Argon2 0x13      |
//!
//! For v2/v3 the random 32-byte secret encrypts the random 32-byte primary
//! seed, and the password only ever encrypts the secret. A password change
//! re-wraps the secret and leaves the seed blob untouched.

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{self, CipherSuite, CryptoError, EncryptedBlob, KdfParams};
use crate::keys::{ExtendedPrivateKey, KeyError};
use crate::seed::{self, SeedError};

const SECRET_LEN: usize = 32;
const PRIMARY_SEED_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Wallet record has no {0}")]
    MissingData(&'static str),

    #[error("Blob is for {found:?}, wallet is {expected}")]
    VersionMismatch {
        expected: WalletVersion,
        found: CipherSuite,
    },

    #[error("Invalid {what}: {reason}")]
    InvalidEncoding { what: &'static str, reason: String },

    #[error("{0} wallets do not support password changes")]
    PasswordChangeUnsupported(WalletVersion),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletVersion {
    V1,
    V2,
    #[default]
    V3,
}

impl WalletVersion {
    pub fn cipher_suite(self) -> Option<CipherSuite> {
        match self {
            WalletVersion::V1 => None,
            WalletVersion::V2 => Some(CipherSuite::ChaCha20Poly1305),
            WalletVersion::V3 => Some(CipherSuite::Aes256Gcm),
        }
    }
}

impl fmt::Display for WalletVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WalletVersion::V1 => "v1",
            WalletVersion::V2 => "v2",
            WalletVersion::V3 => "v3",
        })
    }
}

/// Credentials for unlocking. When several are given, `primary_private_key`
/// wins, then `primary_seed`, then `secret`, then `password`.
#[derive(Clone, Default, Deserialize, Zeroize)]
#[serde(deny_unknown_fields, default)]
pub struct UnlockOptions {
    /// v2/v3 wallet password
    pub password: Option<String>,
    /// v1 BIP-39 passphrase (empty when absent)
    pub passphrase: Option<String>,
    /// v1 mnemonic, when the record does not hold it
    pub primary_mnemonic: Option<String>,
    /// v2/v3 secret, hex
    pub secret: Option<String>,
    /// v2/v3 primary seed, hex
    pub primary_seed: Option<String>,
    /// Master `xprv`
    pub primary_private_key: Option<String>,
}

impl UnlockOptions {
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for UnlockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockOptions")
            .field("password", &self.password.is_some())
            .field("passphrase", &self.passphrase.is_some())
            .field("primary_mnemonic", &self.primary_mnemonic.is_some())
            .field("secret", &self.secret.is_some())
            .field("primary_seed", &self.primary_seed.is_some())
            .field("primary_private_key", &self.primary_private_key.is_some())
            .finish()
    }
}

/// Key material held while a wallet is unlocked. Every secret field is
/// wiped when dropped.
pub struct UnlockedKeys {
    pub master: ExtendedPrivateKey,
    pub secret: Option<Zeroizing<Vec<u8>>>,
    pub primary_seed: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for UnlockedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedKeys")
            .field("secret", &self.secret.is_some())
            .field("primary_seed", &self.primary_seed.is_some())
            .finish_non_exhaustive()
    }
}

impl UnlockedKeys {
    fn from_seed(
        network: Network,
        seed: Zeroizing<Vec<u8>>,
        secret: Option<Zeroizing<Vec<u8>>>,
    ) -> Result<Self, EnvelopeError> {
        let master = ExtendedPrivateKey::from_seed(network, &seed)?;
        Ok(Self {
            master,
            secret,
            primary_seed: Some(seed),
        })
    }
}

/// The encrypted halves of a v2/v3 envelope.
#[derive(Debug, Clone, Default)]
pub struct SealedSeed {
    pub encrypted_primary_seed: Option<EncryptedBlob>,
    pub encrypted_secret: Option<EncryptedBlob>,
}

/// How a wallet's primary key is rehydrated.
#[derive(Clone)]
pub enum KeyUnlockScheme {
    Mnemonic { primary_mnemonic: Option<Zeroizing<String>> },
    EncryptedSeedV2(SealedSeed),
    EncryptedSeedV3(SealedSeed),
}

impl fmt::Debug for KeyUnlockScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyUnlockScheme::Mnemonic { primary_mnemonic } => f
                .debug_struct("Mnemonic")
                .field("stored", &primary_mnemonic.is_some())
                .finish(),
            KeyUnlockScheme::EncryptedSeedV2(sealed) => {
                f.debug_tuple("EncryptedSeedV2").field(sealed).finish()
            }
            KeyUnlockScheme::EncryptedSeedV3(sealed) => {
                f.debug_tuple("EncryptedSeedV3").field(sealed).finish()
            }
        }
    }
}

fn parse_blob(
    version: WalletVersion,
    encoded: Option<&str>,
) -> Result<Option<EncryptedBlob>, EnvelopeError> {
    let Some(encoded) = encoded else {
        return Ok(None);
    };
    let blob = EncryptedBlob::from_base64(encoded)?;
    if Some(blob.suite()) != version.cipher_suite() {
        return Err(EnvelopeError::VersionMismatch {
            expected: version,
            found: blob.suite(),
        });
    }
    Ok(Some(blob))
}

fn decode_hex(what: &'static str, value: &str) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
    hex::decode(value.trim())
        .map(Zeroizing::new)
        .map_err(|e| EnvelopeError::InvalidEncoding {
            what,
            reason: e.to_string(),
        })
}

fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    use rand::RngCore;
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
    bytes
}

impl KeyUnlockScheme {
    pub fn version(&self) -> WalletVersion {
        match self {
            KeyUnlockScheme::Mnemonic { .. } => WalletVersion::V1,
            KeyUnlockScheme::EncryptedSeedV2(_) => WalletVersion::V2,
            KeyUnlockScheme::EncryptedSeedV3(_) => WalletVersion::V3,
        }
    }

    /// Rebuild the scheme from the fields of a wallet record.
    pub fn from_parts(
        version: WalletVersion,
        primary_mnemonic: Option<&str>,
        encrypted_primary_seed: Option<&str>,
        encrypted_secret: Option<&str>,
    ) -> Result<Self, EnvelopeError> {
        match version {
            WalletVersion::V1 => Ok(KeyUnlockScheme::Mnemonic {
                primary_mnemonic: primary_mnemonic.map(|m| Zeroizing::new(m.to_string())),
            }),
            WalletVersion::V2 | WalletVersion::V3 => {
                let sealed = SealedSeed {
                    encrypted_primary_seed: parse_blob(version, encrypted_primary_seed)?,
                    encrypted_secret: parse_blob(version, encrypted_secret)?,
                };
                Ok(if version == WalletVersion::V2 {
                    KeyUnlockScheme::EncryptedSeedV2(sealed)
                } else {
                    KeyUnlockScheme::EncryptedSeedV3(sealed)
                })
            }
        }
    }

    pub fn primary_mnemonic(&self) -> Option<&str> {
        match self {
            KeyUnlockScheme::Mnemonic { primary_mnemonic } => {
                primary_mnemonic.as_ref().map(|m| m.as_str())
            }
            _ => None,
        }
    }

    pub fn sealed(&self) -> Option<&SealedSeed> {
        match self {
            KeyUnlockScheme::Mnemonic { .. } => None,
            KeyUnlockScheme::EncryptedSeedV2(sealed) | KeyUnlockScheme::EncryptedSeedV3(sealed) => {
                Some(sealed)
            }
        }
    }

    /// Generate fresh primary key material.
    ///
    /// v1 needs no password (the passphrase may be empty); v2/v3 require one
    /// and wrap it with `password_kdf` (the suite's default cost when `None`).
    pub fn create(
        version: WalletVersion,
        network: Network,
        options: &UnlockOptions,
        password_kdf: Option<KdfParams>,
    ) -> Result<(Self, UnlockedKeys), EnvelopeError> {
        match version.cipher_suite() {
            None => {
                let mnemonic = seed::generate_mnemonic()?;
                let passphrase = options.passphrase.as_deref().unwrap_or("");
                let seed = seed::derive_seed(&mnemonic, passphrase);
                let keys = UnlockedKeys::from_seed(network, Zeroizing::new(seed.to_vec()), None)?;
                let scheme = KeyUnlockScheme::Mnemonic {
                    primary_mnemonic: Some(Zeroizing::new(mnemonic.to_string())),
                };
                Ok((scheme, keys))
            }
            Some(suite) => {
                let password = options
                    .password
                    .as_deref()
                    .ok_or(EnvelopeError::MissingCredential("password"))?;
                let secret = random_bytes(SECRET_LEN);
                let primary_seed = random_bytes(PRIMARY_SEED_LEN);

                let sealed = SealedSeed {
                    encrypted_primary_seed: Some(crypto::encrypt(
                        suite,
                        KdfParams::subkey(),
                        &primary_seed,
                        &secret,
                    )?),
                    encrypted_secret: Some(crypto::encrypt(
                        suite,
                        password_kdf.unwrap_or_else(|| suite.password_kdf()),
                        &secret,
                        password.as_bytes(),
                    )?),
                };
                let scheme = if version == WalletVersion::V2 {
                    KeyUnlockScheme::EncryptedSeedV2(sealed)
                } else {
                    KeyUnlockScheme::EncryptedSeedV3(sealed)
                };
                let keys = UnlockedKeys::from_seed(network, primary_seed, Some(secret))?;
                Ok((scheme, keys))
            }
        }
    }

    /// Rehydrate the primary master key.
    ///
    /// A wrong v2/v3 password surfaces as a decryption failure; a wrong v1
    /// passphrase still yields a key, which only the checksum catches.
    pub fn unlock(
        &self,
        network: Network,
        options: &UnlockOptions,
    ) -> Result<UnlockedKeys, EnvelopeError> {
        if let Some(xprv) = options.primary_private_key.as_deref() {
            return Ok(UnlockedKeys {
                master: ExtendedPrivateKey::from_str_at(xprv.trim(), "m")?,
                secret: None,
                primary_seed: None,
            });
        }

        match self {
            KeyUnlockScheme::Mnemonic { primary_mnemonic } => {
                let words = options
                    .primary_mnemonic
                    .as_deref()
                    .or(primary_mnemonic.as_ref().map(|m| m.as_str()))
                    .ok_or(EnvelopeError::MissingCredential("primary mnemonic"))?;
                let mnemonic = seed::parse_mnemonic(words)?;
                let passphrase = options.passphrase.as_deref().unwrap_or("");
                let seed = seed::derive_seed(&mnemonic, passphrase);
                UnlockedKeys::from_seed(network, Zeroizing::new(seed.to_vec()), None)
            }
            KeyUnlockScheme::EncryptedSeedV2(sealed) | KeyUnlockScheme::EncryptedSeedV3(sealed) => {
                if let Some(primary_seed) = options.primary_seed.as_deref() {
                    let seed = decode_hex("primary seed", primary_seed)?;
                    return UnlockedKeys::from_seed(network, seed, None);
                }

                let secret = match (options.secret.as_deref(), options.password.as_deref()) {
                    (Some(secret), _) => decode_hex("secret", secret)?,
                    (None, Some(password)) => {
                        let blob = sealed
                            .encrypted_secret
                            .as_ref()
                            .ok_or(EnvelopeError::MissingData("encrypted secret"))?;
                        crypto::decrypt(blob, password.as_bytes())?
                    }
                    (None, None) => return Err(EnvelopeError::MissingCredential("password")),
                };

                let blob = sealed
                    .encrypted_primary_seed
                    .as_ref()
                    .ok_or(EnvelopeError::MissingData("encrypted primary seed"))?;
                let seed = crypto::decrypt(blob, &secret)?;
                UnlockedKeys::from_seed(network, seed, Some(secret))
            }
        }
    }

    /// Re-wrap the unlocked secret under `new_password`. Returns the new
    /// encrypted secret; the primary seed blob is unchanged.
    pub fn change_password(
        &mut self,
        unlocked: &UnlockedKeys,
        new_password: &str,
        password_kdf: Option<KdfParams>,
    ) -> Result<EncryptedBlob, EnvelopeError> {
        let version = self.version();
        let suite = version
            .cipher_suite()
            .ok_or(EnvelopeError::PasswordChangeUnsupported(version))?;
        let sealed = match self {
            KeyUnlockScheme::EncryptedSeedV2(sealed) | KeyUnlockScheme::EncryptedSeedV3(sealed) => {
                sealed
            }
            KeyUnlockScheme::Mnemonic { .. } => {
                return Err(EnvelopeError::PasswordChangeUnsupported(version))
            }
        };
        let secret = unlocked
            .secret
            .as_ref()
            .ok_or(EnvelopeError::MissingCredential("secret"))?;

        let blob = crypto::encrypt(
            suite,
            password_kdf.unwrap_or_else(|| suite.password_kdf()),
            secret,
            new_password.as_bytes(),
        )?;
        sealed.encrypted_secret = Some(blob.clone());
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::Secp256k1;

    const FAST: KdfParams = KdfParams::new(64, 1, 1);

    fn create(version: WalletVersion, options: &UnlockOptions) -> (KeyUnlockScheme, UnlockedKeys) {
        KeyUnlockScheme::create(version, Network::Testnet, options, Some(FAST)).unwrap()
    }

    fn pubkey(keys: &UnlockedKeys) -> bitcoin::secp256k1::PublicKey {
        keys.master.public_key(&Secp256k1::new())
    }

    #[test]
    fn test_v1_roundtrip() {
        let options = UnlockOptions::with_passphrase("hunter2");
        let (scheme, created) = create(WalletVersion::V1, &options);
        assert_eq!(scheme.version(), WalletVersion::V1);
        assert_eq!(scheme.primary_mnemonic().unwrap().split(' ').count(), 24);

        let unlocked = scheme.unlock(Network::Testnet, &options).unwrap();
        assert_eq!(pubkey(&unlocked), pubkey(&created));

        // Any passphrase is "valid" for BIP-39; it just gives another key.
        let other = scheme
            .unlock(Network::Testnet, &UnlockOptions::with_passphrase("nope"))
            .unwrap();
        assert_ne!(pubkey(&other), pubkey(&created));
    }

    #[test]
    fn test_v2_v3_password_roundtrip() {
        for version in [WalletVersion::V2, WalletVersion::V3] {
            let options = UnlockOptions::with_password("password");
            let (scheme, created) = create(version, &options);
            assert_eq!(scheme.version(), version);

            let unlocked = scheme.unlock(Network::Testnet, &options).unwrap();
            assert_eq!(pubkey(&unlocked), pubkey(&created));
            assert!(unlocked.secret.is_some());

            let wrong = scheme.unlock(Network::Testnet, &UnlockOptions::with_password("bad"));
            assert!(matches!(wrong, Err(EnvelopeError::Crypto(_))));
        }
    }

    #[test]
    fn test_credential_precedence() {
        let (scheme, created) = create(WalletVersion::V3, &UnlockOptions::with_password("pw"));
        let secret_hex = hex::encode(created.secret.as_ref().unwrap().as_slice());
        let seed_hex = hex::encode(created.primary_seed.as_ref().unwrap().as_slice());

        // A valid secret wins over a wrong password.
        let options = UnlockOptions {
            secret: Some(secret_hex),
            password: Some("wrong".into()),
            ..Default::default()
        };
        assert_eq!(pubkey(&scheme.unlock(Network::Testnet, &options).unwrap()), pubkey(&created));

        // A raw seed needs nothing else.
        let options = UnlockOptions {
            primary_seed: Some(seed_hex),
            ..Default::default()
        };
        assert_eq!(pubkey(&scheme.unlock(Network::Testnet, &options).unwrap()), pubkey(&created));

        // The master key wins over everything.
        let options = UnlockOptions {
            primary_private_key: Some(created.master.xpriv().to_string()),
            password: Some("wrong".into()),
            ..Default::default()
        };
        assert_eq!(pubkey(&scheme.unlock(Network::Testnet, &options).unwrap()), pubkey(&created));

        assert_eq!(
            scheme.unlock(Network::Testnet, &UnlockOptions::default()).unwrap_err(),
            EnvelopeError::MissingCredential("password")
        );
    }

    #[test]
    fn test_password_change_keeps_seed_blob() {
        let (mut scheme, created) = create(WalletVersion::V2, &UnlockOptions::with_password("old"));
        let seed_blob = scheme.sealed().unwrap().encrypted_primary_seed.as_ref().unwrap().to_bytes();

        scheme.change_password(&created, "new", Some(FAST)).unwrap();
        assert_eq!(
            scheme.sealed().unwrap().encrypted_primary_seed.as_ref().unwrap().to_bytes(),
            seed_blob
        );
        assert!(scheme
            .unlock(Network::Testnet, &UnlockOptions::with_password("old"))
            .is_err());
        let unlocked = scheme
            .unlock(Network::Testnet, &UnlockOptions::with_password("new"))
            .unwrap();
        assert_eq!(pubkey(&unlocked), pubkey(&created));
    }

    #[test]
    fn test_v1_password_change_unsupported() {
        let (mut scheme, created) = create(WalletVersion::V1, &UnlockOptions::default());
        assert_eq!(
            scheme.change_password(&created, "new", None).unwrap_err(),
            EnvelopeError::PasswordChangeUnsupported(WalletVersion::V1)
        );
    }

    #[test]
    fn test_blobs_bound_to_version() {
        let (scheme, _) = create(WalletVersion::V2, &UnlockOptions::with_password("pw"));
        let sealed = scheme.sealed().unwrap();
        let seed = sealed.encrypted_primary_seed.as_ref().unwrap().to_base64();
        let secret = sealed.encrypted_secret.as_ref().unwrap().to_base64();

        assert!(KeyUnlockScheme::from_parts(WalletVersion::V2, None, Some(seed.as_str()), Some(secret.as_str())).is_ok());
        let err = KeyUnlockScheme::from_parts(WalletVersion::V3, None, Some(seed.as_str()), Some(secret.as_str()))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::VersionMismatch { .. }));
    }

    #[test]
    fn test_options_from_json_rejects_unknown_fields() {
        let options: UnlockOptions = serde_json::from_str(r#"{"password": "pw"}"#).unwrap();
        assert_eq!(options.password.as_deref(), Some("pw"));
        assert!(serde_json::from_str::<UnlockOptions>(r#"{"pasword": "pw"}"#).is_err());
        assert!(!format!("{:?}", options).contains("pw"));
    }
}
