//! Extended keys tagged with the path they sit at
//!
//! A wallet never holds a bare xpub: the coordinator hands out `[xpub, path]`
//! tuples and derivation always goes from a key to a path *below* it. Keeping
//! the path next to the key lets [`ExtendedPublicKey::derive_to`] refuse a
//! target that is not actually a descendant.

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::{Network, ScriptBuf};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::paths::{Bip32Path, PathError, PathSegment, WalletPath};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Invalid extended key: {0}")]
    InvalidKey(String),

    #[error("Key at {key_path} is not a parent of {target}")]
    NotAParent { key_path: String, target: String },

    #[error("Cannot derive hardened path {0} from a public key")]
    HardenedFromPublic(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

fn child_numbers(levels: &[PathSegment]) -> Vec<ChildNumber> {
    levels.iter().map(PathSegment::to_child_number).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    xpub: Xpub,
    path: Bip32Path,
}

impl ExtendedPublicKey {
    pub fn new(xpub: Xpub, path: Bip32Path) -> Self {
        Self {
            xpub,
            path: path.public_path(),
        }
    }

    /// Parse the `[xpub, path]` tuple form the coordinator stores.
    pub fn from_tuple(xpub: &str, path: &str) -> Result<Self, KeyError> {
        let xpub: Xpub = xpub
            .parse()
            .map_err(|e: bitcoin::bip32::Error| KeyError::InvalidKey(e.to_string()))?;
        let path: Bip32Path = path.parse()?;
        Ok(Self::new(xpub, path))
    }

    pub fn to_tuple(&self) -> (String, String) {
        (self.xpub.to_string(), self.path.to_string())
    }

    pub fn xpub(&self) -> &Xpub {
        &self.xpub
    }

    pub fn path(&self) -> &Bip32Path {
        &self.path
    }

    pub fn public_key(&self) -> PublicKey {
        self.xpub.public_key
    }

    /// Derive the key at `target`, which must lie below this key's path and
    /// contain no hardened levels past it.
    pub fn derive_to<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        target: &Bip32Path,
    ) -> Result<ExtendedPublicKey, KeyError> {
        let levels = self
            .path
            .relative_to_parent(target)
            .ok_or_else(|| KeyError::NotAParent {
                key_path: self.path.to_string(),
                target: target.to_string(),
            })?;
        if levels.iter().any(PathSegment::is_hardened) {
            return Err(KeyError::HardenedFromPublic(target.to_string()));
        }
        let xpub = self
            .xpub
            .derive_pub(secp, &child_numbers(levels))
            .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
        Ok(Self {
            xpub,
            path: target.public_path(),
        })
    }
}

impl fmt::Display for ExtendedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.xpub, self.path)
    }
}

impl Serialize for ExtendedPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_tuple().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExtendedPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (xpub, path) = <(String, String)>::deserialize(deserializer)?;
        Self::from_tuple(&xpub, &path).map_err(serde::de::Error::custom)
    }
}

/// Private counterpart; `Debug` only shows the path. The secret key is
/// wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtendedPrivateKey {
    xpriv: Xpriv,
    path: Bip32Path,
}

impl ExtendedPrivateKey {
    /// Master key `m` for a BIP-32 seed.
    pub fn from_seed(network: Network, seed: &[u8]) -> Result<Self, KeyError> {
        let xpriv = Xpriv::new_master(network, seed)
            .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
        Ok(Self {
            xpriv,
            path: Bip32Path::master(),
        })
    }

    pub fn new(xpriv: Xpriv, path: Bip32Path) -> Self {
        Self {
            xpriv,
            path: path.private_path(),
        }
    }

    /// Parse an `xprv…`/`tprv…` string sitting at `path`.
    pub fn from_str_at(xpriv: &str, path: &str) -> Result<Self, KeyError> {
        let xpriv: Xpriv = xpriv
            .parse()
            .map_err(|e: bitcoin::bip32::Error| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self::new(xpriv, path.parse()?))
    }

    pub fn xpriv(&self) -> &Xpriv {
        &self.xpriv
    }

    pub fn path(&self) -> &Bip32Path {
        &self.path
    }

    pub fn secret_key(&self) -> SecretKey {
        self.xpriv.private_key
    }

    pub fn public_key<C: Signing>(&self, secp: &Secp256k1<C>) -> PublicKey {
        self.xpriv.private_key.public_key(secp)
    }

    pub fn derive_to<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        target: &Bip32Path,
    ) -> Result<ExtendedPrivateKey, KeyError> {
        let levels = self
            .path
            .relative_to_parent(target)
            .ok_or_else(|| KeyError::NotAParent {
                key_path: self.path.to_string(),
                target: target.to_string(),
            })?;
        let xpriv = self
            .xpriv
            .derive_priv(secp, &child_numbers(levels))
            .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
        Ok(Self {
            xpriv,
            path: target.private_path(),
        })
    }

    pub fn to_public<C: Signing>(&self, secp: &Secp256k1<C>) -> ExtendedPublicKey {
        ExtendedPublicKey {
            xpub: Xpub::from_priv(secp, &self.xpriv),
            path: self.path.public_path(),
        }
    }
}

impl Zeroize for ExtendedPrivateKey {
    fn zeroize(&mut self) {
        self.xpriv.private_key.non_secure_erase();
    }
}

impl Drop for ExtendedPrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for ExtendedPrivateKey {}

impl fmt::Debug for ExtendedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedPrivateKey")
            .field("path", &self.path.to_string())
            .finish_non_exhaustive()
    }
}

/// The three public keys behind a wallet address, in
/// `[primary, backup, cosigner]` order (unsorted).
pub fn derive_wallet_keys<C: Verification>(
    secp: &Secp256k1<C>,
    path: &WalletPath,
    primary: &ExtendedPublicKey,
    backup: &ExtendedPublicKey,
    cosigner: &ExtendedPublicKey,
) -> Result<[PublicKey; 3], KeyError> {
    let primary = primary.derive_to(secp, &path.public_path())?;
    let backup = backup.derive_to(secp, &path.backup_path())?;
    let cosigner = cosigner.derive_to(secp, &path.public_path())?;
    Ok([
        primary.public_key(),
        backup.public_key(),
        cosigner.public_key(),
    ])
}

/// P2PKH script of the compressed master public key. Its address is the
/// wallet checksum.
pub fn checksum_script<C: Signing>(secp: &Secp256k1<C>, master: &ExtendedPrivateKey) -> ScriptBuf {
    let pk = bitcoin::PublicKey::new(master.public_key(secp));
    ScriptBuf::new_p2pkh(&pk.pubkey_hash())
}
