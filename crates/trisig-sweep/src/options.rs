//! Sweeper configuration and recovery material

use bitcoin::Network;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use trisig_core::paths::BTC_DEFAULT_CHAIN;
use trisig_core::seed;
use trisig_core::{
    ExtendedPrivateKey, KeyUnlockScheme, NetworkParams, Throttle, UnlockOptions, WalletVersion,
};
use zeroize::Zeroizing;

use crate::error::{Result, SweepError};

/// Options for [`crate::WalletSweeper`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperOptions {
    #[serde(default)]
    pub network: NetworkParams,

    /// Scan the segwit chain as well
    #[serde(default)]
    pub segwit: bool,

    /// Chains to scan; derived from `segwit` when absent
    pub chains: Option<Vec<u32>>,

    /// Addresses per lookup call; a batch with no funds ends the scan
    #[serde(default = "default_batch_increment")]
    pub batch_increment: u32,

    /// Minimum spacing between lookup calls, in milliseconds
    #[serde(default)]
    pub throttle_ms: u64,
}

impl SweeperOptions {
    pub fn new(network: NetworkParams) -> Self {
        Self {
            network,
            segwit: false,
            chains: None,
            batch_increment: default_batch_increment(),
            throttle_ms: 0,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| SweepError::Config(e.to_string()))
    }

    /// `[0]` plus the chain new addresses go to (`2` for segwit wallets,
    /// `1` on fork-id chains), unless set explicitly.
    pub fn chains(&self) -> Vec<u32> {
        if let Some(chains) = &self.chains {
            return chains.clone();
        }
        let mut chains = vec![BTC_DEFAULT_CHAIN];
        let current = self.network.default_chain(self.segwit);
        if current != BTC_DEFAULT_CHAIN {
            chains.push(current);
        }
        chains
    }

    pub fn throttle(&self) -> Throttle {
        Throttle::new(Duration::from_millis(self.throttle_ms))
    }
}

// ===== Default value functions =====

fn default_batch_increment() -> u32 {
    200
}

/// Material the primary master key is rebuilt from.
#[derive(Clone)]
pub enum PrimaryRecovery {
    /// v1: the primary mnemonic and its passphrase
    Mnemonic {
        mnemonic: Zeroizing<String>,
        passphrase: Zeroizing<String>,
    },
    /// v2/v3: the encrypted blobs from the recovery sheet and the password
    Encrypted {
        version: WalletVersion,
        encrypted_primary_seed: String,
        encrypted_secret: String,
        password: Zeroizing<String>,
    },
    /// The primary seed itself
    Seed(Zeroizing<Vec<u8>>),
}

impl PrimaryRecovery {
    pub fn master_key(&self, network: Network) -> Result<ExtendedPrivateKey> {
        let (scheme, options) = match self {
            PrimaryRecovery::Seed(seed) => {
                return Ok(ExtendedPrivateKey::from_seed(network, seed)?);
            }
            PrimaryRecovery::Mnemonic {
                mnemonic,
                passphrase,
            } => (
                KeyUnlockScheme::from_parts(WalletVersion::V1, Some(mnemonic.as_str()), None, None)?,
                UnlockOptions::with_passphrase(passphrase.as_str()),
            ),
            PrimaryRecovery::Encrypted {
                version,
                encrypted_primary_seed,
                encrypted_secret,
                password,
            } => (
                KeyUnlockScheme::from_parts(
                    *version,
                    None,
                    Some(encrypted_primary_seed.as_str()),
                    Some(encrypted_secret.as_str()),
                )?,
                UnlockOptions::with_password(password.as_str()),
            ),
        };
        let keys = scheme.unlock(network, &options)?;
        Ok(keys.master)
    }
}

impl fmt::Debug for PrimaryRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryRecovery::Mnemonic { .. } => f.write_str("PrimaryRecovery::Mnemonic(..)"),
            PrimaryRecovery::Encrypted { version, .. } => {
                write!(f, "PrimaryRecovery::Encrypted({})", version)
            }
            PrimaryRecovery::Seed(_) => f.write_str("PrimaryRecovery::Seed(..)"),
        }
    }
}

/// The backup master key: the backup mnemonic with an empty passphrase.
pub fn backup_master_key(network: Network, backup_mnemonic: &str) -> Result<ExtendedPrivateKey> {
    let mnemonic = seed::parse_mnemonic(backup_mnemonic)?;
    let seed = seed::derive_seed(&mnemonic, "");
    Ok(ExtendedPrivateKey::from_seed(network, &seed[..])?)
}
