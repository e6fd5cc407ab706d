//! Per-operation options
//!
//! Each struct lists every recognised field with its default. They load from
//! TOML as well as being built in code; unknown keys are an error.

use bitcoin::Amount;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use trisig_core::{KdfParams, NetworkParams, UnlockOptions, WalletVersion};

use crate::error::{Result, WalletError};
use crate::tx::FeeStrategy;

fn from_toml<T: DeserializeOwned>(s: &str) -> Result<T> {
    toml::from_str(s).map_err(|e| WalletError::Config(e.to_string()))
}

/// Options for creating a new wallet
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateWalletOptions {
    pub identifier: String,

    /// "bitcoin", "testnet", "regtest", "bch", "tbch"
    #[serde(default)]
    pub network: NetworkParams,

    #[serde(default)]
    pub wallet_version: WalletVersion,

    #[serde(default)]
    pub key_index: u32,

    #[serde(default)]
    pub segwit: bool,

    /// Send the encrypted seed (or v1 mnemonic) to the coordinator
    #[serde(default = "default_store_data_on_server")]
    pub store_data_on_server: bool,

    /// v2/v3
    pub password: Option<String>,

    /// v1
    pub passphrase: Option<String>,

    /// Reuse an existing backup mnemonic instead of generating one
    pub backup_mnemonic: Option<String>,

    /// Argon2 cost for the password-wrapped secret
    pub password_kdf: Option<KdfParams>,
}

impl CreateWalletOptions {
    pub fn new(identifier: impl Into<String>, network: NetworkParams) -> Self {
        Self {
            identifier: identifier.into(),
            network,
            wallet_version: WalletVersion::default(),
            key_index: 0,
            segwit: false,
            store_data_on_server: default_store_data_on_server(),
            password: None,
            passphrase: None,
            backup_mnemonic: None,
            password_kdf: None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        from_toml(s)
    }

    pub(crate) fn unlock_options(&self) -> UnlockOptions {
        UnlockOptions {
            password: self.password.clone(),
            passphrase: self.passphrase.clone(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for CreateWalletOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateWalletOptions")
            .field("identifier", &self.identifier)
            .field("network", &self.network)
            .field("wallet_version", &self.wallet_version)
            .field("key_index", &self.key_index)
            .field("segwit", &self.segwit)
            .field("store_data_on_server", &self.store_data_on_server)
            .field("password", &self.password.is_some())
            .field("passphrase", &self.passphrase.is_some())
            .field("backup_mnemonic", &self.backup_mnemonic.is_some())
            .field("password_kdf", &self.password_kdf)
            .finish()
    }
}

/// Options for loading an existing wallet
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitWalletOptions {
    pub identifier: String,

    #[serde(default)]
    pub network: NetworkParams,

    /// Backup xpub the stored record must carry
    pub check_backup_key: Option<String>,

    /// Unlock right away with these credentials
    pub unlock: Option<UnlockOptions>,
}

impl InitWalletOptions {
    pub fn new(identifier: impl Into<String>, network: NetworkParams) -> Self {
        Self {
            identifier: identifier.into(),
            network,
            check_backup_key: None,
            unlock: None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        from_toml(s)
    }
}

/// Options for [`crate::Wallet::pay`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayOptions {
    #[serde(default)]
    pub allow_zero_conf: bool,

    #[serde(default)]
    pub fee_strategy: FeeStrategy,

    pub change_address: Option<String>,

    #[serde(default = "default_randomize_change_output")]
    pub randomize_change_output: bool,

    /// Fixed fee in satoshi; overrides `fee_strategy`
    #[serde(default, with = "bitcoin::amount::serde::as_sat::opt")]
    pub force_fee: Option<Amount>,

    /// Ask the coordinator to check the fee before co-signing
    #[serde(default = "default_check_fee")]
    pub check_fee: bool,

    /// Lock the selected UTXOs while the payment is built
    #[serde(default = "default_lock_utxos")]
    pub lock_utxos: bool,
}

impl Default for PayOptions {
    fn default() -> Self {
        Self {
            allow_zero_conf: false,
            fee_strategy: FeeStrategy::default(),
            change_address: None,
            randomize_change_output: default_randomize_change_output(),
            force_fee: None,
            check_fee: default_check_fee(),
            lock_utxos: default_lock_utxos(),
        }
    }
}

impl PayOptions {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        from_toml(s)
    }
}

// ===== Default value functions =====

fn default_store_data_on_server() -> bool {
    true
}

fn default_randomize_change_output() -> bool {
    true
}

fn default_check_fee() -> bool {
    true
}

fn default_lock_utxos() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;

    #[test]
    fn test_create_options_defaults() {
        let options = CreateWalletOptions::from_toml_str(
            r#"
identifier = "savings"
password = "correct horse"
"#,
        )
        .unwrap();
        assert_eq!(options.identifier, "savings");
        assert_eq!(options.network, NetworkParams::default());
        assert_eq!(options.wallet_version, WalletVersion::V3);
        assert_eq!(options.key_index, 0);
        assert!(!options.segwit);
        assert!(options.store_data_on_server);
        assert_eq!(options.password.as_deref(), Some("correct horse"));
    }

    #[test]
    fn test_create_options_full() {
        let options = CreateWalletOptions::from_toml_str(
            r#"
identifier = "legacy"
network = "tbch"
wallet_version = "v1"
key_index = 9999
store_data_on_server = false
passphrase = "hunter2"

[password_kdf]
m_cost = 1024
t_cost = 1
p_cost = 1
"#,
        )
        .unwrap();
        assert_eq!(options.network, NetworkParams::bitcoin_cash(Network::Testnet));
        assert_eq!(options.wallet_version, WalletVersion::V1);
        assert_eq!(options.key_index, 9999);
        assert!(!options.store_data_on_server);
        assert_eq!(options.password_kdf, Some(KdfParams::new(1024, 1, 1)));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = CreateWalletOptions::from_toml_str(
            r#"
identifier = "w"
segwitt = true
"#,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::Config(msg) if msg.contains("segwitt")));

        assert!(PayOptions::from_toml_str("lock = false").is_err());
        assert!(InitWalletOptions::from_toml_str("identifier = \"w\"\n[unlock]\npasword = \"x\"").is_err());
    }

    #[test]
    fn test_missing_identifier_rejected() {
        assert!(matches!(
            CreateWalletOptions::from_toml_str("segwit = true"),
            Err(WalletError::Config(_))
        ));
    }

    #[test]
    fn test_init_options_with_unlock() {
        let options = InitWalletOptions::from_toml_str(
            r#"
identifier = "savings"
network = "testnet"
check_backup_key = "tpub..."

[unlock]
password = "correct horse"
"#,
        )
        .unwrap();
        assert_eq!(options.network, NetworkParams::bitcoin(Network::Testnet));
        assert_eq!(
            options.unlock.unwrap().password.as_deref(),
            Some("correct horse")
        );
    }

    #[test]
    fn test_pay_options() {
        assert_eq!(PayOptions::from_toml_str("").unwrap(), PayOptions::default());

        let options = PayOptions::from_toml_str(
            r#"
fee_strategy = "base_fee"
force_fee = 12000
randomize_change_output = false
"#,
        )
        .unwrap();
        assert_eq!(options.fee_strategy, FeeStrategy::BaseFee);
        assert_eq!(options.force_fee, Some(Amount::from_sat(12_000)));
        assert!(!options.randomize_change_output);
        assert!(options.lock_utxos);
        assert!(options.check_fee);
    }
}
