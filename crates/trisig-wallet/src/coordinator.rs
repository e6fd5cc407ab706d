//! Backend coordinator boundary
//!
//! The coordinator stores wallet records, hands out derivations, runs coin
//! selection and co-signs. Transport and authentication live behind this
//! trait; the engine only sees typed requests and responses.

use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use trisig_core::{ExtendedPublicKey, WalletPath, WalletVersion};

use crate::fee::FeeRates;
use crate::tx::{FeeStrategy, Utxo};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Coordinator timed out: {0}")]
    Timeout(String),

    #[error("Coordinator transport error: {0}")]
    Transport(String),

    #[error("Coordinator rejected request: {0}")]
    Rejected(String),
}

impl CoordinatorError {
    /// Whether retrying the whole operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Timeout(_) | CoordinatorError::Transport(_)
        )
    }
}

/// Cosigner public keys by key index.
pub type CosignerKeys = BTreeMap<u32, ExtendedPublicKey>;

/// Wallet record as persisted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub identifier: String,
    pub wallet_version: WalletVersion,
    pub key_index: u32,
    /// Address of the master primary key
    pub checksum: String,
    #[serde(default)]
    pub segwit: bool,
    pub backup_public_key: ExtendedPublicKey,
    pub cosigner_public_keys: CosignerKeys,
    pub primary_public_keys: BTreeMap<u32, ExtendedPublicKey>,
    #[serde(default)]
    pub encrypted_primary_seed: Option<String>,
    #[serde(default)]
    pub encrypted_secret: Option<String>,
    #[serde(default)]
    pub primary_mnemonic: Option<String>,
}

/// Everything a new wallet registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewWalletRequest {
    pub identifier: String,
    pub wallet_version: WalletVersion,
    pub key_index: u32,
    pub segwit: bool,
    pub checksum: String,
    pub primary_public_key: ExtendedPublicKey,
    pub backup_public_key: ExtendedPublicKey,
    pub encrypted_primary_seed: Option<String>,
    pub encrypted_secret: Option<String>,
    pub primary_mnemonic: Option<String>,
}

/// A derivation handed out by the coordinator. The wallet re-derives and
/// compares every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationResponse {
    pub path: WalletPath,
    pub address: String,
    pub script_pubkey: ScriptBuf,
    pub redeem_script: ScriptBuf,
    #[serde(default)]
    pub witness_script: Option<ScriptBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelectionRequest {
    pub outputs: Vec<(ScriptBuf, Amount)>,
    pub lock: bool,
    pub allow_zero_conf: bool,
    pub fee_strategy: FeeStrategy,
    pub force_fee: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub utxos: Vec<Utxo>,
    pub fee: Amount,
    pub change: Amount,
    pub fees: FeeRates,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Partially signed by the primary key
    pub transaction: Transaction,
    pub paths: Vec<WalletPath>,
    pub check_fee: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub complete: bool,
    pub txid: Txid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletUpdate {
    pub encrypted_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteRequest {
    pub checksum: String,
    /// Base64 signed message of `checksum` by the master primary key
    pub signature: String,
    pub force: bool,
}

/// Calls block until the coordinator answers or the transport times out.
pub trait Coordinator {
    fn get_wallet(&self, identifier: &str) -> Result<WalletRecord, CoordinatorError>;

    /// Returns the cosigner keys assigned to the new wallet.
    fn store_new_wallet(&self, request: &NewWalletRequest) -> Result<CosignerKeys, CoordinatorError>;

    /// `path_template` is `M/<key_index>'/<chain>`.
    fn new_derivation(
        &self,
        identifier: &str,
        path_template: &str,
    ) -> Result<DerivationResponse, CoordinatorError>;

    fn path_for_address(&self, identifier: &str, address: &str) -> Result<WalletPath, CoordinatorError>;

    fn coin_selection(
        &self,
        identifier: &str,
        request: &CoinSelectionRequest,
    ) -> Result<CoinSelection, CoordinatorError>;

    fn fee_per_kb(&self) -> Result<FeeRates, CoordinatorError>;

    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, CoordinatorError>;

    /// Reorder `outputs` for change privacy. `None` means no shuffle is
    /// offered and the wallet places the change output itself.
    fn shuffle_outputs(&self, _outputs: &[TxOut]) -> Result<Option<Vec<TxOut>>, CoordinatorError> {
        Ok(None)
    }

    fn send_transaction(
        &self,
        identifier: &str,
        request: &SendRequest,
    ) -> Result<SendResponse, CoordinatorError>;

    fn lock_utxo(&self, identifier: &str, outpoint: &OutPoint) -> Result<(), CoordinatorError>;

    fn unlock_utxo(&self, identifier: &str, outpoint: &OutPoint) -> Result<(), CoordinatorError>;

    /// Returns any cosigner keys the coordinator now knows about.
    fn upgrade_key_index(
        &self,
        identifier: &str,
        key_index: u32,
        primary_public_key: &ExtendedPublicKey,
    ) -> Result<CosignerKeys, CoordinatorError>;

    fn update_wallet(&self, identifier: &str, update: &WalletUpdate) -> Result<(), CoordinatorError>;

    fn delete_wallet(&self, identifier: &str, request: &DeleteRequest) -> Result<bool, CoordinatorError>;
}
