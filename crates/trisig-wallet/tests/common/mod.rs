//! In-memory coordinator for wallet tests.

#![allow(dead_code)]

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{Amount, Network, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Txid};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use trisig_core::keys::derive_wallet_keys;
use trisig_core::paths::key_index_path;
use trisig_core::script::derive_wallet_script;
use trisig_core::{
    AddressCodec, BitcoinAddressCodec, ExtendedPrivateKey, ExtendedPublicKey, KdfParams,
    NetworkParams, WalletPath,
};
use trisig_wallet::{
    CoinSelection, CoinSelectionRequest, Coordinator, CoordinatorError, CosignerKeys,
    DeleteRequest, DerivationResponse, FeeRates, NewWalletRequest, SendRequest, SendResponse,
    Utxo, WalletRecord, WalletUpdate,
};

pub const NETWORK: Network = Network::Testnet;
pub const FAST_KDF: KdfParams = KdfParams::new(64, 1, 1);

pub fn params() -> NetworkParams {
    NetworkParams::bitcoin(NETWORK)
}

pub fn codec() -> Box<dyn AddressCodec> {
    Box::new(BitcoinAddressCodec::new(NETWORK))
}

/// Master key the mock cosigner signs with.
pub fn cosigner_master(seed: u8) -> ExtendedPrivateKey {
    ExtendedPrivateKey::from_seed(NETWORK, &[seed; 32]).unwrap()
}

fn cosigner_xpub(seed: u8, key_index: u32) -> ExtendedPublicKey {
    let secp = Secp256k1::new();
    cosigner_master(seed)
        .derive_to(&secp, &key_index_path(key_index))
        .unwrap()
        .to_public(&secp)
}

#[derive(Default)]
pub struct MockState {
    pub record: Option<WalletRecord>,
    pub next_address: HashMap<(u32, u32), u32>,
    pub paths: HashMap<String, WalletPath>,
    pub transactions: HashMap<Txid, Transaction>,
    pub selection: Vec<Utxo>,
    pub selection_requests: Vec<CoinSelectionRequest>,
    pub locked: HashSet<OutPoint>,
    pub released: Vec<OutPoint>,
    pub sent: Vec<SendRequest>,
    pub send_error: Option<CoordinatorError>,
    pub complete: bool,
    pub fee_calls: usize,
    pub updates: Vec<WalletUpdate>,
    pub deletes: Vec<DeleteRequest>,
    /// Answer shuffle requests by reversing the outputs
    pub reverse_outputs: bool,
    /// Lose one output while shuffling
    pub drop_shuffled_output: bool,
    pub shuffle_calls: usize,
}

pub struct MockCoordinator {
    pub state: Mutex<MockState>,
    pub rates: FeeRates,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                complete: true,
                ..Default::default()
            }),
            rates: FeeRates {
                high_priority: Amount::from_sat(40_000),
                optimal: Amount::from_sat(20_000),
                low_priority: Amount::from_sat(5_000),
            },
        }
    }

    pub fn with_record(record: WalletRecord) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().record = Some(record);
        mock
    }

    pub fn record(&self) -> WalletRecord {
        self.state.lock().unwrap().record.clone().unwrap()
    }

    /// Record a transaction paying `value` to each of `scripts` and return
    /// its outpoints.
    pub fn fund(&self, payments: &[(ScriptBuf, Amount)]) -> Vec<OutPoint> {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn::default()],
            output: payments
                .iter()
                .map(|(script_pubkey, value)| TxOut {
                    value: *value,
                    script_pubkey: script_pubkey.clone(),
                })
                .collect(),
        };
        let txid = tx.compute_txid();
        self.state.lock().unwrap().transactions.insert(txid, tx);
        (0..payments.len() as u32)
            .map(|vout| OutPoint::new(txid, vout))
            .collect()
    }

    pub fn set_selection(&self, utxos: Vec<Utxo>) {
        self.state.lock().unwrap().selection = utxos;
    }
}

impl Coordinator for &MockCoordinator {
    fn get_wallet(&self, identifier: &str) -> Result<WalletRecord, CoordinatorError> {
        self.state
            .lock()
            .unwrap()
            .record
            .clone()
            .filter(|r| r.identifier == identifier)
            .ok_or_else(|| CoordinatorError::NotFound(identifier.to_string()))
    }

    fn store_new_wallet(&self, request: &NewWalletRequest) -> Result<CosignerKeys, CoordinatorError> {
        let cosigners = BTreeMap::from([(request.key_index, cosigner_xpub(7, request.key_index))]);
        self.state.lock().unwrap().record = Some(WalletRecord {
            identifier: request.identifier.clone(),
            wallet_version: request.wallet_version,
            key_index: request.key_index,
            checksum: request.checksum.clone(),
            segwit: request.segwit,
            backup_public_key: request.backup_public_key.clone(),
            cosigner_public_keys: cosigners.clone(),
            primary_public_keys: BTreeMap::from([(
                request.key_index,
                request.primary_public_key.clone(),
            )]),
            encrypted_primary_seed: request.encrypted_primary_seed.clone(),
            encrypted_secret: request.encrypted_secret.clone(),
            primary_mnemonic: request.primary_mnemonic.clone(),
        });
        Ok(cosigners)
    }

    fn new_derivation(
        &self,
        _identifier: &str,
        path_template: &str,
    ) -> Result<DerivationResponse, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .record
            .clone()
            .ok_or_else(|| CoordinatorError::NotFound("wallet".into()))?;

        let parts: Vec<&str> = path_template.trim_start_matches("M/").split('/').collect();
        let key_index: u32 = parts[0].trim_end_matches('\'').parse().unwrap();
        let chain: u32 = parts[1].parse().unwrap();
        let counter = state.next_address.entry((key_index, chain)).or_insert(0);
        let path = WalletPath::create(key_index, chain, *counter).unwrap();
        *counter += 1;

        let secp = Secp256k1::new();
        let keys = derive_wallet_keys(
            &secp,
            &path,
            &record.primary_public_keys[&key_index],
            &record.backup_public_key,
            &record.cosigner_public_keys[&key_index],
        )
        .unwrap();
        let script = derive_wallet_script(
            &path,
            &keys,
            &params(),
            &BitcoinAddressCodec::new(NETWORK),
            None,
        )
        .unwrap();
        state.paths.insert(script.address().to_string(), path);

        Ok(DerivationResponse {
            path,
            address: script.address().to_string(),
            script_pubkey: script.script_pubkey().to_owned(),
            redeem_script: script.redeem_script().to_owned(),
            witness_script: script.witness_script().map(ToOwned::to_owned),
        })
    }

    fn path_for_address(&self, _identifier: &str, address: &str) -> Result<WalletPath, CoordinatorError> {
        self.state
            .lock()
            .unwrap()
            .paths
            .get(address)
            .copied()
            .ok_or_else(|| CoordinatorError::NotFound(address.to_string()))
    }

    fn coin_selection(
        &self,
        _identifier: &str,
        request: &CoinSelectionRequest,
    ) -> Result<CoinSelection, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        state.selection_requests.push(request.clone());
        let utxos = state.selection.clone();
        if request.lock {
            for utxo in &utxos {
                state.locked.insert(utxo.outpoint);
            }
        }
        Ok(CoinSelection {
            utxos,
            fee: Amount::from_sat(10_000),
            change: Amount::ZERO,
            fees: self.rates,
        })
    }

    fn fee_per_kb(&self) -> Result<FeeRates, CoordinatorError> {
        self.state.lock().unwrap().fee_calls += 1;
        Ok(self.rates)
    }

    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, CoordinatorError> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(txid.to_string()))
    }

    fn shuffle_outputs(&self, outputs: &[TxOut]) -> Result<Option<Vec<TxOut>>, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        state.shuffle_calls += 1;
        if !state.reverse_outputs {
            return Ok(None);
        }
        let mut shuffled: Vec<TxOut> = outputs.iter().rev().cloned().collect();
        if state.drop_shuffled_output {
            shuffled.pop();
        }
        Ok(Some(shuffled))
    }

    fn send_transaction(
        &self,
        _identifier: &str,
        request: &SendRequest,
    ) -> Result<SendResponse, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.send_error.clone() {
            return Err(err);
        }
        state.sent.push(request.clone());
        Ok(SendResponse {
            complete: state.complete,
            txid: request.transaction.compute_txid(),
        })
    }

    fn lock_utxo(&self, _identifier: &str, outpoint: &OutPoint) -> Result<(), CoordinatorError> {
        self.state.lock().unwrap().locked.insert(*outpoint);
        Ok(())
    }

    fn unlock_utxo(&self, _identifier: &str, outpoint: &OutPoint) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        state.locked.remove(outpoint);
        state.released.push(*outpoint);
        Ok(())
    }

    fn upgrade_key_index(
        &self,
        _identifier: &str,
        key_index: u32,
        primary_public_key: &ExtendedPublicKey,
    ) -> Result<CosignerKeys, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .record
            .as_mut()
            .ok_or_else(|| CoordinatorError::NotFound("wallet".into()))?;
        record
            .primary_public_keys
            .insert(key_index, primary_public_key.clone());
        record
            .cosigner_public_keys
            .insert(key_index, cosigner_xpub(7, key_index));

        // Answer with a rotated key for every index, so callers must keep
        // the ones they already had.
        Ok(record
            .cosigner_public_keys
            .keys()
            .map(|&index| {
                let seed = if index == key_index { 7 } else { 8 };
                (index, cosigner_xpub(seed, index))
            })
            .collect())
    }

    fn update_wallet(&self, _identifier: &str, update: &WalletUpdate) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        if let (Some(record), Some(secret)) = (state.record.as_mut(), &update.encrypted_secret) {
            record.encrypted_secret = Some(secret.clone());
        }
        state.updates.push(update.clone());
        Ok(())
    }

    fn delete_wallet(&self, _identifier: &str, request: &DeleteRequest) -> Result<bool, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(request.clone());
        state.record = None;
        Ok(true)
    }
}

/// Consensus-verify every input of `tx` against the outputs it spends.
pub fn consensus_verify(tx: &Transaction, spent_outputs: &[TxOut]) {
    let tx_bytes = bitcoin::consensus::encode::serialize(tx);
    let utxos: Vec<bitcoinconsensus::Utxo> = spent_outputs
        .iter()
        .map(|o| {
            let spk = o.script_pubkey.as_bytes();
            bitcoinconsensus::Utxo {
                script_pubkey: spk.as_ptr(),
                script_pubkey_len: spk.len() as u32,
                value: o.value.to_sat() as i64,
            }
        })
        .collect();

    for (index, prev) in spent_outputs.iter().enumerate() {
        let result = bitcoinconsensus::verify(
            prev.script_pubkey.as_bytes(),
            prev.value.to_sat(),
            &tx_bytes,
            Some(&utxos),
            index,
        );
        assert!(
            result.is_ok(),
            "consensus verification failed for input {}: {:?}",
            index,
            result.err()
        );
    }
}
