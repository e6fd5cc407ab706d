//! Fund discovery and the recovery sweep
//!
//! Addresses are rebuilt from the primary and backup master keys plus the
//! cosigner public keys on the recovery sheet. Both private keys the user
//! holds sign, which satisfies the 2-of-3 without the cosigner.

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use trisig_core::keys::derive_wallet_keys;
use trisig_core::paths::{key_index_path, BTC_SEGWIT_CHAIN};
use trisig_core::script::{derive_wallet_script, ScriptError};
use trisig_core::sign::{apply_multisig_signatures, sign_input};
use trisig_core::fee::{FeePolicy, DUST};
use trisig_core::size::{estimate_tx, InputSize, P2PKH_OUTPUT_SIZE};
use trisig_core::{
    AddressCodec, ExtendedPrivateKey, ExtendedPublicKey, Throttle, WalletPath, WalletScript,
};

use crate::error::{Result, SweepError};
use crate::finder::{UnspentOutput, UnspentOutputFinder};
use crate::options::{backup_master_key, PrimaryRecovery, SweeperOptions};

/// scriptPubKey length of a P2PKH output (its serialized output is
/// [`P2PKH_OUTPUT_SIZE`] bytes)
const P2PKH_SCRIPT_LEN: usize = P2PKH_OUTPUT_SIZE - 9;

/// Fee for a sweep with `inputs` 2-of-3 P2SH inputs and `outputs` P2PKH
/// outputs, charged at the base fee per started kilobyte.
pub fn estimate_fee(inputs: usize, outputs: usize) -> Amount {
    let size = estimate_tx(
        &vec![InputSize::p2sh_multisig(2, 3); inputs],
        &vec![P2PKH_SCRIPT_LEN; outputs],
    );
    FeePolicy::base_fee().fee_for(&size)
}

/// A discovered output and how to spend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepInput {
    pub utxo: UnspentOutput,
    pub script: WalletScript,
}

pub struct WalletSweeper<F> {
    finder: F,
    codec: Box<dyn AddressCodec>,
    options: SweeperOptions,
    secp: Secp256k1<All>,
    primary: ExtendedPrivateKey,
    backup: ExtendedPrivateKey,
    primary_public_keys: BTreeMap<u32, ExtendedPublicKey>,
    backup_public_key: ExtendedPublicKey,
    cosigner_public_keys: BTreeMap<u32, ExtendedPublicKey>,
    throttle: Throttle,
    found: BTreeMap<OutPoint, SweepInput>,
}

impl<F: UnspentOutputFinder> WalletSweeper<F> {
    /// `cosigner_public_keys` decides which key indexes are scanned.
    pub fn new(
        finder: F,
        codec: Box<dyn AddressCodec>,
        options: SweeperOptions,
        primary: ExtendedPrivateKey,
        backup: ExtendedPrivateKey,
        cosigner_public_keys: BTreeMap<u32, ExtendedPublicKey>,
    ) -> Result<Self> {
        if !options.network.supports_segwit() && options.chains().contains(&BTC_SEGWIT_CHAIN) {
            return Err(ScriptError::UnsupportedChain(BTC_SEGWIT_CHAIN).into());
        }
        let secp = Secp256k1::new();

        let primary_public_keys = cosigner_public_keys
            .keys()
            .map(|&key_index| -> Result<(u32, ExtendedPublicKey)> {
                let key = primary
                    .derive_to(&secp, &key_index_path(key_index))?
                    .to_public(&secp);
                Ok((key_index, key))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        let backup_public_key = backup.to_public(&secp);
        let throttle = options.throttle();

        Ok(Self {
            finder,
            codec,
            options,
            secp,
            primary,
            backup,
            primary_public_keys,
            backup_public_key,
            cosigner_public_keys,
            throttle,
            found: BTreeMap::new(),
        })
    }

    /// Rebuild both master keys from the recovery sheet and set up the
    /// sweeper.
    pub fn from_recovery(
        finder: F,
        codec: Box<dyn AddressCodec>,
        options: SweeperOptions,
        primary: &PrimaryRecovery,
        backup_mnemonic: &str,
        cosigner_public_keys: BTreeMap<u32, ExtendedPublicKey>,
    ) -> Result<Self> {
        let network = options.network.network();
        let primary = primary.master_key(network)?;
        let backup = backup_master_key(network, backup_mnemonic)?;
        Self::new(finder, codec, options, primary, backup, cosigner_public_keys)
    }

    pub fn options(&self) -> &SweeperOptions {
        &self.options
    }

    /// Everything discovered so far, by outpoint.
    pub fn discovered(&self) -> impl Iterator<Item = &SweepInput> {
        self.found.values()
    }

    pub fn balance(&self) -> Amount {
        self.found.values().map(|input| input.utxo.value).sum()
    }

    pub fn utxo_count(&self) -> usize {
        self.found.len()
    }

    fn wallet_script(&self, path: &WalletPath) -> Result<WalletScript> {
        let key_index = path.key_index();
        let (Some(primary), Some(cosigner)) = (
            self.primary_public_keys.get(&key_index),
            self.cosigner_public_keys.get(&key_index),
        ) else {
            return Err(SweepError::Config(format!(
                "no cosigner key for key index {}",
                key_index
            )));
        };
        let keys = derive_wallet_keys(
            &self.secp,
            path,
            primary,
            &self.backup_public_key,
            cosigner,
        )?;
        Ok(derive_wallet_script(
            path,
            &keys,
            &self.options.network,
            self.codec.as_ref(),
            None,
        )?)
    }

    /// Look up one batch of consecutive addresses. Returns how many outputs
    /// it found, including ones already known.
    fn discover_batch(&mut self, key_index: u32, chain: u32, start: u32, count: u32) -> Result<usize> {
        let scripts = (start..start.saturating_add(count))
            .map(|index| -> Result<WalletScript> {
                self.wallet_script(&WalletPath::create(key_index, chain, index)?)
            })
            .collect::<Result<Vec<_>>>()?;
        let addresses: Vec<String> = scripts.iter().map(|s| s.address().to_string()).collect();
        let by_address: HashMap<&str, &WalletScript> =
            scripts.iter().map(|s| (s.address(), s)).collect();
        let by_script: HashMap<&bitcoin::Script, &WalletScript> =
            scripts.iter().map(|s| (s.script_pubkey(), s)).collect();

        self.throttle.wait();
        let utxos = self.finder.get_unspent_outputs(&addresses)?;

        let mut matched = 0;
        for utxo in utxos {
            let script = by_address
                .get(utxo.address.as_str())
                .or_else(|| by_script.get(utxo.script_pubkey.as_script()));
            let Some(script) = script else {
                warn!("Ignoring {} paying to unrequested address {}", utxo.outpoint, utxo.address);
                continue;
            };
            matched += 1;
            if self.found.contains_key(&utxo.outpoint) {
                continue;
            }
            debug!("Found {} ({}) at {}", utxo.outpoint, utxo.value, script.path());
            self.found.insert(
                utxo.outpoint,
                SweepInput {
                    utxo,
                    script: (*script).clone(),
                },
            );
        }
        Ok(matched)
    }

    /// Scan every key index and chain in batches of `batch_increment`
    /// addresses (the configured size when `None`). A chain's scan ends at
    /// the first batch with no funds anywhere in it. Returns the total
    /// balance discovered.
    pub fn discover_wallet_funds(&mut self, batch_increment: Option<u32>) -> Result<Amount> {
        let batch = batch_increment.unwrap_or(self.options.batch_increment).max(1);
        let key_indexes: Vec<u32> = self.cosigner_public_keys.keys().copied().collect();

        for key_index in key_indexes {
            for chain in self.options.chains() {
                let mut start = 0u32;
                loop {
                    let found = self.discover_batch(key_index, chain, start, batch)?;
                    info!(
                        "Scanned M/{}'/{}/{}..{}: {} UTXOs",
                        key_index,
                        chain,
                        start,
                        start.saturating_add(batch),
                        found
                    );
                    if found == 0 {
                        break;
                    }
                    start = start.saturating_add(batch);
                }
            }
        }

        let balance = self.balance();
        info!("Discovered {} in {} UTXOs", balance, self.utxo_count());
        Ok(balance)
    }

    /// Spend everything discovered to `destination`, signed with the
    /// primary and backup keys.
    pub fn sweep_wallet(&self, destination: &str) -> Result<Transaction> {
        let balance = self.balance();
        if self.found.is_empty() || balance == Amount::ZERO {
            return Err(SweepError::NoFundsFound);
        }
        let fee = estimate_fee(self.found.len(), 1);
        let value = balance
            .checked_sub(fee)
            .filter(|v| *v > DUST)
            .ok_or(SweepError::InsufficientFunds { balance, fee })?;
        let script_pubkey: ScriptBuf = self.codec.script_pubkey(destination)?;

        let inputs: Vec<&SweepInput> = self.found.values().collect();
        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: input.utxo.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value,
                script_pubkey,
            }],
        };

        for (index, input) in inputs.iter().enumerate() {
            let path = input.script.path();
            let primary = self.primary.derive_to(&self.secp, &path.path())?;
            let backup = self
                .backup
                .derive_to(&self.secp, &path.backup_path().private_path())?;
            let redeem_script = input.script.redeem_script();
            let witness_script = input.script.witness_script();

            let signatures = [primary, backup]
                .iter()
                .map(|key| {
                    sign_input(
                        &self.secp,
                        &tx,
                        index,
                        &key.secret_key(),
                        redeem_script,
                        witness_script,
                        Some(input.utxo.value),
                        &self.options.network,
                    )
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            apply_multisig_signatures(
                &mut tx,
                index,
                redeem_script,
                witness_script,
                &signatures,
                false,
            )?;
        }

        info!(
            "Sweeping {} from {} UTXOs to {} (fee {})",
            value,
            inputs.len(),
            destination,
            fee
        );
        Ok(tx)
    }
}
