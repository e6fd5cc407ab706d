//! The wallet engine
//!
//! A [`Wallet`] is locked until [`Wallet::unlock`] rehydrates the primary
//! key and the checksum matches. Spending, key index upgrades, password
//! changes and deletion need it unlocked; address derivation does not.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::transaction::Version;
use bitcoin::{Amount, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use log::{debug, info, warn};
use rand::Rng;
use std::collections::BTreeMap;
use trisig_core::keys::{checksum_script, derive_wallet_keys};
use trisig_core::paths::{key_index_path, BTC_SEGWIT_CHAIN};
use trisig_core::script::{derive_wallet_script, ScriptError};
use trisig_core::sign::{apply_multisig_signatures, sign_input, SignError};
use trisig_core::size::estimate_input;
use trisig_core::{
    AddressCodec, ExtendedPrivateKey, ExtendedPublicKey, KdfParams, KeyUnlockScheme, NetworkParams,
    UnlockOptions, UnlockedKeys, WalletPath, WalletScript, WalletVersion,
};

use crate::cache::DerivationCache;
use crate::coordinator::{
    CoinSelection, CoinSelectionRequest, Coordinator, CosignerKeys, DeleteRequest, SendRequest,
    WalletRecord, WalletUpdate,
};
use crate::error::{Result, WalletError};
use crate::fee::{determine_fee_and_change, FeeInput, FeePolicy, FeeRateCache, FeeRates};
use crate::options::{InitWalletOptions, PayOptions};
use crate::tx::{
    Destination, FeeIntent, FeeStrategy, SignInfo, SignMode, TransactionBuilder, TxError, Utxo,
};

/// Length of a P2SH scriptPubKey, the shape of every wallet change output
const P2SH_SCRIPT_LEN: usize = 23;

pub struct Wallet<C> {
    pub(crate) coordinator: C,
    pub(crate) codec: Box<dyn AddressCodec>,
    pub(crate) params: NetworkParams,
    pub(crate) secp: Secp256k1<All>,
    pub(crate) identifier: String,
    pub(crate) segwit: bool,
    pub(crate) key_index: u32,
    pub(crate) checksum: String,
    pub(crate) primary_public_keys: BTreeMap<u32, ExtendedPublicKey>,
    pub(crate) backup_public_key: ExtendedPublicKey,
    pub(crate) cosigner_public_keys: CosignerKeys,
    pub(crate) scheme: KeyUnlockScheme,
    pub(crate) unlocked: Option<UnlockedKeys>,
    pub(crate) derivations: DerivationCache,
    pub(crate) fee_rates: FeeRateCache,
}

/// Re-locks the wallet when dropped, including during unwinding.
struct Relock<'a, C>(&'a mut Wallet<C>);

impl<C> Drop for Relock<'_, C> {
    fn drop(&mut self) {
        self.0.lock();
    }
}

fn script_mismatch(what: &'static str, expected: Option<&Script>, actual: Option<&Script>) -> ScriptError {
    let render = |s: Option<&Script>| s.map(|s| hex::encode(s.as_bytes())).unwrap_or_default();
    ScriptError::ScriptMismatch {
        what,
        expected: render(expected),
        actual: render(actual),
    }
}

impl<C> Wallet<C> {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn version(&self) -> WalletVersion {
        self.scheme.version()
    }

    pub fn key_index(&self) -> u32 {
        self.key_index
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn is_segwit(&self) -> bool {
        self.segwit
    }

    pub fn is_locked(&self) -> bool {
        self.unlocked.is_none()
    }

    pub fn backup_public_key(&self) -> &ExtendedPublicKey {
        &self.backup_public_key
    }

    pub fn primary_public_key(&self, key_index: u32) -> Option<&ExtendedPublicKey> {
        self.primary_public_keys.get(&key_index)
    }

    pub fn cosigner_public_key(&self, key_index: u32) -> Option<&ExtendedPublicKey> {
        self.cosigner_public_keys.get(&key_index)
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// Drop the primary key and any decrypted secret or seed.
    pub fn lock(&mut self) {
        if self.unlocked.take().is_some() {
            info!("Wallet {} locked", self.identifier);
        }
    }

    fn unlocked_keys(&self) -> Result<&UnlockedKeys> {
        self.unlocked.as_ref().ok_or(WalletError::WalletLocked)
    }

    /// Master primary key; only available while unlocked.
    pub fn primary_private_key(&self) -> Result<&ExtendedPrivateKey> {
        Ok(&self.unlocked_keys()?.master)
    }

    pub fn clear_derivation_cache(&mut self) {
        self.derivations.clear();
    }
}

impl<C: Coordinator> Wallet<C> {
    /// Build a locked wallet from its coordinator record.
    pub fn from_record(
        coordinator: C,
        codec: Box<dyn AddressCodec>,
        params: NetworkParams,
        record: WalletRecord,
    ) -> Result<Self> {
        if record.segwit && !params.supports_segwit() {
            return Err(ScriptError::UnsupportedChain(BTC_SEGWIT_CHAIN).into());
        }
        let scheme = KeyUnlockScheme::from_parts(
            record.wallet_version,
            record.primary_mnemonic.as_deref(),
            record.encrypted_primary_seed.as_deref(),
            record.encrypted_secret.as_deref(),
        )?;

        Ok(Self {
            coordinator,
            codec,
            params,
            secp: Secp256k1::new(),
            identifier: record.identifier,
            segwit: record.segwit,
            key_index: record.key_index,
            checksum: record.checksum,
            primary_public_keys: record.primary_public_keys,
            backup_public_key: record.backup_public_key,
            cosigner_public_keys: record.cosigner_public_keys,
            scheme,
            unlocked: None,
            derivations: DerivationCache::new(),
            fee_rates: FeeRateCache::default(),
        })
    }

    /// Load an existing wallet. A missing wallet surfaces as
    /// `CoordinatorError::NotFound` for the caller to branch on.
    pub fn init(
        coordinator: C,
        codec: Box<dyn AddressCodec>,
        options: &InitWalletOptions,
    ) -> Result<Self> {
        let record = coordinator.get_wallet(&options.identifier)?;

        if let Some(expected) = &options.check_backup_key {
            let actual = record.backup_public_key.xpub().to_string();
            if *expected != actual {
                return Err(WalletError::BackupKeyMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let mut wallet = Self::from_record(coordinator, codec, options.network, record)?;
        info!(
            "Initialised {} wallet {} on {} (key index {})",
            wallet.version(),
            wallet.identifier,
            wallet.params,
            wallet.key_index
        );

        if let Some(unlock) = &options.unlock {
            wallet.unlock(unlock)?;
        }
        Ok(wallet)
    }

    /// Rehydrate the primary key and check it against the stored checksum.
    /// On mismatch the wallet stays locked.
    pub fn unlock(&mut self, options: &UnlockOptions) -> Result<()> {
        // A failed re-unlock must not leave the previous keys in place.
        self.lock();
        let keys = self.scheme.unlock(self.params.network(), options)?;
        let computed = self
            .codec
            .address_from_script(&checksum_script(&self.secp, &keys.master))?;

        let matches = computed == self.checksum
            || self
                .codec
                .same_destination(&computed, &self.checksum)
                .unwrap_or(false);
        if !matches {
            return Err(WalletError::ChecksumMismatch {
                expected: self.checksum.clone(),
                computed,
            });
        }

        self.unlocked = Some(keys);
        info!("Wallet {} unlocked", self.identifier);
        Ok(())
    }

    /// Unlock, run `f`, and lock again however `f` ends.
    pub fn with_unlocked<T>(
        &mut self,
        options: &UnlockOptions,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.unlock(options)?;
        let mut guard = Relock(self);
        f(&mut *guard.0)
    }

    fn wallet_keys(&self, path: &WalletPath) -> Result<[PublicKey; 3]> {
        let key_index = path.key_index();
        let primary = self
            .primary_public_keys
            .get(&key_index)
            .ok_or(WalletError::UnknownKeyIndex(key_index))?;
        let cosigner = self
            .cosigner_public_keys
            .get(&key_index)
            .ok_or(WalletError::UnknownKeyIndex(key_index))?;
        Ok(derive_wallet_keys(
            &self.secp,
            path,
            primary,
            &self.backup_public_key,
            cosigner,
        )?)
    }

    fn derive_script(&mut self, path: &WalletPath, expected_address: Option<&str>) -> Result<WalletScript> {
        if let Some(script) = self.derivations.get_by_path(path) {
            if expected_address.map_or(true, |a| a == script.address()) {
                return Ok(script.clone());
            }
        }
        let keys = self.wallet_keys(path)?;
        let script = derive_wallet_script(
            path,
            &keys,
            &self.params,
            self.codec.as_ref(),
            expected_address,
        )?;
        self.derivations.insert(script.clone());
        Ok(script)
    }

    pub fn wallet_script_by_path(&mut self, path: &WalletPath) -> Result<WalletScript> {
        self.derive_script(path, None)
    }

    pub fn address_by_path(&mut self, path: &WalletPath) -> Result<String> {
        Ok(self.derive_script(path, None)?.address().to_string())
    }

    /// Ask the coordinator for the next address on `chain` (the network's
    /// default chain when `None`) and check it against a local derivation.
    pub fn get_new_address(&mut self, chain: Option<u32>) -> Result<(WalletPath, String)> {
        let chain = chain.unwrap_or_else(|| self.params.default_chain(self.segwit));
        let template = format!("M/{}'/{}", self.key_index, chain);
        let derivation = self
            .coordinator
            .new_derivation(&self.identifier, &template)?;

        let path = derivation.path;
        if path.key_index() != self.key_index || path.chain() != chain {
            return Err(ScriptError::ScriptMismatch {
                what: "path",
                expected: template,
                actual: path.to_string(),
            }
            .into());
        }

        let script = self.derive_script(&path, Some(&derivation.address))?;
        if script.script_pubkey() != derivation.script_pubkey.as_script() {
            return Err(script_mismatch(
                "scriptPubKey",
                Some(script.script_pubkey()),
                Some(&derivation.script_pubkey),
            )
            .into());
        }
        if script.redeem_script() != derivation.redeem_script.as_script() {
            return Err(script_mismatch(
                "redeem script",
                Some(script.redeem_script()),
                Some(&derivation.redeem_script),
            )
            .into());
        }
        if script.witness_script() != derivation.witness_script.as_deref() {
            return Err(script_mismatch(
                "witness script",
                script.witness_script(),
                derivation.witness_script.as_deref(),
            )
            .into());
        }

        debug!("New address {} at {}", script.address(), path);
        Ok((path, script.address().to_string()))
    }

    /// Cached derivations first, then the coordinator.
    pub fn path_for_address(&self, address: &str) -> Result<WalletPath> {
        if let Some(path) = self.derivations.path_for_address(address) {
            return Ok(path);
        }
        Ok(self.coordinator.path_for_address(&self.identifier, address)?)
    }

    /// Per-KB fee rates, refreshed from the coordinator once stale.
    pub fn fee_per_kb(&mut self) -> Result<FeeRates> {
        if let Some(rates) = self.fee_rates.get() {
            return Ok(rates);
        }
        let rates = self.coordinator.fee_per_kb()?;
        self.fee_rates.store(rates);
        Ok(rates)
    }

    fn destination_script(&self, destination: &Destination) -> Result<ScriptBuf> {
        match destination {
            Destination::Address(address) => Ok(self.codec.script_pubkey(address)?),
            Destination::Script(script) => Ok(script.clone()),
        }
    }

    /// Have the coordinator pick UTXOs for the builder's outputs and add
    /// them as inputs.
    pub fn coin_selection(
        &mut self,
        builder: &mut TransactionBuilder,
        lock: bool,
        allow_zero_conf: bool,
    ) -> Result<CoinSelection> {
        let outputs = builder
            .outputs()
            .iter()
            .map(|r| -> Result<(ScriptBuf, Amount)> {
                Ok((self.destination_script(&r.destination)?, r.value))
            })
            .collect::<Result<Vec<_>>>()?;
        let request = CoinSelectionRequest {
            outputs,
            lock,
            allow_zero_conf,
            fee_strategy: builder.fee_strategy(),
            force_fee: builder.fee(),
        };

        let selection = self.coordinator.coin_selection(&self.identifier, &request)?;
        self.fee_rates.store(selection.fees);

        let mut staged = builder.clone();
        for utxo in &selection.utxos {
            if let Err(e) = staged.spend_output(utxo.clone()) {
                if lock {
                    // Only the locks this selection took; the caller's own
                    // inputs keep theirs.
                    let taken: Vec<Utxo> = selection
                        .utxos
                        .iter()
                        .filter(|u| !builder.utxos().iter().any(|b| b.outpoint == u.outpoint))
                        .cloned()
                        .collect();
                    self.release_utxos(&taken);
                }
                return Err(e.into());
            }
        }
        *builder = staged;
        debug!(
            "Coin selection picked {} UTXOs (fee {}, change {})",
            selection.utxos.len(),
            selection.fee,
            selection.change
        );
        Ok(selection)
    }

    /// Fill in whatever the UTXO is missing: value and script from the
    /// funding transaction, path and scripts from a derivation.
    fn resolve_utxo(&mut self, utxo: &Utxo) -> Result<(Utxo, TxOut)> {
        let mut utxo = utxo.clone();
        if utxo.script_pubkey.is_none() {
            if let Some(address) = &utxo.address {
                utxo.script_pubkey = Some(self.codec.script_pubkey(address)?);
            }
        }

        let output = match (utxo.value, utxo.script_pubkey.clone()) {
            (Some(value), Some(script_pubkey)) => TxOut {
                value,
                script_pubkey,
            },
            (value, script_pubkey) => {
                let funding = self.coordinator.get_transaction(&utxo.outpoint.txid)?;
                let prev = funding
                    .output
                    .get(utxo.outpoint.vout as usize)
                    .ok_or(WalletError::MissingOutput(utxo.outpoint))?;
                TxOut {
                    value: value.unwrap_or(prev.value),
                    script_pubkey: script_pubkey.unwrap_or_else(|| prev.script_pubkey.clone()),
                }
            }
        };
        utxo.value = Some(output.value);
        utxo.script_pubkey = Some(output.script_pubkey.clone());
        if utxo.address.is_none() {
            utxo.address = self.codec.address_from_script(&output.script_pubkey).ok();
        }

        if utxo.sign_mode == SignMode::Sign {
            let path = match utxo.path {
                Some(path) => path,
                None => {
                    let address = match &utxo.address {
                        Some(address) => address.clone(),
                        None => self.codec.address_from_script(&output.script_pubkey)?,
                    };
                    let path = self.path_for_address(&address)?;
                    utxo.path = Some(path);
                    path
                }
            };
            if utxo.redeem_script.is_none() {
                let script = self.derive_script(&path, None)?;
                if script.script_pubkey() != output.script_pubkey.as_script() {
                    return Err(script_mismatch(
                        "scriptPubKey",
                        Some(script.script_pubkey()),
                        Some(&output.script_pubkey),
                    )
                    .into());
                }
                utxo.redeem_script = Some(script.redeem_script().to_owned());
                utxo.witness_script = script.witness_script().map(ToOwned::to_owned);
            }
        }
        Ok((utxo, output))
    }

    fn fee_policy(&mut self, intent: FeeIntent) -> Result<FeePolicy> {
        match intent {
            FeeIntent::Fixed(fee) => Ok(FeePolicy::Fixed(fee)),
            FeeIntent::Strategy(FeeStrategy::BaseFee) => Ok(FeePolicy::base_fee()),
            FeeIntent::Strategy(strategy) => {
                let rates = self.fee_per_kb()?;
                rates
                    .policy_for(strategy)
                    .ok_or(WalletError::Tx(TxError::ForceFeeNeedsAmount))
            }
        }
    }

    /// Reorder outputs for change privacy. The coordinator's shuffle wins;
    /// without one the change output (last) moves to a random position.
    fn shuffle_outputs(&self, mut outputs: Vec<TxOut>) -> Result<Vec<TxOut>> {
        if let Some(shuffled) = self.coordinator.shuffle_outputs(&outputs)? {
            let mut expected = outputs.clone();
            let mut actual = shuffled.clone();
            expected.sort();
            actual.sort();
            if expected != actual {
                return Err(WalletError::ShuffleChangedOutputs);
            }
            return Ok(shuffled);
        }

        if let Some(change) = outputs.pop() {
            let position = rand::thread_rng().gen_range(0..=outputs.len());
            outputs.insert(position, change);
        }
        Ok(outputs)
    }

    /// Assemble the unsigned transaction and what the signer needs for each
    /// input. Nothing is returned unless every step succeeds.
    pub fn build_tx(&mut self, builder: &TransactionBuilder) -> Result<(Transaction, Vec<SignInfo>)> {
        let resolved = builder
            .utxos()
            .iter()
            .map(|u| self.resolve_utxo(u))
            .collect::<Result<Vec<_>>>()?;
        let mut outputs = builder
            .outputs()
            .iter()
            .map(|r| -> Result<TxOut> {
                Ok(TxOut {
                    value: r.value,
                    script_pubkey: self.destination_script(&r.destination)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let input_sizes = resolved
            .iter()
            .map(|(utxo, output)| {
                estimate_input(
                    &output.script_pubkey,
                    utxo.redeem_script.as_deref(),
                    utxo.witness_script.as_deref(),
                )
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let output_scripts: Vec<usize> = outputs.iter().map(|o| o.script_pubkey.len()).collect();
        let change_script = builder
            .change_address()
            .map(|a| self.codec.script_pubkey(a))
            .transpose()?;

        let policy = self.fee_policy(builder.fee_intent())?;
        let settled = determine_fee_and_change(
            &FeeInput {
                inputs: &input_sizes,
                input_total: resolved.iter().map(|(_, o)| o.value).sum(),
                output_scripts: &output_scripts,
                output_total: builder.output_total(),
                change_script: change_script.as_ref().map_or(P2SH_SCRIPT_LEN, |s| s.len()),
            },
            &policy,
        )?;

        if let Some(expected) = builder.validate_fee() {
            if expected != settled.fee {
                return Err(WalletError::FeeMismatch {
                    expected,
                    actual: settled.fee,
                });
            }
        }
        if let Some(expected) = builder.validate_change() {
            if expected != settled.change {
                return Err(WalletError::ChangeMismatch {
                    expected,
                    actual: settled.change,
                });
            }
        }

        if settled.change > Amount::ZERO {
            let script_pubkey = match change_script {
                Some(script) => script,
                None => {
                    let (_, address) = self.get_new_address(None)?;
                    self.codec.script_pubkey(&address)?
                }
            };
            outputs.push(TxOut {
                value: settled.change,
                script_pubkey,
            });
            if builder.randomizes_change_output() {
                outputs = self.shuffle_outputs(outputs)?;
            }
        }

        let tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: resolved
                .iter()
                .map(|(utxo, _)| TxIn {
                    previous_output: utxo.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs,
        };
        let sign_infos = resolved
            .into_iter()
            .map(|(utxo, output)| {
                SignInfo::new(
                    utxo.outpoint,
                    utxo.sign_mode,
                    utxo.path,
                    utxo.redeem_script,
                    utxo.witness_script,
                    output,
                )
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            "Built tx with {} inputs, {} outputs, fee {}, change {}",
            tx.input.len(),
            tx.output.len(),
            settled.fee,
            settled.change
        );
        Ok((tx, sign_infos))
    }

    /// Sign every `Sign`-mode input with the primary key, leaving a slot
    /// for the cosigner.
    pub fn sign_transaction(&self, tx: &mut Transaction, sign_infos: &[SignInfo]) -> Result<()> {
        let keys = self.unlocked_keys()?;
        let mut signed = tx.clone();

        for (index, info) in sign_infos.iter().enumerate() {
            if info.mode == SignMode::DontSign {
                continue;
            }
            let outpoint = signed
                .input
                .get(index)
                .ok_or(SignError::InputOutOfRange(index))?
                .previous_output;
            let (Some(path), Some(redeem_script)) = (info.path, info.redeem_script.as_deref()) else {
                return Err(TxError::MissingSignInfo {
                    outpoint,
                    what: "path and redeem script",
                }
                .into());
            };
            let witness_script = info.witness_script.as_deref();

            let key = keys.master.derive_to(&self.secp, &path.path())?;
            let signature = sign_input(
                &self.secp,
                &signed,
                index,
                &key.secret_key(),
                redeem_script,
                witness_script,
                Some(info.output.value),
                &self.params,
            )?;
            apply_multisig_signatures(
                &mut signed,
                index,
                redeem_script,
                witness_script,
                &[signature],
                true,
            )?;
        }

        *tx = signed;
        Ok(())
    }

    /// Hand the primary-signed transaction to the coordinator to co-sign
    /// and broadcast.
    pub fn send_tx(&mut self, tx: &Transaction, paths: Vec<WalletPath>, check_fee: bool) -> Result<Txid> {
        self.unlocked_keys()?;
        let response = self.coordinator.send_transaction(
            &self.identifier,
            &SendRequest {
                transaction: tx.clone(),
                paths,
                check_fee,
            },
        )?;
        if !response.complete {
            return Err(WalletError::IncompleteSignature);
        }
        info!("Sent transaction {}", response.txid);
        Ok(response.txid)
    }

    fn release_utxos(&self, utxos: &[Utxo]) {
        for utxo in utxos {
            if let Err(e) = self.coordinator.unlock_utxo(&self.identifier, &utxo.outpoint) {
                warn!("Failed to release UTXO lock on {}: {}", utxo.outpoint, e);
            }
        }
    }

    fn complete_payment(&mut self, builder: &TransactionBuilder, check_fee: bool) -> Result<Txid> {
        let (mut tx, sign_infos) = self.build_tx(builder)?;
        self.sign_transaction(&mut tx, &sign_infos)?;
        let paths = sign_infos.iter().filter_map(|info| info.path).collect();
        self.send_tx(&tx, paths, check_fee)
    }

    /// Pay `recipients`: select coins, build, sign and send. UTXOs locked
    /// for the payment are released if it fails after selection.
    pub fn pay(&mut self, recipients: &[(String, Amount)], options: &PayOptions) -> Result<Txid> {
        self.unlocked_keys()?;

        let mut builder = TransactionBuilder::new();
        for (address, value) in recipients {
            builder.add_recipient(address, *value)?;
        }
        if let Some(address) = &options.change_address {
            builder.set_change_address(address);
        }
        builder.randomize_change_output(options.randomize_change_output);
        match options.force_fee {
            Some(fee) => {
                builder.set_fee(fee);
            }
            None => {
                builder.set_fee_strategy(options.fee_strategy)?;
            }
        }

        self.coin_selection(&mut builder, options.lock_utxos, options.allow_zero_conf)?;
        let result = self.complete_payment(&builder, options.check_fee);
        if result.is_err() && options.lock_utxos {
            self.release_utxos(builder.utxos());
        }
        result
    }

    pub fn lock_utxo(&self, outpoint: &bitcoin::OutPoint) -> Result<()> {
        Ok(self.coordinator.lock_utxo(&self.identifier, outpoint)?)
    }

    pub fn unlock_utxo(&self, outpoint: &bitcoin::OutPoint) -> Result<()> {
        Ok(self.coordinator.unlock_utxo(&self.identifier, outpoint)?)
    }

    /// Move to `key_index`: publish the primary key for it and learn the
    /// cosigner keys. Keys already known are never replaced.
    pub fn upgrade_key_index(&mut self, key_index: u32) -> Result<()> {
        let keys = self.unlocked_keys()?;
        let primary = keys
            .master
            .derive_to(&self.secp, &key_index_path(key_index))?
            .to_public(&self.secp);

        let cosigners = self
            .coordinator
            .upgrade_key_index(&self.identifier, key_index, &primary)?;

        self.primary_public_keys.entry(key_index).or_insert(primary);
        for (index, key) in cosigners {
            self.cosigner_public_keys.entry(index).or_insert(key);
        }
        self.key_index = key_index;
        info!("Wallet {} upgraded to key index {}", self.identifier, key_index);
        Ok(())
    }

    /// Re-wrap the secret under `new_password` (v2/v3). The local envelope
    /// only changes once the coordinator has stored the new blob.
    pub fn password_change(&mut self, new_password: &str, password_kdf: Option<KdfParams>) -> Result<()> {
        let keys = self.unlocked_keys()?;
        let mut scheme = self.scheme.clone();
        let blob = scheme.change_password(keys, new_password, password_kdf)?;

        self.coordinator.update_wallet(
            &self.identifier,
            &WalletUpdate {
                encrypted_secret: Some(blob.to_base64()),
            },
        )?;
        self.scheme = scheme;
        info!("Wallet {} password changed", self.identifier);
        Ok(())
    }

    /// Prove ownership by signing the checksum address with the master key
    /// and ask the coordinator to delete the wallet. Locks on success.
    pub fn delete_wallet(&mut self, force: bool) -> Result<bool> {
        let keys = self.unlocked_keys()?;
        let hash = signed_msg_hash(&self.checksum);
        let signature = self.secp.sign_ecdsa_recoverable(
            &Message::from_digest(hash.to_byte_array()),
            &keys.master.secret_key(),
        );
        let request = DeleteRequest {
            checksum: self.checksum.clone(),
            signature: BASE64.encode(MessageSignature::new(signature, true).serialize()),
            force,
        };

        let deleted = self.coordinator.delete_wallet(&self.identifier, &request)?;
        if deleted {
            info!("Wallet {} deleted", self.identifier);
            self.lock();
        }
        Ok(deleted)
    }
}
