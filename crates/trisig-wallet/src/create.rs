//! Wallet creation

use bitcoin::secp256k1::Secp256k1;
use log::info;
use std::collections::BTreeMap;
use std::fmt;
use trisig_core::keys::checksum_script;
use trisig_core::paths::{key_index_path, BTC_SEGWIT_CHAIN};
use trisig_core::script::ScriptError;
use trisig_core::seed;
use trisig_core::{AddressCodec, ExtendedPrivateKey, KeyUnlockScheme, WalletVersion};
use zeroize::Zeroizing;

use crate::cache::DerivationCache;
use crate::coordinator::{Coordinator, CosignerKeys, NewWalletRequest};
use crate::error::Result;
use crate::fee::FeeRateCache;
use crate::options::CreateWalletOptions;
use crate::wallet::Wallet;

/// What goes on the recovery sheet.
#[derive(Clone)]
pub struct WalletBackup {
    pub identifier: String,
    pub wallet_version: WalletVersion,
    pub checksum: String,
    pub backup_mnemonic: Zeroizing<String>,
    /// v1 only
    pub primary_mnemonic: Option<Zeroizing<String>>,
    /// v2/v3, base64
    pub encrypted_primary_seed: Option<String>,
    /// v2/v3, base64
    pub encrypted_secret: Option<String>,
    pub cosigner_public_keys: CosignerKeys,
}

impl fmt::Debug for WalletBackup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletBackup")
            .field("identifier", &self.identifier)
            .field("wallet_version", &self.wallet_version)
            .field("checksum", &self.checksum)
            .field("encrypted_primary_seed", &self.encrypted_primary_seed)
            .field("encrypted_secret", &self.encrypted_secret)
            .field("cosigner_public_keys", &self.cosigner_public_keys)
            .finish_non_exhaustive()
    }
}

impl<C: Coordinator> Wallet<C> {
    /// Generate key material, register the wallet with the coordinator and
    /// return it unlocked together with its backup.
    pub fn create(
        coordinator: C,
        codec: Box<dyn AddressCodec>,
        options: &CreateWalletOptions,
    ) -> Result<(Self, WalletBackup)> {
        let params = options.network;
        if options.segwit && !params.supports_segwit() {
            return Err(ScriptError::UnsupportedChain(BTC_SEGWIT_CHAIN).into());
        }
        let secp = Secp256k1::new();

        let (scheme, keys) = KeyUnlockScheme::create(
            options.wallet_version,
            params.network(),
            &options.unlock_options(),
            options.password_kdf,
        )?;
        let checksum = codec.address_from_script(&checksum_script(&secp, &keys.master))?;
        let primary_public_key = keys
            .master
            .derive_to(&secp, &key_index_path(options.key_index))?
            .to_public(&secp);

        let backup_mnemonic = match options.backup_mnemonic.as_deref() {
            Some(words) => seed::parse_mnemonic(words)?,
            None => seed::generate_mnemonic()?,
        };
        let backup_seed = seed::derive_seed(&backup_mnemonic, "");
        let backup_public_key =
            ExtendedPrivateKey::from_seed(params.network(), &backup_seed[..])?.to_public(&secp);

        let sealed = scheme.sealed();
        let encrypted_primary_seed = sealed
            .and_then(|s| s.encrypted_primary_seed.as_ref())
            .map(|b| b.to_base64());
        let encrypted_secret = sealed
            .and_then(|s| s.encrypted_secret.as_ref())
            .map(|b| b.to_base64());
        let primary_mnemonic = scheme.primary_mnemonic().map(str::to_string);

        let request = NewWalletRequest {
            identifier: options.identifier.clone(),
            wallet_version: options.wallet_version,
            key_index: options.key_index,
            segwit: options.segwit,
            checksum: checksum.clone(),
            primary_public_key: primary_public_key.clone(),
            backup_public_key: backup_public_key.clone(),
            encrypted_primary_seed: encrypted_primary_seed
                .clone()
                .filter(|_| options.store_data_on_server),
            encrypted_secret: encrypted_secret
                .clone()
                .filter(|_| options.store_data_on_server),
            primary_mnemonic: primary_mnemonic
                .clone()
                .filter(|_| options.store_data_on_server),
        };
        let cosigner_public_keys = coordinator.store_new_wallet(&request)?;
        info!(
            "Created {} wallet {} on {}",
            options.wallet_version, options.identifier, params
        );

        let backup = WalletBackup {
            identifier: options.identifier.clone(),
            wallet_version: options.wallet_version,
            checksum: checksum.clone(),
            backup_mnemonic: Zeroizing::new(backup_mnemonic.to_string()),
            primary_mnemonic: primary_mnemonic.map(Zeroizing::new),
            encrypted_primary_seed,
            encrypted_secret,
            cosigner_public_keys: cosigner_public_keys.clone(),
        };

        let wallet = Wallet {
            coordinator,
            codec,
            params,
            secp,
            identifier: options.identifier.clone(),
            segwit: options.segwit,
            key_index: options.key_index,
            checksum,
            primary_public_keys: BTreeMap::from([(options.key_index, primary_public_key)]),
            backup_public_key,
            cosigner_public_keys,
            scheme,
            unlocked: Some(keys),
            derivations: DerivationCache::new(),
            fee_rates: FeeRateCache::default(),
        };
        Ok((wallet, backup))
    }
}
