//! trisig wallet engine
//!
//! Builds, fees and signs spends from 2-of-3 multisig wallets whose records
//! and cosigning live behind a [`Coordinator`].
//!
//! # Example
//!
//! ```ignore
//! use trisig_wallet::{InitWalletOptions, PayOptions, Wallet};
//! use trisig_core::{BitcoinAddressCodec, NetworkParams, UnlockOptions};
//! use bitcoin::{Amount, Network};
//!
//! let options = InitWalletOptions::new("savings", NetworkParams::bitcoin(Network::Testnet));
//! let mut wallet = Wallet::init(coordinator, Box::new(BitcoinAddressCodec::new(Network::Testnet)), &options)?;
//! let txid = wallet.with_unlocked(&UnlockOptions::with_password("correct horse"), |w| {
//!     w.pay(&[(address, Amount::from_sat(100_000))], &PayOptions::default())
//! })?;
//! ```

pub mod cache;
pub mod coordinator;
pub mod create;
pub mod error;
pub mod fee;
pub mod options;
pub mod tx;
pub mod wallet;

pub use cache::DerivationCache;
pub use coordinator::{
    CoinSelection, CoinSelectionRequest, Coordinator, CoordinatorError, CosignerKeys,
    DeleteRequest, DerivationResponse, NewWalletRequest, SendRequest, SendResponse, WalletRecord,
    WalletUpdate,
};
pub use create::WalletBackup;
pub use error::WalletError;
pub use fee::{
    determine_fee_and_change, FeeAndChange, FeeError, FeeInput, FeePolicy, FeeRateCache, FeeRates,
    BASE_FEE,
};
pub use options::{CreateWalletOptions, InitWalletOptions, PayOptions};
pub use tx::{
    Destination, FeeIntent, FeeStrategy, Recipient, SignInfo, SignMode, TransactionBuilder,
    TxError, Utxo, DUST,
};
pub use wallet::Wallet;
