//! trisig sweep
//!
//! Disaster recovery for trisig wallets: rebuild every wallet address from
//! the recovery sheet, find the funds through an [`UnspentOutputFinder`],
//! and move them out with the primary and backup keys alone.
//!
//! # Example
//!
//! ```ignore
//! use trisig_sweep::{PrimaryRecovery, SweeperOptions, WalletSweeper};
//! use trisig_core::BitcoinAddressCodec;
//!
//! let options = SweeperOptions::from_toml_str(r#"network = "testnet""#)?;
//! let mut sweeper = WalletSweeper::from_recovery(
//!     finder,
//!     Box::new(BitcoinAddressCodec::new(options.network.network())),
//!     options,
//!     &primary,
//!     &backup_mnemonic,
//!     cosigner_public_keys,
//! )?;
//! sweeper.discover_wallet_funds(None)?;
//! let tx = sweeper.sweep_wallet(&destination)?;
//! ```

pub mod error;
pub mod finder;
pub mod options;
pub mod sweeper;

pub use error::SweepError;
pub use finder::{FinderError, UnspentOutput, UnspentOutputFinder};
pub use options::{backup_master_key, PrimaryRecovery, SweeperOptions};
pub use sweeper::{estimate_fee, SweepInput, WalletSweeper};
