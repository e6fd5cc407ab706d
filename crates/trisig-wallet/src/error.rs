use bitcoin::{Amount, OutPoint};
use thiserror::Error;
use trisig_core::address::AddressError;
use trisig_core::envelope::EnvelopeError;
use trisig_core::keys::KeyError;
use trisig_core::paths::PathError;
use trisig_core::script::ScriptError;
use trisig_core::seed::SeedError;
use trisig_core::sign::SignError;
use trisig_core::size::SizeError;

use crate::coordinator::CoordinatorError;
use crate::fee::FeeError;
use crate::tx::TxError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Wallet is locked")]
    WalletLocked,

    #[error("Checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("Backup key mismatch: expected {expected}, wallet has {actual}")]
    BackupKeyMismatch { expected: String, actual: String },

    #[error("Transaction is not completely signed")]
    IncompleteSignature,

    #[error("Fee mismatch: expected {expected}, computed {actual}")]
    FeeMismatch { expected: Amount, actual: Amount },

    #[error("Change mismatch: expected {expected}, computed {actual}")]
    ChangeMismatch { expected: Amount, actual: Amount },

    #[error("Coordinator shuffle added, dropped or altered outputs")]
    ShuffleChangedOutputs,

    #[error("No public key for key index {0}")]
    UnknownKeyIndex(u32),

    #[error("Output {0} does not exist")]
    MissingOutput(OutPoint),

    #[error("Invalid options: {0}")]
    Config(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Tx(#[from] TxError),

    #[error(transparent)]
    Fee(#[from] FeeError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

impl WalletError {
    /// Only collaborator I/O failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            WalletError::Coordinator(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
