use bitcoin::Amount;
use thiserror::Error;
use trisig_core::script::ScriptError;
use trisig_core::seed::SeedError;
use trisig_core::sign::SignError;
use trisig_core::{AddressError, EnvelopeError, KeyError, PathError};

use crate::finder::FinderError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SweepError {
    #[error("No funds found")]
    NoFundsFound,

    #[error("Balance {balance} does not cover the sweep fee {fee}")]
    InsufficientFunds { balance: Amount, fee: Amount },

    #[error("Invalid sweeper configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Finder(#[from] FinderError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error(transparent)]
    Address(#[from] AddressError),
}

impl SweepError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SweepError::Finder(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SweepError>;
