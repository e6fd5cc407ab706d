//! UTXO lookup boundary

use bitcoin::{Amount, OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FinderError {
    #[error("UTXO lookup timed out: {0}")]
    Timeout(String),

    #[error("UTXO lookup transport error: {0}")]
    Transport(String),

    #[error("Invalid UTXO lookup response: {0}")]
    InvalidResponse(String),

    #[error("Address not accepted by UTXO lookup: {0}")]
    InvalidAddress(String),
}

impl FinderError {
    /// Timeouts and transport failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FinderError::Timeout(_) | FinderError::Transport(_))
    }
}

/// One unspent output as reported by the lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    /// The queried address this output pays to
    pub address: String,
}

/// Looks up unspent outputs for many addresses in one call.
pub trait UnspentOutputFinder {
    /// Every unspent output paying to any of `addresses`, in no particular
    /// order. Addresses without funds simply contribute nothing.
    fn get_unspent_outputs(&self, addresses: &[String]) -> Result<Vec<UnspentOutput>, FinderError>;
}

impl<F: UnspentOutputFinder + ?Sized> UnspentOutputFinder for &F {
    fn get_unspent_outputs(&self, addresses: &[String]) -> Result<Vec<UnspentOutput>, FinderError> {
        (**self).get_unspent_outputs(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(FinderError::Timeout("10s".into()).is_retryable());
        assert!(FinderError::Transport("reset".into()).is_retryable());
        assert!(!FinderError::InvalidResponse("bad hex".into()).is_retryable());
    }
}
