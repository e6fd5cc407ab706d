//! Transaction model
//!
//! [`TransactionBuilder`] collects what the caller wants to spend and where
//! to pay; it holds no keys and does no I/O. Missing UTXO details (value,
//! script, path) are filled in when the wallet builds the transaction.

use bitcoin::blockdata::opcodes::all::OP_RETURN;
use bitcoin::blockdata::script::{Builder, PushBytesBuf};
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trisig_core::WalletPath;

pub use trisig_core::fee::DUST;

/// Largest standard OP_RETURN payload
pub const MAX_OP_RETURN_DATA: usize = 79;

/// Consensus limit on a single script push
const MAX_PUSH_SIZE: usize = 520;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("Output of {value} is dust (must be above {dust})")]
    DustOutput { value: Amount, dust: Amount },

    #[error("OP_RETURN data is {len} bytes, limit is {max}")]
    OpReturnTooLarge { len: usize, max: usize },

    #[error("Force fee needs an amount; use set_fee")]
    ForceFeeNeedsAmount,

    #[error("Output {0} is already being spent")]
    DuplicateInput(OutPoint),

    #[error("Cannot sign {outpoint}: missing {what}")]
    MissingSignInfo {
        outpoint: OutPoint,
        what: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStrategy {
    BaseFee,
    HighPriority,
    #[default]
    Optimal,
    LowPriority,
    ForceFee,
}

impl FeeStrategy {
    /// Name used on the wire to the coordinator
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStrategy::BaseFee => "base_fee",
            FeeStrategy::HighPriority => "high_priority",
            FeeStrategy::Optimal => "optimal",
            FeeStrategy::LowPriority => "low_priority",
            FeeStrategy::ForceFee => "force_fee",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
    #[default]
    Sign,
    /// Counted in totals, signed by someone else
    DontSign,
}

/// An output to spend. Only the outpoint is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: Option<Amount>,
    pub address: Option<String>,
    pub script_pubkey: Option<ScriptBuf>,
    pub path: Option<WalletPath>,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub sign_mode: SignMode,
}

impl Utxo {
    pub fn new(outpoint: OutPoint) -> Self {
        Self {
            outpoint,
            value: None,
            address: None,
            script_pubkey: None,
            path: None,
            redeem_script: None,
            witness_script: None,
            sign_mode: SignMode::Sign,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_script_pubkey(mut self, script_pubkey: ScriptBuf) -> Self {
        self.script_pubkey = Some(script_pubkey);
        self
    }

    pub fn with_path(mut self, path: WalletPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_scripts(mut self, redeem_script: ScriptBuf, witness_script: Option<ScriptBuf>) -> Self {
        self.redeem_script = Some(redeem_script);
        self.witness_script = witness_script;
        self
    }

    pub fn dont_sign(mut self) -> Self {
        self.sign_mode = SignMode::DontSign;
        self
    }
}

/// What the signer needs for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInfo {
    pub mode: SignMode,
    pub path: Option<WalletPath>,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub output: TxOut,
}

impl SignInfo {
    pub fn new(
        outpoint: OutPoint,
        mode: SignMode,
        path: Option<WalletPath>,
        redeem_script: Option<ScriptBuf>,
        witness_script: Option<ScriptBuf>,
        output: TxOut,
    ) -> Result<Self, TxError> {
        if mode == SignMode::Sign {
            if path.is_none() {
                return Err(TxError::MissingSignInfo {
                    outpoint,
                    what: "path",
                });
            }
            if redeem_script.is_none() {
                return Err(TxError::MissingSignInfo {
                    outpoint,
                    what: "redeem script",
                });
            }
        }
        Ok(Self {
            mode,
            path,
            redeem_script,
            witness_script,
            output,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Address(String),
    Script(ScriptBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub destination: Destination,
    pub value: Amount,
}

/// Fixed fee or a strategy, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeIntent {
    Fixed(Amount),
    Strategy(FeeStrategy),
}

impl Default for FeeIntent {
    fn default() -> Self {
        FeeIntent::Strategy(FeeStrategy::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    utxos: Vec<Utxo>,
    outputs: Vec<Recipient>,
    change_address: Option<String>,
    fee: FeeIntent,
    randomize_change_output: bool,
    validate_change: Option<Amount>,
    validate_fee: Option<Amount>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spend_output(&mut self, utxo: Utxo) -> Result<&mut Self, TxError> {
        if self.utxos.iter().any(|u| u.outpoint == utxo.outpoint) {
            return Err(TxError::DuplicateInput(utxo.outpoint));
        }
        self.utxos.push(utxo);
        Ok(self)
    }

    pub fn add_recipient(&mut self, address: &str, value: Amount) -> Result<&mut Self, TxError> {
        if value <= DUST {
            return Err(TxError::DustOutput { value, dust: DUST });
        }
        self.outputs.push(Recipient {
            destination: Destination::Address(address.to_string()),
            value,
        });
        Ok(self)
    }

    /// Raw output, no dust check.
    pub fn add_output(&mut self, script_pubkey: ScriptBuf, value: Amount) -> &mut Self {
        self.outputs.push(Recipient {
            destination: Destination::Script(script_pubkey),
            value,
        });
        self
    }

    /// Zero-value `OP_RETURN <data>` output.
    pub fn add_op_return(&mut self, data: &[u8], allow_non_standard: bool) -> Result<&mut Self, TxError> {
        if data.len() > MAX_OP_RETURN_DATA && !allow_non_standard {
            return Err(TxError::OpReturnTooLarge {
                len: data.len(),
                max: MAX_OP_RETURN_DATA,
            });
        }
        let push = PushBytesBuf::try_from(data.to_vec()).map_err(|_| TxError::OpReturnTooLarge {
            len: data.len(),
            max: MAX_PUSH_SIZE,
        })?;
        let script = Builder::new()
            .push_opcode(OP_RETURN)
            .push_slice(push)
            .into_script();
        Ok(self.add_output(script, Amount::ZERO))
    }

    pub fn set_change_address(&mut self, address: &str) -> &mut Self {
        self.change_address = Some(address.to_string());
        self
    }

    pub fn randomize_change_output(&mut self, randomize: bool) -> &mut Self {
        self.randomize_change_output = randomize;
        self
    }

    pub fn set_fee(&mut self, fee: Amount) -> &mut Self {
        self.fee = FeeIntent::Fixed(fee);
        self
    }

    pub fn set_fee_strategy(&mut self, strategy: FeeStrategy) -> Result<&mut Self, TxError> {
        if strategy == FeeStrategy::ForceFee {
            return Err(TxError::ForceFeeNeedsAmount);
        }
        self.fee = FeeIntent::Strategy(strategy);
        Ok(self)
    }

    /// Post-build check: the change must come out at exactly this value.
    pub fn set_validate_change(&mut self, change: Amount) -> &mut Self {
        self.validate_change = Some(change);
        self
    }

    /// Post-build check: the fee must come out at exactly this value.
    pub fn set_validate_fee(&mut self, fee: Amount) -> &mut Self {
        self.validate_fee = Some(fee);
        self
    }

    pub fn utxos(&self) -> &[Utxo] {
        &self.utxos
    }

    pub fn outputs(&self) -> &[Recipient] {
        &self.outputs
    }

    pub fn change_address(&self) -> Option<&str> {
        self.change_address.as_deref()
    }

    pub fn randomizes_change_output(&self) -> bool {
        self.randomize_change_output
    }

    pub fn fee_intent(&self) -> FeeIntent {
        self.fee
    }

    pub fn fee(&self) -> Option<Amount> {
        match self.fee {
            FeeIntent::Fixed(fee) => Some(fee),
            FeeIntent::Strategy(_) => None,
        }
    }

    /// `ForceFee` when a fixed fee is set, otherwise the chosen strategy.
    pub fn fee_strategy(&self) -> FeeStrategy {
        match self.fee {
            FeeIntent::Fixed(_) => FeeStrategy::ForceFee,
            FeeIntent::Strategy(strategy) => strategy,
        }
    }

    pub fn validate_change(&self) -> Option<Amount> {
        self.validate_change
    }

    pub fn validate_fee(&self) -> Option<Amount> {
        self.validate_fee
    }

    pub fn output_total(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }
}
