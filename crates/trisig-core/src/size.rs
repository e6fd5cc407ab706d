//! Transaction size estimation
//!
//! Estimates are worst-case: every signature is counted at 72 bytes (71-byte
//! high-S DER plus the sighash byte), so a fee computed from them is never
//! short.

use bitcoin::Script;
use thiserror::Error;

use crate::script::{classify, ScriptShape};

/// DER signature plus sighash byte, upper bound
pub const SIGNATURE_SIZE: usize = 72;
/// Compressed public key
pub const PUBKEY_SIZE: usize = 33;
/// Uncompressed public key
pub const UNCOMPRESSED_PUBKEY_SIZE: usize = 65;

/// Outpoint (32 + 4) and sequence (4)
const INPUT_OVERHEAD: usize = 40;
/// Output value
const OUTPUT_OVERHEAD: usize = 8;
/// Version and locktime
const TX_OVERHEAD: usize = 8;
/// Segwit marker and flag
const WITNESS_HEADER: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("Unsupported script type: {0}")]
    UnsupportedScriptType(String),

    #[error("Missing {0} for size estimate")]
    MissingScript(&'static str),
}

pub fn varint_size(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Bytes taken by pushing `len` bytes of data, opcode included.
pub fn push_size(len: usize) -> usize {
    let opcode = match len {
        0..=75 => 1,
        76..=0xff => 2,
        0x100..=0xffff => 3,
        _ => 5,
    };
    opcode + len
}

/// Size of a `m`-of-`n` multisig script over compressed keys.
pub fn multisig_script_size(total: usize) -> usize {
    3 + total * push_size(PUBKEY_SIZE)
}

/// Serialized scriptSig length and witness length (including its item count)
/// of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub script_sig: usize,
    pub witness: Option<usize>,
}

impl InputSize {
    /// Spending a P2SH-wrapped bare multisig.
    pub fn p2sh_multisig(required: usize, total: usize) -> Self {
        Self {
            script_sig: multisig_script_sig(required, multisig_script_size(total)),
            witness: None,
        }
    }

    /// Spending a P2SH-P2WSH-wrapped multisig.
    pub fn p2sh_p2wsh_multisig(required: usize, total: usize) -> Self {
        Self {
            script_sig: push_size(34),
            witness: Some(multisig_witness(required, multisig_script_size(total))),
        }
    }

    pub fn p2pkh(compressed: bool) -> Self {
        let key = if compressed {
            PUBKEY_SIZE
        } else {
            UNCOMPRESSED_PUBKEY_SIZE
        };
        Self {
            script_sig: push_size(SIGNATURE_SIZE) + push_size(key),
            witness: None,
        }
    }

    /// Non-witness bytes of the input.
    pub fn base_size(&self) -> usize {
        INPUT_OVERHEAD + varint_size(self.script_sig) + self.script_sig
    }

    pub fn has_witness(&self) -> bool {
        self.witness.is_some()
    }
}

/// `OP_0 <sig>… <redeemScript>`
fn multisig_script_sig(required: usize, redeem_len: usize) -> usize {
    1 + required * push_size(SIGNATURE_SIZE) + push_size(redeem_len)
}

/// `[<empty>, <sig>…, <witnessScript>]` with its item count.
fn multisig_witness(required: usize, script_len: usize) -> usize {
    let items = required + 2;
    varint_size(items)
        + 1
        + required * (varint_size(SIGNATURE_SIZE) + SIGNATURE_SIZE)
        + varint_size(script_len)
        + script_len
}

/// Classify the scripts of an input and size its worst-case spend.
pub fn estimate_input(
    script_pubkey: &Script,
    redeem_script: Option<&Script>,
    witness_script: Option<&Script>,
) -> Result<InputSize, SizeError> {
    let unsupported =
        |script: &Script| SizeError::UnsupportedScriptType(hex::encode(script.as_bytes()));

    match classify(script_pubkey) {
        ScriptShape::P2sh => {
            let redeem = redeem_script.ok_or(SizeError::MissingScript("redeem script"))?;
            match classify(redeem) {
                ScriptShape::Multisig { required, .. } => Ok(InputSize {
                    script_sig: multisig_script_sig(required, redeem.len()),
                    witness: None,
                }),
                ScriptShape::P2wsh => {
                    let witness =
                        witness_script.ok_or(SizeError::MissingScript("witness script"))?;
                    match classify(witness) {
                        ScriptShape::Multisig { required, .. } => Ok(InputSize {
                            script_sig: push_size(redeem.len()),
                            witness: Some(multisig_witness(required, witness.len())),
                        }),
                        _ => Err(unsupported(witness)),
                    }
                }
                _ => Err(unsupported(redeem)),
            }
        }
        // The scriptPubKey only commits to a key hash, so size for the
        // larger uncompressed key.
        ScriptShape::P2pkh => Ok(InputSize::p2pkh(false)),
        ScriptShape::P2pk { .. } => Ok(InputSize {
            script_sig: push_size(SIGNATURE_SIZE),
            witness: None,
        }),
        ScriptShape::Multisig { required, .. } => Ok(InputSize {
            script_sig: 1 + required * push_size(SIGNATURE_SIZE),
            witness: None,
        }),
        _ => Err(unsupported(script_pubkey)),
    }
}

/// Serialized size of an output with a `script_len`-byte scriptPubKey.
pub fn output_size(script_len: usize) -> usize {
    OUTPUT_OVERHEAD + varint_size(script_len) + script_len
}

/// P2SH scriptPubKey output
pub const P2SH_OUTPUT_SIZE: usize = 32;
/// P2PKH scriptPubKey output
pub const P2PKH_OUTPUT_SIZE: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSize {
    /// Bytes without witness data
    pub base: usize,
    /// Witness bytes including marker and flag
    pub witness: usize,
}

impl TxSize {
    pub fn weight(&self) -> usize {
        3 * self.base + (self.base + self.witness)
    }

    pub fn vsize(&self) -> usize {
        self.weight().div_ceil(4)
    }
}

/// Size of a transaction from its input sizes and output scriptPubKey
/// lengths.
pub fn estimate_tx(inputs: &[InputSize], output_script_lens: &[usize]) -> TxSize {
    let base = TX_OVERHEAD
        + varint_size(inputs.len())
        + inputs.iter().map(InputSize::base_size).sum::<usize>()
        + varint_size(output_script_lens.len())
        + output_script_lens
            .iter()
            .map(|len| output_size(*len))
            .sum::<usize>();

    let witness = if inputs.iter().any(InputSize::has_witness) {
        WITNESS_HEADER
            + inputs
                .iter()
                .map(|i| i.witness.unwrap_or(1))
                .sum::<usize>()
    } else {
        0
    };

    TxSize { base, witness }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::ScriptBuf;

    #[test]
    fn test_push_sizes() {
        assert_eq!(push_size(72), 73);
        assert_eq!(push_size(75), 76);
        assert_eq!(push_size(76), 78);
        assert_eq!(push_size(105), 107);
        assert_eq!(push_size(300), 303);
    }

    #[test]
    fn test_p2sh_multisig_input() {
        let input = InputSize::p2sh_multisig(2, 3);
        assert_eq!(input.script_sig, 254);
        assert_eq!(input.base_size(), 297);
        assert!(!input.has_witness());
    }

    #[test]
    fn test_nested_segwit_input() {
        let input = InputSize::p2sh_p2wsh_multisig(2, 3);
        assert_eq!(input.script_sig, 35);
        assert_eq!(input.witness, Some(254));
        assert_eq!(input.base_size(), 76);
    }

    #[test]
    fn test_two_input_base_fee_tx_is_636_bytes() {
        let input = InputSize::p2sh_multisig(2, 3);
        let size = estimate_tx(&[input, input], &[23]);
        assert_eq!(size.base, 636);
        assert_eq!(size.witness, 0);
        assert_eq!(size.vsize(), 636);
    }

    #[test]
    fn test_change_output_crosses_kilobyte() {
        let input = InputSize::p2sh_multisig(2, 3);
        let mut outputs = vec![23; 21];
        assert_eq!(estimate_tx(&[input], &outputs).vsize(), 979);
        outputs.push(23);
        assert_eq!(estimate_tx(&[input], &outputs).vsize(), 1011);
    }

    #[test]
    fn test_witness_discount() {
        let legacy = InputSize::p2sh_multisig(2, 3);
        let segwit = InputSize::p2sh_p2wsh_multisig(2, 3);
        let size = estimate_tx(&[legacy, segwit], &[23]);
        // non-witness input contributes an empty stack
        assert_eq!(size.witness, 2 + 1 + 254);
        assert_eq!(size.weight(), 4 * size.base + size.witness);
        assert!(size.vsize() < size.base + size.witness);
    }

    #[test]
    fn test_estimate_input_requires_scripts() {
        let p2sh = ScriptBuf::new_p2sh(&ScriptBuf::new().script_hash());
        assert_eq!(
            estimate_input(&p2sh, None, None),
            Err(SizeError::MissingScript("redeem script"))
        );
        assert!(matches!(
            estimate_input(&ScriptBuf::from(vec![0x51]), None, None),
            Err(SizeError::UnsupportedScriptType(_))
        ));
    }

    #[test]
    fn test_p2pkh_input_sized_for_uncompressed_key() {
        assert_eq!(InputSize::p2pkh(true).script_sig, 107);
        assert_eq!(InputSize::p2pkh(false).script_sig, 139);

        let p2pkh = ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array([7; 20]));
        assert_eq!(estimate_input(&p2pkh, None, None), Ok(InputSize::p2pkh(false)));
    }

    #[test]
    fn test_output_sizes() {
        assert_eq!(output_size(23), P2SH_OUTPUT_SIZE);
        assert_eq!(output_size(25), P2PKH_OUTPUT_SIZE);
    }
}
