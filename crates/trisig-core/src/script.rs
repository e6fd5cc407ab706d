//! 2-of-3 multisig script derivation
//!
//! Keys are sorted by their serialized bytes before building the
//! `CHECKMULTISIG`, so the same three keys always give the same script hash.
//! Chains 0 and 1 wrap the multisig directly in P2SH; chain 2 nests it as
//! P2SH-P2WSH. [`WalletScript::new`] re-checks every hash relationship and
//! refuses to build a bundle that does not hold together.

use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_RETURN};
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Script, ScriptBuf};
use log::debug;
use thiserror::Error;

use crate::address::{AddressCodec, AddressError};
use crate::keys::KeyError;
use crate::network::NetworkParams;
use crate::paths::{WalletPath, BCC_DEFAULT_CHAIN, BTC_DEFAULT_CHAIN, BTC_SEGWIT_CHAIN};

/// Signatures required to spend a wallet output
pub const REQUIRED_SIGNATURES: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Unsupported chain index {0}")]
    UnsupportedChain(u32),

    #[error("Unsupported script type: {0}")]
    UnsupportedScriptType(String),

    #[error("Address mismatch: expected {expected}, derived {actual}")]
    AddressMismatch { expected: String, actual: String },

    #[error("{what} mismatch: expected {expected}, got {actual}")]
    ScriptMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Multisig keys must be distinct")]
    DuplicateKey,

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Recognised output/redeem script shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptShape {
    P2sh,
    P2wsh,
    Multisig { required: usize, total: usize },
    P2pkh,
    P2pk { compressed: bool },
    OpReturn,
    NonStandard,
}

pub fn classify(script: &Script) -> ScriptShape {
    if script.is_p2sh() {
        ScriptShape::P2sh
    } else if script.is_p2wsh() {
        ScriptShape::P2wsh
    } else if script.is_p2pkh() {
        ScriptShape::P2pkh
    } else if script.is_p2pk() {
        ScriptShape::P2pk {
            compressed: script.len() == 35,
        }
    } else if script.as_bytes().first() == Some(&OP_RETURN.to_u8()) {
        ScriptShape::OpReturn
    } else if let Some((required, keys)) = parse_multisig(script) {
        ScriptShape::Multisig {
            required,
            total: keys.len(),
        }
    } else {
        ScriptShape::NonStandard
    }
}

fn small_int(byte: u8) -> Option<usize> {
    match byte {
        0x51..=0x60 => Some((byte - 0x50) as usize),
        _ => None,
    }
}

/// Decode `OP_m <keys…> OP_n OP_CHECKMULTISIG` into `(m, keys)`.
pub fn parse_multisig(script: &Script) -> Option<(usize, Vec<Vec<u8>>)> {
    let mut instructions = script.instructions();
    let required = match instructions.next()? {
        Ok(Instruction::Op(op)) => small_int(op.to_u8())?,
        _ => return None,
    };

    let mut keys = Vec::new();
    let total = loop {
        match instructions.next()? {
            Ok(Instruction::PushBytes(bytes)) if matches!(bytes.len(), 33 | 65) => {
                keys.push(bytes.as_bytes().to_vec());
            }
            Ok(Instruction::Op(op)) => break small_int(op.to_u8())?,
            _ => return None,
        }
    };

    match instructions.next()? {
        Ok(Instruction::Op(op)) if op == OP_CHECKMULTISIG => {}
        _ => return None,
    }
    if instructions.next().is_some() || total != keys.len() || required > total {
        return None;
    }
    Some((required, keys))
}

/// Bare `m`-of-`keys.len()` `CHECKMULTISIG` over the sorted keys.
pub fn multisig_script(required: usize, keys: &[PublicKey]) -> ScriptBuf {
    let mut sorted = keys.to_vec();
    sorted.sort_by_key(|k| k.serialize());

    let mut builder = Builder::new().push_int(required as i64);
    for key in &sorted {
        builder = builder.push_key(&bitcoin::PublicKey::new(*key));
    }
    builder
        .push_int(sorted.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Verify the P2SH (and, if present, P2WSH) commitments of a script bundle.
pub fn check_script(
    script_pubkey: &Script,
    redeem_script: &Script,
    witness_script: Option<&Script>,
) -> Result<(), ScriptError> {
    if !script_pubkey.is_p2sh() {
        return Err(ScriptError::UnsupportedScriptType(format!(
            "scriptPubKey {} is not P2SH",
            hex::encode(script_pubkey.as_bytes())
        )));
    }
    let expected = ScriptBuf::new_p2sh(&redeem_script.script_hash());
    if expected.as_script() != script_pubkey {
        return Err(ScriptError::ScriptMismatch {
            what: "scriptPubKey",
            expected: hex::encode(expected.as_bytes()),
            actual: hex::encode(script_pubkey.as_bytes()),
        });
    }

    let multisig = match witness_script {
        Some(witness_script) => {
            if !redeem_script.is_p2wsh() {
                return Err(ScriptError::UnsupportedScriptType(format!(
                    "redeem script {} is not a P2WSH program",
                    hex::encode(redeem_script.as_bytes())
                )));
            }
            let expected = ScriptBuf::new_p2wsh(&witness_script.wscript_hash());
            if expected.as_script() != redeem_script {
                return Err(ScriptError::ScriptMismatch {
                    what: "witness program",
                    expected: hex::encode(expected.as_bytes()),
                    actual: hex::encode(redeem_script.as_bytes()),
                });
            }
            witness_script
        }
        None => redeem_script,
    };

    if parse_multisig(multisig).is_none() {
        return Err(ScriptError::UnsupportedScriptType(format!(
            "{} is not a multisig script",
            hex::encode(multisig.as_bytes())
        )));
    }
    Ok(())
}

/// Everything needed to receive to, and later spend from, one wallet path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletScript {
    path: WalletPath,
    script_pubkey: ScriptBuf,
    redeem_script: ScriptBuf,
    witness_script: Option<ScriptBuf>,
    address: String,
}

impl WalletScript {
    /// Validates the bundle and, when `expected_address` is given, that it
    /// pays to the same destination as the derived address.
    pub fn new(
        path: WalletPath,
        script_pubkey: ScriptBuf,
        redeem_script: ScriptBuf,
        witness_script: Option<ScriptBuf>,
        codec: &dyn AddressCodec,
        expected_address: Option<&str>,
    ) -> Result<Self, ScriptError> {
        check_script(&script_pubkey, &redeem_script, witness_script.as_deref())?;
        let address = codec.address_from_script(&script_pubkey)?;

        if let Some(expected) = expected_address {
            let matches = expected == address
                || codec.same_destination(expected, &address).unwrap_or(false);
            if !matches {
                return Err(ScriptError::AddressMismatch {
                    expected: expected.to_string(),
                    actual: address,
                });
            }
        }

        Ok(Self {
            path,
            script_pubkey,
            redeem_script,
            witness_script,
            address,
        })
    }

    pub fn path(&self) -> &WalletPath {
        &self.path
    }

    pub fn script_pubkey(&self) -> &Script {
        &self.script_pubkey
    }

    pub fn redeem_script(&self) -> &Script {
        &self.redeem_script
    }

    pub fn witness_script(&self) -> Option<&Script> {
        self.witness_script.as_deref()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_segwit(&self) -> bool {
        self.witness_script.is_some()
    }

    /// The `CHECKMULTISIG` script itself (witness script if nested).
    pub fn multisig_script(&self) -> &Script {
        self.witness_script
            .as_deref()
            .unwrap_or(&self.redeem_script)
    }
}

/// Build the [`WalletScript`] for `path` from its three (unsorted) keys.
pub fn derive_wallet_script(
    path: &WalletPath,
    keys: &[PublicKey; 3],
    params: &NetworkParams,
    codec: &dyn AddressCodec,
    expected_address: Option<&str>,
) -> Result<WalletScript, ScriptError> {
    let segwit = match path.chain() {
        BTC_DEFAULT_CHAIN | BCC_DEFAULT_CHAIN => false,
        BTC_SEGWIT_CHAIN if params.supports_segwit() => true,
        other => return Err(ScriptError::UnsupportedChain(other)),
    };
    if keys[0] == keys[1] || keys[0] == keys[2] || keys[1] == keys[2] {
        return Err(ScriptError::DuplicateKey);
    }

    let multisig = multisig_script(REQUIRED_SIGNATURES, keys);
    let (redeem_script, witness_script) = if segwit {
        (ScriptBuf::new_p2wsh(&multisig.wscript_hash()), Some(multisig))
    } else {
        (multisig, None)
    };
    let script_pubkey = ScriptBuf::new_p2sh(&redeem_script.script_hash());

    let script = WalletScript::new(
        *path,
        script_pubkey,
        redeem_script,
        witness_script,
        codec,
        expected_address,
    )?;
    debug!("Derived {} for {}", script.address(), path);
    Ok(script)
}
