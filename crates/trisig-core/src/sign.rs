//! Input signing for wallet multisig inputs
//!
//! The sighash algorithm is picked from the input's scripts and the chain:
//! - fork-id chains: BIP-143 style digest with `SIGHASH_ALL | SIGHASH_FORKID`
//! - witness script present: BIP-143 P2WSH digest
//! - otherwise: legacy digest over the redeem script
//!
//! Signatures are DER plus one sighash byte and are placed in the order their
//! keys appear in the multisig script.

use bitcoin::blockdata::opcodes::OP_0;
use bitcoin::blockdata::script::{Builder, PushBytesBuf};
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signing};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Script, Transaction, Witness};
use thiserror::Error;

use crate::network::NetworkParams;
use crate::script::parse_multisig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("Input {0} out of range")]
    InputOutOfRange(usize),

    #[error("Input {0} needs its value to be signed")]
    MissingValue(usize),

    #[error("Script is not a multisig script")]
    NotMultisig,

    #[error("Key {0} is not part of the multisig script")]
    KeyNotInScript(String),

    #[error("Need {required} signatures, have {have}")]
    NotEnoughSignatures { required: usize, have: usize },

    #[error("Push too large: {0} bytes")]
    PushTooLarge(usize),
}

/// A signature together with the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSignature {
    pub public_key: PublicKey,
    /// DER signature followed by the sighash byte
    pub signature: Vec<u8>,
}

fn sha256d_of(bytes: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(bytes).to_byte_array()
}

/// BIP-143 style digest used by fork-id chains for every input type.
pub fn forkid_signature_hash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    value: Amount,
    sighash_type: u32,
) -> Result<[u8; 32], SignError> {
    let input = tx.input.get(index).ok_or(SignError::InputOutOfRange(index))?;

    let mut prevouts = Vec::with_capacity(36 * tx.input.len());
    let mut sequences = Vec::with_capacity(4 * tx.input.len());
    for txin in &tx.input {
        prevouts.extend_from_slice(&serialize(&txin.previous_output));
        sequences.extend_from_slice(&txin.sequence.0.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for txout in &tx.output {
        outputs.extend_from_slice(&serialize(txout));
    }

    let mut preimage = Vec::with_capacity(160 + script_code.len());
    preimage.extend_from_slice(&tx.version.0.to_le_bytes());
    preimage.extend_from_slice(&sha256d_of(&prevouts));
    preimage.extend_from_slice(&sha256d_of(&sequences));
    preimage.extend_from_slice(&serialize(&input.previous_output));
    preimage.extend_from_slice(&serialize(&script_code.to_owned()));
    preimage.extend_from_slice(&value.to_sat().to_le_bytes());
    preimage.extend_from_slice(&input.sequence.0.to_le_bytes());
    preimage.extend_from_slice(&sha256d_of(&outputs));
    preimage.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend_from_slice(&sighash_type.to_le_bytes());

    Ok(sha256d_of(&preimage))
}

/// Digest to sign for input `index` of `tx`.
pub fn signature_hash(
    tx: &Transaction,
    index: usize,
    redeem_script: &Script,
    witness_script: Option<&Script>,
    value: Option<Amount>,
    params: &NetworkParams,
) -> Result<[u8; 32], SignError> {
    if index >= tx.input.len() {
        return Err(SignError::InputOutOfRange(index));
    }

    if params.is_fork_id_chain() {
        let value = value.ok_or(SignError::MissingValue(index))?;
        return forkid_signature_hash(tx, index, redeem_script, value, params.sighash_all());
    }

    let mut cache = SighashCache::new(tx);
    match witness_script {
        Some(witness_script) => {
            let value = value.ok_or(SignError::MissingValue(index))?;
            cache
                .p2wsh_signature_hash(index, witness_script, value, EcdsaSighashType::All)
                .map(|h| h.to_byte_array())
                .map_err(|_| SignError::InputOutOfRange(index))
        }
        None => cache
            .legacy_signature_hash(index, redeem_script, EcdsaSighashType::All.to_u32())
            .map(|h| h.to_byte_array())
            .map_err(|_| SignError::InputOutOfRange(index)),
    }
}

/// Sign input `index` with `key`.
#[allow(clippy::too_many_arguments)]
pub fn sign_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    index: usize,
    key: &SecretKey,
    redeem_script: &Script,
    witness_script: Option<&Script>,
    value: Option<Amount>,
    params: &NetworkParams,
) -> Result<InputSignature, SignError> {
    let digest = signature_hash(tx, index, redeem_script, witness_script, value, params)?;
    let signature = secp.sign_ecdsa(&Message::from_digest(digest), key);

    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(params.sighash_all() as u8);
    Ok(InputSignature {
        public_key: key.public_key(secp),
        signature: bytes,
    })
}

/// Signatures laid out one slot per script key, `None` where missing.
pub fn order_signatures(
    multisig: &Script,
    signatures: &[InputSignature],
) -> Result<(usize, Vec<Option<Vec<u8>>>), SignError> {
    let (required, keys) = parse_multisig(multisig).ok_or(SignError::NotMultisig)?;
    let mut slots = vec![None; keys.len()];
    for sig in signatures {
        let serialized = sig.public_key.serialize();
        let position = keys
            .iter()
            .position(|k| k.as_slice() == serialized.as_slice())
            .ok_or_else(|| SignError::KeyNotInScript(sig.public_key.to_string()))?;
        slots[position] = Some(sig.signature.clone());
    }
    Ok((required, slots))
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, SignError> {
    let len = bytes.len();
    PushBytesBuf::try_from(bytes).map_err(|_| SignError::PushTooLarge(len))
}

/// Write `signatures` into input `index`.
///
/// With `partial` set, every key gets a slot (empty where unsigned) so a
/// cosigner can fill in the rest. Otherwise exactly the required number of
/// signatures is written and anything short of that is an error.
pub fn apply_multisig_signatures(
    tx: &mut Transaction,
    index: usize,
    redeem_script: &Script,
    witness_script: Option<&Script>,
    signatures: &[InputSignature],
    partial: bool,
) -> Result<(), SignError> {
    if index >= tx.input.len() {
        return Err(SignError::InputOutOfRange(index));
    }
    let multisig = witness_script.unwrap_or(redeem_script);
    let (required, slots) = order_signatures(multisig, signatures)?;

    let have = slots.iter().flatten().count();
    let stack: Vec<Vec<u8>> = if partial {
        slots.into_iter().map(Option::unwrap_or_default).collect()
    } else {
        if have < required {
            return Err(SignError::NotEnoughSignatures { required, have });
        }
        slots.into_iter().flatten().take(required).collect()
    };

    let input = &mut tx.input[index];
    match witness_script {
        Some(witness_script) => {
            let mut items = Vec::with_capacity(stack.len() + 2);
            items.push(Vec::new());
            items.extend(stack);
            items.push(witness_script.to_bytes());
            input.witness = Witness::from_slice(&items);
            input.script_sig = Builder::new()
                .push_slice(push_bytes(redeem_script.to_bytes())?)
                .into_script();
        }
        None => {
            let mut builder = Builder::new().push_opcode(OP_0);
            for sig in stack {
                builder = if sig.is_empty() {
                    builder.push_opcode(OP_0)
                } else {
                    builder.push_slice(push_bytes(sig)?)
                };
            }
            input.script_sig = builder
                .push_slice(push_bytes(redeem_script.to_bytes())?)
                .into_script();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::multisig_script;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Txid};
    use bitcoin::Network;

    fn keys() -> Vec<(SecretKey, PublicKey)> {
        let secp = Secp256k1::new();
        (1u8..=3)
            .map(|b| {
                let sk = SecretKey::from_slice(&[b; 32]).unwrap();
                (sk, sk.public_key(&secp))
            })
            .collect()
    }

    fn spend(prev: &TxOut) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: prev.value - Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::new_p2sh(&ScriptBuf::new().script_hash()),
            }],
        }
    }

    fn consensus_verify(tx: &Transaction, prev: &TxOut) {
        let tx_bytes = serialize(tx);
        let spk = prev.script_pubkey.as_bytes();
        let utxo = bitcoinconsensus::Utxo {
            script_pubkey: spk.as_ptr(),
            script_pubkey_len: spk.len() as u32,
            value: prev.value.to_sat() as i64,
        };
        let result = bitcoinconsensus::verify(spk, prev.value.to_sat(), &tx_bytes, Some(&[utxo]), 0);
        assert!(result.is_ok(), "consensus verification failed: {:?}", result.err());
    }

    fn sign_with(
        tx: &Transaction,
        signers: &[usize],
        redeem: &Script,
        witness: Option<&Script>,
        value: Amount,
    ) -> Vec<InputSignature> {
        let secp = Secp256k1::new();
        let params = NetworkParams::bitcoin(Network::Regtest);
        let keys = keys();
        signers
            .iter()
            .map(|i| {
                sign_input(&secp, tx, 0, &keys[*i].0, redeem, witness, Some(value), &params).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_p2sh_multisig_spend_verifies() {
        let pubkeys: Vec<PublicKey> = keys().iter().map(|k| k.1).collect();
        let redeem = multisig_script(2, &pubkeys);
        let prev = TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
        };
        let mut tx = spend(&prev);

        // Sign in reverse key order; application must reorder.
        let sigs = sign_with(&tx, &[2, 0], &redeem, None, prev.value);
        apply_multisig_signatures(&mut tx, 0, &redeem, None, &sigs, false).unwrap();
        consensus_verify(&tx, &prev);
    }

    #[test]
    fn test_nested_segwit_spend_verifies() {
        let pubkeys: Vec<PublicKey> = keys().iter().map(|k| k.1).collect();
        let witness_script = multisig_script(2, &pubkeys);
        let redeem = ScriptBuf::new_p2wsh(&witness_script.wscript_hash());
        let prev = TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
        };
        let mut tx = spend(&prev);

        let sigs = sign_with(&tx, &[0, 1], &redeem, Some(witness_script.as_script()), prev.value);
        apply_multisig_signatures(&mut tx, 0, &redeem, Some(witness_script.as_script()), &sigs, false)
            .unwrap();
        assert_eq!(tx.input[0].witness.len(), 4);
        consensus_verify(&tx, &prev);
    }

    #[test]
    fn test_partial_signature_keeps_slots() {
        let pubkeys: Vec<PublicKey> = keys().iter().map(|k| k.1).collect();
        let redeem = multisig_script(2, &pubkeys);
        let prev = TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
        };
        let mut tx = spend(&prev);

        let sigs = sign_with(&tx, &[1], &redeem, None, prev.value);
        assert_eq!(
            apply_multisig_signatures(&mut tx, 0, &redeem, None, &sigs, false).unwrap_err(),
            SignError::NotEnoughSignatures { required: 2, have: 1 }
        );

        apply_multisig_signatures(&mut tx, 0, &redeem, None, &sigs, true).unwrap();
        // OP_0, three slots, redeem script
        assert_eq!(tx.input[0].script_sig.instructions().count(), 5);
    }

    #[test]
    fn test_foreign_key_rejected() {
        let pubkeys: Vec<PublicKey> = keys().iter().map(|k| k.1).collect();
        let redeem = multisig_script(2, &pubkeys[..2]);
        let prev = TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
        };
        let tx = spend(&prev);
        let sigs = sign_with(&tx, &[2], &redeem, None, prev.value);
        assert!(matches!(
            order_signatures(&redeem, &sigs),
            Err(SignError::KeyNotInScript(_))
        ));
    }

    #[test]
    fn test_forkid_signature() {
        let secp = Secp256k1::new();
        let params = NetworkParams::bitcoin_cash(Network::Bitcoin);
        let pubkeys: Vec<PublicKey> = keys().iter().map(|k| k.1).collect();
        let redeem = multisig_script(2, &pubkeys);
        let prev = TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
        };
        let tx = spend(&prev);
        let (sk, pk) = keys()[0];

        assert_eq!(
            sign_input(&secp, &tx, 0, &sk, &redeem, None, None, &params).unwrap_err(),
            SignError::MissingValue(0)
        );

        let sig = sign_input(&secp, &tx, 0, &sk, &redeem, None, Some(prev.value), &params).unwrap();
        assert_eq!(*sig.signature.last().unwrap(), 0x41);

        let digest = forkid_signature_hash(&tx, 0, &redeem, prev.value, 0x41).unwrap();
        let der = &sig.signature[..sig.signature.len() - 1];
        let parsed = bitcoin::secp256k1::ecdsa::Signature::from_der(der).unwrap();
        secp.verify_ecdsa(&Message::from_digest(digest), &parsed, &pk)
            .unwrap();

        let legacy = signature_hash(
            &tx,
            0,
            &redeem,
            None,
            Some(prev.value),
            &NetworkParams::bitcoin(Network::Bitcoin),
        )
        .unwrap();
        assert_ne!(legacy, digest);
    }
}
