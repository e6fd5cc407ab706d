//! trisig Electrum lookup
//!
//! [`ElectrumUtxoFinder`] answers the sweeper's UTXO lookups with one batched
//! `blockchain.scripthash.listunspent` request per call, and can broadcast
//! the resulting sweep.
//!
//! # Example
//!
//! ```ignore
//! use trisig_electrum::{default_server, ElectrumUtxoFinder};
//! use trisig_core::BitcoinAddressCodec;
//! use bitcoin::Network;
//!
//! let finder = ElectrumUtxoFinder::new(
//!     default_server(Network::Testnet),
//!     Box::new(BitcoinAddressCodec::new(Network::Testnet)),
//! )?;
//! let txid = finder.broadcast(&sweep_tx)?;
//! ```

use bitcoin::{Amount, Network, OutPoint, ScriptBuf, Transaction, Txid};
use electrum_client::{ElectrumApi, Error as ElectrumError};
use std::io::ErrorKind;
use trisig_core::AddressCodec;
use trisig_sweep::{FinderError, UnspentOutput, UnspentOutputFinder};

/// Map client errors onto the lookup error kinds the sweeper retries on.
fn finder_error(e: ElectrumError) -> FinderError {
    match e {
        ElectrumError::IOError(io)
            if matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
        {
            FinderError::Timeout(io.to_string())
        }
        ElectrumError::IOError(io) => FinderError::Transport(io.to_string()),
        ElectrumError::AllAttemptsErrored(errors) => FinderError::Transport(format!(
            "all {} attempts failed",
            errors.len()
        )),
        other => FinderError::InvalidResponse(other.to_string()),
    }
}

pub struct ElectrumUtxoFinder {
    client: electrum_client::Client,
    codec: Box<dyn AddressCodec>,
}

impl ElectrumUtxoFinder {
    /// Connect to `url` (`ssl://host:port` or `tcp://host:port`).
    pub fn new(url: &str, codec: Box<dyn AddressCodec>) -> Result<Self, FinderError> {
        if !url.starts_with("ssl://") && !url.contains("tls") {
            log::warn!("Connecting to Electrum without SSL - insecure for mainnet!");
        }
        let client = electrum_client::Client::new(url).map_err(finder_error)?;
        Ok(Self { client, codec })
    }

    pub fn get_height(&self) -> Result<u32, FinderError> {
        let header = self.client.block_headers_subscribe().map_err(finder_error)?;
        Ok(header.height as u32)
    }

    pub fn broadcast(&self, tx: &Transaction) -> Result<Txid, FinderError> {
        let txid = self.client.transaction_broadcast(tx).map_err(finder_error)?;
        log::info!("Broadcast {}", txid);
        Ok(txid)
    }
}

impl UnspentOutputFinder for ElectrumUtxoFinder {
    fn get_unspent_outputs(&self, addresses: &[String]) -> Result<Vec<UnspentOutput>, FinderError> {
        let scripts = addresses
            .iter()
            .map(|address| {
                self.codec
                    .script_pubkey(address)
                    .map_err(|e| FinderError::InvalidAddress(e.to_string()))
            })
            .collect::<Result<Vec<ScriptBuf>, _>>()?;

        let unspent = self
            .client
            .batch_script_list_unspent(scripts.iter().map(ScriptBuf::as_script))
            .map_err(finder_error)?;
        if unspent.len() != scripts.len() {
            return Err(FinderError::InvalidResponse(format!(
                "asked for {} scripts, got {} answers",
                scripts.len(),
                unspent.len()
            )));
        }

        let utxos: Vec<UnspentOutput> = unspent
            .into_iter()
            .zip(scripts.iter().zip(addresses))
            .flat_map(|(list, (script, address))| {
                list.into_iter().map(move |u| UnspentOutput {
                    outpoint: OutPoint {
                        txid: u.tx_hash,
                        vout: u.tx_pos as u32,
                    },
                    value: Amount::from_sat(u.value),
                    script_pubkey: script.clone(),
                    address: address.clone(),
                })
            })
            .collect();
        log::debug!(
            "{} UTXOs across {} addresses",
            utxos.len(),
            addresses.len()
        );
        Ok(utxos)
    }
}

/// Default Electrum servers for each network
pub fn default_server(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "ssl://electrum.blockstream.info:60002",
        Network::Testnet => "ssl://electrum.blockstream.info:60004",
        Network::Signet => "ssl://mempool.space:60602",
        Network::Regtest => "tcp://127.0.0.1:60401",
        _ => "ssl://electrum.blockstream.info:60002",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trisig_core::BitcoinAddressCodec;

    #[test]
    fn test_default_servers() {
        assert!(default_server(Network::Bitcoin).contains("60002"));
        assert!(default_server(Network::Testnet).contains("60004"));
    }

    #[test]
    fn test_io_errors_are_retryable() {
        let timeout = finder_error(ElectrumError::IOError(std::io::Error::new(
            ErrorKind::TimedOut,
            "read timed out",
        )));
        assert!(matches!(timeout, FinderError::Timeout(_)));

        let reset = finder_error(ElectrumError::IOError(std::io::Error::new(
            ErrorKind::ConnectionReset,
            "reset by peer",
        )));
        assert!(matches!(reset, FinderError::Transport(_)));
        assert!(reset.is_retryable());

        let protocol = finder_error(ElectrumError::Message("bad request".into()));
        assert!(!protocol.is_retryable());
    }

    // Integration tests require network access
    // Run with: cargo test --package trisig-electrum -- --ignored

    #[test]
    #[ignore = "requires network access"]
    fn test_lookup_testnet() {
        let codec = BitcoinAddressCodec::new(Network::Testnet);
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let key = bitcoin::secp256k1::SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pk = bitcoin::PublicKey::new(key.public_key(&secp));
        let address = codec
            .address_from_script(&ScriptBuf::new_p2pkh(&pk.pubkey_hash()))
            .unwrap();

        let finder = ElectrumUtxoFinder::new(default_server(Network::Testnet), Box::new(codec)).unwrap();
        assert!(finder.get_height().unwrap() > 0);
        let utxos = finder.get_unspent_outputs(&[address.clone()]).unwrap();
        assert!(utxos.iter().all(|u| u.address == address));
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_rejects_foreign_address() {
        let finder = ElectrumUtxoFinder::new(
            default_server(Network::Testnet),
            Box::new(BitcoinAddressCodec::new(Network::Testnet)),
        )
        .unwrap();
        let err = finder
            .get_unspent_outputs(&["1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".to_string()])
            .unwrap_err();
        assert!(matches!(err, FinderError::InvalidAddress(_)));
    }
}
