//! Address codec boundary
//!
//! Address string encoding is an external concern; the engine only needs to
//! go from an address to its scriptPubKey and back. [`BitcoinAddressCodec`]
//! covers base58 P2PKH/P2SH and bech32 via the `bitcoin` crate, which also
//! reads legacy Bitcoin Cash addresses. Other encodings (CashAddr) plug in by
//! implementing [`AddressCodec`].

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, Script, ScriptBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address {address}: {reason}")]
    Invalid { address: String, reason: String },

    #[error("Address {address} is not valid for {network}")]
    WrongNetwork { address: String, network: Network },

    #[error("Script {0} has no address form")]
    NoAddressForm(String),
}

pub trait AddressCodec: Send + Sync {
    /// Decode an address string into the scriptPubKey it pays to.
    fn script_pubkey(&self, address: &str) -> Result<ScriptBuf, AddressError>;

    /// Encode a scriptPubKey as an address string.
    fn address_from_script(&self, script: &Script) -> Result<String, AddressError>;

    /// Whether two address strings (possibly in different encodings) pay to
    /// the same script hash.
    fn same_destination(&self, a: &str, b: &str) -> Result<bool, AddressError> {
        Ok(self.script_pubkey(a)? == self.script_pubkey(b)?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BitcoinAddressCodec {
    network: Network,
}

impl BitcoinAddressCodec {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> Network {
        self.network
    }
}

impl AddressCodec for BitcoinAddressCodec {
    fn script_pubkey(&self, address: &str) -> Result<ScriptBuf, AddressError> {
        let unchecked: Address<NetworkUnchecked> =
            address.parse().map_err(|e: bitcoin::address::ParseError| {
                AddressError::Invalid {
                    address: address.to_string(),
                    reason: e.to_string(),
                }
            })?;
        let checked = unchecked
            .require_network(self.network)
            .map_err(|_| AddressError::WrongNetwork {
                address: address.to_string(),
                network: self.network,
            })?;
        Ok(checked.script_pubkey())
    }

    fn address_from_script(&self, script: &Script) -> Result<String, AddressError> {
        Address::from_script(script, self.network)
            .map(|a| a.to_string())
            .map_err(|_| AddressError::NoAddressForm(hex::encode(script.as_bytes())))
    }
}
