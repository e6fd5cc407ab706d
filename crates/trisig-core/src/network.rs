//! Network parameters: which Bitcoin network, and whether it is a fork-id
//! chain (Bitcoin Cash) that signs with `SIGHASH_FORKID`.

use bitcoin::Network;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::paths::{BCC_DEFAULT_CHAIN, BTC_DEFAULT_CHAIN, BTC_SEGWIT_CHAIN};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_FORKID: u32 = 0x40;

/// Bitcoin Cash replay-protection fork id
pub const BCH_FORK_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkParams {
    network: Network,
    fork_id: Option<u32>,
}

impl NetworkParams {
    pub const fn bitcoin(network: Network) -> Self {
        Self {
            network,
            fork_id: None,
        }
    }

    pub const fn bitcoin_cash(network: Network) -> Self {
        Self {
            network,
            fork_id: Some(BCH_FORK_ID),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn fork_id(&self) -> Option<u32> {
        self.fork_id
    }

    pub fn is_fork_id_chain(&self) -> bool {
        self.fork_id.is_some()
    }

    pub fn supports_segwit(&self) -> bool {
        !self.is_fork_id_chain()
    }

    /// Chain index new addresses are derived on.
    pub fn default_chain(&self, segwit: bool) -> u32 {
        if self.is_fork_id_chain() {
            BCC_DEFAULT_CHAIN
        } else if segwit {
            BTC_SEGWIT_CHAIN
        } else {
            BTC_DEFAULT_CHAIN
        }
    }

    /// `SIGHASH_ALL`, OR'd with the fork flag and id on fork-id chains.
    pub fn sighash_all(&self) -> u32 {
        match self.fork_id {
            Some(id) => SIGHASH_ALL | SIGHASH_FORKID | (id << 8),
            None => SIGHASH_ALL,
        }
    }
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self::bitcoin(Network::Bitcoin)
    }
}

impl fmt::Display for NetworkParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.network, self.is_fork_id_chain()) {
            (Network::Bitcoin, false) => "bitcoin",
            (Network::Testnet, false) => "testnet",
            (Network::Signet, false) => "signet",
            (Network::Regtest, false) => "regtest",
            (Network::Bitcoin, true) => "bch",
            (_, true) => "tbch",
            (_, false) => "testnet",
        };
        f.write_str(name)
    }
}

impl FromStr for NetworkParams {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitcoin" | "btc" | "mainnet" => Ok(Self::bitcoin(Network::Bitcoin)),
            "testnet" | "tbtc" => Ok(Self::bitcoin(Network::Testnet)),
            "signet" => Ok(Self::bitcoin(Network::Signet)),
            "regtest" => Ok(Self::bitcoin(Network::Regtest)),
            "bch" | "bcc" | "bitcoincash" => Ok(Self::bitcoin_cash(Network::Bitcoin)),
            "tbch" | "tbcc" => Ok(Self::bitcoin_cash(Network::Testnet)),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

impl Serialize for NetworkParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sighash_types() {
        assert_eq!(NetworkParams::bitcoin(Network::Bitcoin).sighash_all(), 0x01);
        assert_eq!(NetworkParams::bitcoin_cash(Network::Bitcoin).sighash_all(), 0x41);
    }

    #[test]
    fn test_default_chain() {
        let btc = NetworkParams::bitcoin(Network::Testnet);
        assert_eq!(btc.default_chain(false), BTC_DEFAULT_CHAIN);
        assert_eq!(btc.default_chain(true), BTC_SEGWIT_CHAIN);

        let bch = NetworkParams::bitcoin_cash(Network::Testnet);
        assert_eq!(bch.default_chain(true), BCC_DEFAULT_CHAIN);
        assert!(!bch.supports_segwit());
    }

    #[test]
    fn test_parse_roundtrip() {
        for name in ["bitcoin", "testnet", "regtest", "signet", "bch", "tbch"] {
            let params: NetworkParams = name.parse().unwrap();
            assert_eq!(params.to_string(), name);
        }
        assert!("dogecoin".parse::<NetworkParams>().is_err());
    }
}
