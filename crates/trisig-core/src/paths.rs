//! BIP-32 derivation paths
//!
//! Wallet addresses live at `m/key_index'/chain/address_index`. The private
//! path hardens the key index; the public equivalents (`M/…`) are what the
//! coordinator and the address derivation use.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default Bitcoin chain (P2SH 2-of-3)
pub const BTC_DEFAULT_CHAIN: u32 = 0;
/// Default Bitcoin Cash chain (P2SH 2-of-3)
pub const BCC_DEFAULT_CHAIN: u32 = 1;
/// Nested segwit chain (P2SH-P2WSH 2-of-3)
pub const BTC_SEGWIT_CHAIN: u32 = 2;

const MAX_INDEX: u32 = 0x7fff_ffff;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// One level of a derivation path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSegment {
    index: u32,
    hardened: bool,
}

impl PathSegment {
    pub fn normal(index: u32) -> Result<Self, PathError> {
        Self::new(index, false)
    }

    pub fn hardened(index: u32) -> Result<Self, PathError> {
        Self::new(index, true)
    }

    fn new(index: u32, hardened: bool) -> Result<Self, PathError> {
        if index > MAX_INDEX {
            return Err(PathError::InvalidPath(format!(
                "index {} out of range",
                index
            )));
        }
        Ok(Self { index, hardened })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    pub fn unhardened(&self) -> Self {
        Self {
            index: self.index,
            hardened: false,
        }
    }

    pub fn to_child_number(&self) -> ChildNumber {
        if self.hardened {
            ChildNumber::Hardened { index: self.index }
        } else {
            ChildNumber::Normal { index: self.index }
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

impl FromStr for PathSegment {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, hardened) = match s.strip_suffix(|c: char| matches!(c, '\'' | 'h' | 'H')) {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PathError::InvalidPath(format!("bad segment '{}'", s)));
        }
        let index: u32 = digits
            .parse()
            .map_err(|_| PathError::InvalidPath(format!("bad segment '{}'", s)))?;
        Self::new(index, hardened)
    }
}

/// A general BIP-32 path, `m/…` (private) or `M/…` (public).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bip32Path {
    public: bool,
    segments: Vec<PathSegment>,
}

impl Bip32Path {
    pub fn new(public: bool, segments: Vec<PathSegment>) -> Self {
        Self { public, segments }
    }

    /// `m`
    pub fn master() -> Self {
        Self::new(false, Vec::new())
    }

    /// `M`
    pub fn public_master() -> Self {
        Self::new(true, Vec::new())
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self::new(self.public, segments)
    }

    pub fn public_path(&self) -> Self {
        Self::new(true, self.segments.clone())
    }

    pub fn private_path(&self) -> Self {
        Self::new(false, self.segments.clone())
    }

    /// Same levels with every hardened marker removed (always public).
    pub fn unhardened_path(&self) -> Self {
        Self::new(true, self.segments.iter().map(|s| s.unhardened()).collect())
    }

    pub fn has_hardened(&self) -> bool {
        self.segments.iter().any(|s| s.is_hardened())
    }

    /// Prefix check on the levels; the `m`/`M` marker is ignored.
    pub fn is_parent_of(&self, other: &Bip32Path) -> bool {
        self.relative_to_parent(other).is_some()
    }

    /// Levels of `other` below `self`, if `self` is a prefix of `other`.
    pub fn relative_to_parent<'a>(&self, other: &'a Bip32Path) -> Option<&'a [PathSegment]> {
        other.segments.strip_prefix(self.segments.as_slice())
    }

    pub fn to_derivation_path(&self) -> DerivationPath {
        DerivationPath::from(
            self.segments
                .iter()
                .map(PathSegment::to_child_number)
                .collect::<Vec<_>>(),
        )
    }
}

impl fmt::Display for Bip32Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.public { "M" } else { "m" })?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Bip32Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let public = match parts.next() {
            Some("m") => false,
            Some("M") => true,
            _ => return Err(PathError::InvalidPath(s.to_string())),
        };
        let segments = parts
            .map(|part| {
                part.parse::<PathSegment>()
                    .map_err(|_| PathError::InvalidPath(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { public, segments })
    }
}

/// Canonical wallet address path: `(key_index', chain, address_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletPath {
    key_index: u32,
    chain: u32,
    address_index: u32,
}

impl WalletPath {
    pub fn create(key_index: u32, chain: u32, address_index: u32) -> Result<Self, PathError> {
        for index in [key_index, chain, address_index] {
            if index > MAX_INDEX {
                return Err(PathError::InvalidPath(format!(
                    "index {} out of range",
                    index
                )));
            }
        }
        Ok(Self {
            key_index,
            chain,
            address_index,
        })
    }

    pub fn key_index(&self) -> u32 {
        self.key_index
    }

    pub fn chain(&self) -> u32 {
        self.chain
    }

    pub fn address_index(&self) -> u32 {
        self.address_index
    }

    /// Same key index and chain, different address index.
    pub fn address(&self, address_index: u32) -> Result<Self, PathError> {
        Self::create(self.key_index, self.chain, address_index)
    }

    pub fn with_chain(&self, chain: u32) -> Result<Self, PathError> {
        Self::create(self.key_index, chain, self.address_index)
    }

    fn segments(&self, harden_key_index: bool) -> Vec<PathSegment> {
        vec![
            PathSegment {
                index: self.key_index,
                hardened: harden_key_index,
            },
            PathSegment {
                index: self.chain,
                hardened: false,
            },
            PathSegment {
                index: self.address_index,
                hardened: false,
            },
        ]
    }

    /// `m/key_index'/chain/address_index`
    pub fn path(&self) -> Bip32Path {
        Bip32Path::new(false, self.segments(true))
    }

    /// `M/key_index'/chain/address_index`
    pub fn public_path(&self) -> Bip32Path {
        Bip32Path::new(true, self.segments(true))
    }

    /// `M/key_index/chain/address_index`
    pub fn unhardened_path(&self) -> Bip32Path {
        Bip32Path::new(true, self.segments(false))
    }

    /// Where the backup key is derived: the unhardened path.
    pub fn backup_path(&self) -> Bip32Path {
        self.unhardened_path()
    }

    /// `m/key_index'`
    pub fn key_index_path(&self) -> Bip32Path {
        key_index_path(self.key_index)
    }
}

/// `m/key_index'`
pub fn key_index_path(key_index: u32) -> Bip32Path {
    Bip32Path::new(
        false,
        vec![PathSegment {
            index: key_index & MAX_INDEX,
            hardened: true,
        }],
    )
}

impl fmt::Display for WalletPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.public_path().fmt(f)
    }
}

impl TryFrom<&Bip32Path> for WalletPath {
    type Error = PathError;

    fn try_from(path: &Bip32Path) -> Result<Self, Self::Error> {
        match path.segments() {
            [key, chain, address]
                if key.is_hardened() && !chain.is_hardened() && !address.is_hardened() =>
            {
                Self::create(key.index(), chain.index(), address.index())
            }
            _ => Err(PathError::InvalidPath(format!(
                "{} is not a wallet path (expected m/k'/chain/index)",
                path
            ))),
        }
    }
}

impl FromStr for WalletPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path: Bip32Path = s.parse()?;
        Self::try_from(&path)
    }
}

impl Serialize for WalletPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WalletPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
