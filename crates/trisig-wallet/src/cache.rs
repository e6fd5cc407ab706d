//! Derivation side-cache
//!
//! Script derivation is pure; this is where its results are remembered.
//! The wallet owns one and clears it explicitly.

use std::collections::HashMap;
use trisig_core::{WalletPath, WalletScript};

#[derive(Debug, Clone, Default)]
pub struct DerivationCache {
    by_path: HashMap<WalletPath, WalletScript>,
    by_address: HashMap<String, WalletPath>,
}

impl DerivationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, script: WalletScript) {
        self.by_address
            .insert(script.address().to_string(), *script.path());
        self.by_path.insert(*script.path(), script);
    }

    pub fn get_by_path(&self, path: &WalletPath) -> Option<&WalletScript> {
        self.by_path.get(path)
    }

    pub fn path_for_address(&self, address: &str) -> Option<WalletPath> {
        self.by_address.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
        self.by_address.clear();
    }
}
