//! BIP-39 mnemonics
//!
//! The backup key is always a 24-word mnemonic; V1 wallets also keep the
//! primary key as one.

use bip39::{Language, Mnemonic};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// Generate a new 24-word mnemonic
pub fn generate_mnemonic() -> Result<Mnemonic, SeedError> {
    Mnemonic::generate_in(Language::English, 24)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// Mnemonic encoding raw entropy (16 to 32 bytes)
pub fn mnemonic_from_entropy(entropy: &[u8]) -> Result<Mnemonic, SeedError> {
    Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

pub fn parse_mnemonic(words: &str) -> Result<Mnemonic, SeedError> {
    Mnemonic::parse_in(Language::English, words)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// BIP-39 seed for `mnemonic` and `passphrase`
pub fn derive_seed(mnemonic: &Mnemonic, passphrase: &str) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed(passphrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_24_words() {
        let mnemonic = generate_mnemonic().unwrap();
        assert_eq!(mnemonic.word_count(), 24);
        let reparsed = parse_mnemonic(&mnemonic.to_string()).unwrap();
        assert_eq!(reparsed, mnemonic);
    }

    /// BIP-39 reference vector (passphrase "TREZOR")
    #[test]
    fn test_seed_vector() {
        let mnemonic = parse_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        )
        .unwrap();
        let seed = derive_seed(&mnemonic, "TREZOR");
        assert_eq!(
            hex::encode(&seed[..]),
            "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04"
        );
    }

    #[test]
    fn test_passphrase_changes_seed() {
        let mnemonic = mnemonic_from_entropy(&[7u8; 32]).unwrap();
        assert_ne!(*derive_seed(&mnemonic, ""), *derive_seed(&mnemonic, "extra"));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        assert!(parse_mnemonic("zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo").is_err());
        assert!(parse_mnemonic("not a mnemonic").is_err());
    }
}
