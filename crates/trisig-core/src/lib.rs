//! trisig core
//!
//! Building blocks shared by the wallet engine and the sweeper.
//!
//! # Derivation
//!
//! Every wallet address lives at `m/key_index'/chain/address_index`. The
//! three keys behind it are:
//! - primary: derived from the primary xpub at `M/key_index'`
//! - backup: derived from the backup master xpub at the unhardened `M/key_index/chain/address_index`
//! - cosigner: derived from the cosigner xpub published for `M/key_index'`
//!
//! The keys are sorted and combined into a 2-of-3 `CHECKMULTISIG`, wrapped as
//! P2SH (chains 0/1) or P2SH-P2WSH (chain 2).
//!
//! # Encrypted Storage
//!
//! Primary key material is kept in one of three envelopes (V1 mnemonic,
//! V2 ChaCha20-Poly1305, V3 AES-256-GCM; both Argon2id-keyed).

pub mod address;
pub mod crypto;
pub mod envelope;
pub mod fee;
pub mod keys;
pub mod network;
pub mod paths;
pub mod script;
pub mod seed;
pub mod sign;
pub mod size;
pub mod throttle;

pub use address::{AddressCodec, AddressError, BitcoinAddressCodec};
pub use crypto::{decrypt, encrypt, CipherSuite, CryptoError, EncryptedBlob, KdfParams};
pub use envelope::{EnvelopeError, KeyUnlockScheme, UnlockOptions, UnlockedKeys, WalletVersion};
pub use fee::{FeePolicy, BASE_FEE, DUST};
pub use keys::{ExtendedPrivateKey, ExtendedPublicKey, KeyError};
pub use network::NetworkParams;
pub use paths::{Bip32Path, PathError, PathSegment, WalletPath};
pub use script::{ScriptError, WalletScript};
pub use size::{InputSize, SizeError, TxSize};
pub use throttle::Throttle;
