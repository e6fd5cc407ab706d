#![no_main]

use libfuzzer_sys::fuzz_target;
use trisig_core::seed::{derive_seed, parse_mnemonic};

fuzz_target!(|data: &[u8]| {
    // Recovery sheets are typed in by hand; parsing must return Ok or Err.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(mnemonic) = parse_mnemonic(s) {
            let _ = derive_seed(&mnemonic, "");
        }
    }
});
