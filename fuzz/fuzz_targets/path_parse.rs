#![no_main]

use libfuzzer_sys::fuzz_target;
use trisig_core::{Bip32Path, WalletPath};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    // Coordinator responses carry paths as strings.
    if let Ok(path) = s.parse::<Bip32Path>() {
        let rendered = path.to_string();
        assert_eq!(rendered.parse::<Bip32Path>().ok(), Some(path));
    }

    if let Ok(path) = s.parse::<WalletPath>() {
        assert_eq!(path.to_string().parse::<WalletPath>().ok(), Some(path));
        let _ = path.backup_path().private_path();
    }
});
