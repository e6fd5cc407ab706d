#![no_main]

use libfuzzer_sys::fuzz_target;
use trisig_core::EncryptedBlob;

fuzz_target!(|data: &[u8]| {
    // Encrypted blobs come back from the coordinator; parsing must return Ok
    // or Err, and anything accepted must survive a round trip.
    if let Ok(blob) = EncryptedBlob::from_bytes(data) {
        let bytes = blob.to_bytes();
        assert!(EncryptedBlob::from_bytes(&bytes).is_ok());
        assert!(EncryptedBlob::from_base64(&blob.to_base64()).is_ok());
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = EncryptedBlob::from_base64(s);
    }
});
