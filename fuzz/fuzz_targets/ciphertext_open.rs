//! Fuzz target for `open` on untrusted ciphertext strings
//!
//! The fuzzer should NEVER panic. Anything that is not a sealed frame under
//! the key returns `Framing` or `Authentication`.

#![no_main]

use cipherline_crypto::{CryptoError, SessionKey, open};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let key = SessionKey::from_bytes([0x5a; 32]);
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    match open(&key, text) {
        Ok(_) | Err(CryptoError::Framing { .. } | CryptoError::Authentication) => {},
        Err(other) => panic!("unexpected error from open: {other}"),
    }
});
