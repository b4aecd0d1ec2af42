//! Fuzz target for envelope JSON decoding
//!
//! Relay rows are untrusted. Decoding must never panic, and accessors on a
//! decoded envelope must tolerate any field contents.

#![no_main]

use cipherline_client::{Envelope, UserId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = Envelope::from_json(json) else {
        return;
    };

    let _ = envelope.ciphertext();
    let _ = envelope.embedded_public_key();
    let _ = envelope.attachment();
    let _ = envelope.counterpart(&UserId::new("fuzz"));
});
