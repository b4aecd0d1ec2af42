//! Fuzz target for AES-GCM frame tampering
//!
//! # Strategy
//!
//! - Seal an arbitrary plaintext under an arbitrary key and nonce
//! - Apply one mutation: bit flip, truncation or appended bytes
//!
//! # Invariants
//!
//! - The untouched frame opens to the original plaintext
//! - Any mutated frame is rejected, never opened to different plaintext
//! - Frames below the minimum size are `Framing`, never `Authentication`

#![no_main]

use arbitrary::Arbitrary;
use cipherline_crypto::{CryptoError, MIN_FRAME_SIZE, SessionKey, open_bytes, seal_bytes};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    key: [u8; 32],
    nonce: [u8; 12],
    plaintext: Vec<u8>,
    mutation: Mutation,
}

#[derive(Debug, Arbitrary)]
enum Mutation {
    FlipBit { index: u16, bit: u8 },
    Truncate { keep: u16 },
    Append { extra: Vec<u8> },
}

fuzz_target!(|scenario: Scenario| {
    let key = SessionKey::from_bytes(scenario.key);
    let frame = seal_bytes(&key, &scenario.plaintext, scenario.nonce);

    assert_eq!(open_bytes(&key, &frame).as_deref(), Ok(scenario.plaintext.as_slice()));

    let mut tampered = frame.clone();
    match scenario.mutation {
        Mutation::FlipBit { index, bit } => {
            let index = usize::from(index) % tampered.len();
            tampered[index] ^= 1 << (bit % 8);
        },
        Mutation::Truncate { keep } => {
            tampered.truncate(usize::from(keep) % tampered.len());
        },
        Mutation::Append { extra } => {
            if extra.is_empty() {
                return;
            }
            tampered.extend_from_slice(&extra);
        },
    }

    match open_bytes(&key, &tampered) {
        Ok(_) => panic!("tampered frame opened"),
        Err(CryptoError::Framing { .. }) => assert!(tampered.len() < MIN_FRAME_SIZE),
        Err(CryptoError::Authentication) => assert!(tampered.len() >= MIN_FRAME_SIZE),
        Err(other) => panic!("unexpected error: {other}"),
    }
});
