//! Environment abstraction for deterministic testing.
//!
//! Decouples the pipeline from system resources (randomness, wall clock).
//! Production uses [`SystemEnv`]; tests use `test_utils::MockEnv` (feature
//! `test-utils`) with a seeded generator so nonces and identities are
//! reproducible.

/// Abstract environment providing randomness and time.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - `wall_clock_millis()` is Unix time in milliseconds
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// Used for AES-GCM nonces and identity scalar seeds.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Current wall-clock time as Unix milliseconds.
    ///
    /// Used to stamp optimistically rendered messages.
    fn wall_clock_millis(&self) -> u64;
}

/// Production environment using the OS RNG and the system clock.
///
/// # Panics
///
/// Panics if the OS RNG fails. A client without functioning randomness
/// cannot produce safe nonces, so continuing is not an option.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - nonces would be unsafe");
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic environments for tests.
///
/// Not cryptographically secure. Only built for this crate's tests or with the
/// `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };

    use super::{Environment, SystemEnv};

    /// Start of the mock clock (2024-01-01T00:00:00Z).
    const MOCK_EPOCH_MILLIS: u64 = 1_704_067_200_000;

    /// Seeded environment with a manually driven clock.
    ///
    /// Clones share the generator and clock, so two handles never hand out
    /// the same nonce.
    #[derive(Clone)]
    pub struct MockEnv {
        state: Arc<AtomicU64>,
        clock: Arc<AtomicU64>,
        crypto_rng: bool,
    }

    impl MockEnv {
        /// Environment whose random stream is fully determined by `seed`.
        pub fn with_seed(seed: u64) -> Self {
            Self {
                state: Arc::new(AtomicU64::new(seed)),
                clock: Arc::new(AtomicU64::new(MOCK_EPOCH_MILLIS)),
                crypto_rng: false,
            }
        }

        /// Environment with OS randomness but a mock clock.
        pub fn with_crypto_rng() -> Self {
            Self { crypto_rng: true, ..Self::with_seed(0) }
        }

        /// Move the clock forward.
        pub fn advance_millis(&self, millis: u64) {
            self.clock.fetch_add(millis, Ordering::SeqCst);
        }

        // splitmix64
        fn next_u64(&self) -> u64 {
            const GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

            let mut z = self.state.fetch_add(GAMMA, Ordering::SeqCst).wrapping_add(GAMMA);
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        }
    }

    impl Environment for MockEnv {
        fn random_bytes(&self, buffer: &mut [u8]) {
            if self.crypto_rng {
                SystemEnv.random_bytes(buffer);
                return;
            }

            for chunk in buffer.chunks_mut(8) {
                let word = self.next_u64().to_be_bytes();
                chunk.copy_from_slice(&word[..chunk.len()]);
            }
        }

        fn wall_clock_millis(&self) -> u64 {
            self.clock.load(Ordering::SeqCst)
        }
    }
}
