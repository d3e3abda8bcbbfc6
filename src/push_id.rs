//! Time-ordered child keys for the in-memory collection.
//!
//! DESIGN
//! ======
//! Keys follow the realtime database push-id layout: 8 characters encoding
//! the millisecond timestamp, then 12 random characters, all drawn from an
//! alphabet whose byte order matches its index order. Plain string comparison
//! therefore sorts keys by creation time. Within one millisecond the random
//! tail is incremented instead of redrawn, keeping keys strictly increasing.

use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Stateful generator; one per collection.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_ms: u64,
    last_random: [u8; RANDOM_CHARS],
}

impl PushIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the key for a child created at `now_ms`.
    pub fn next_id(&mut self, now_ms: u64, rng: &mut impl Rng) -> String {
        let duplicate = now_ms == self.last_ms;
        self.last_ms = now_ms;

        let mut out = [0_u8; TIME_CHARS + RANDOM_CHARS];
        let mut ts = now_ms;
        for slot in out[..TIME_CHARS].iter_mut().rev() {
            *slot = PUSH_CHARS[(ts % 64) as usize];
            ts /= 64;
        }

        if duplicate {
            increment(&mut self.last_random);
        } else {
            for value in &mut self.last_random {
                *value = rng.random_range(0..64);
            }
        }
        for (slot, value) in out[TIME_CHARS..].iter_mut().zip(self.last_random) {
            *slot = PUSH_CHARS[value as usize];
        }

        out.iter().map(|b| char::from(*b)).collect()
    }
}

fn increment(digits: &mut [u8; RANDOM_CHARS]) {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return;
        }
    }
}

#[cfg(test)]
#[path = "push_id_test.rs"]
mod tests;
