//! Trust-based verification sampling.
//!
//! Schnorr verification dominates CPU on hot feeds. Each relay holds a
//! sampling rate `r` in `[0.1, 1.0]`, initially 1.0: an incoming event is
//! verified with probability `r`. Every verified event decays the rate by
//! ×0.95 down to the 0.1 floor; any verification failure snaps it back to
//! 1.0. A well-behaved relay earns reduced sampling but never escapes
//! spot-checks entirely.

use std::sync::atomic::{AtomicU64, Ordering};

pub const INITIAL_RATE: f64 = 1.0;
pub const MIN_RATE: f64 = 0.1;
pub const DECAY: f64 = 0.95;

#[derive(Debug)]
pub struct VerificationSampler {
    /// f64 bits, so reads and updates stay lock-free.
    rate_bits: AtomicU64,
}

impl Default for VerificationSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationSampler {
    pub fn new() -> Self {
        Self {
            rate_bits: AtomicU64::new(INITIAL_RATE.to_bits()),
        }
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    /// Whether the next incoming event should be verified.
    pub fn should_verify(&self) -> bool {
        rand::random::<f64>() < self.rate()
    }

    /// A sampled event verified: decay the rate toward the floor.
    pub fn record_success(&self) {
        let _ = self
            .rate_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let next = (f64::from_bits(bits) * DECAY).max(MIN_RATE);
                Some(next.to_bits())
            });
    }

    /// A sampled event failed verification: back to full checking.
    pub fn record_failure(&self) {
        self.rate_bits
            .store(INITIAL_RATE.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_full_rate() {
        let sampler = VerificationSampler::new();
        assert_eq!(sampler.rate(), 1.0);
        // At rate 1.0 every event is sampled.
        assert!((0..100).all(|_| sampler.should_verify()));
    }

    #[test]
    fn test_decay_reaches_floor() {
        let sampler = VerificationSampler::new();
        for _ in 0..200 {
            sampler.record_success();
        }
        let rate = sampler.rate();
        assert!(rate >= MIN_RATE);
        assert!(rate < MIN_RATE + 1e-9, "rate should settle at the floor, got {rate}");
    }

    #[test]
    fn test_failure_resets_to_full() {
        let sampler = VerificationSampler::new();
        for _ in 0..50 {
            sampler.record_success();
        }
        assert!(sampler.rate() < 1.0);
        sampler.record_failure();
        assert_eq!(sampler.rate(), 1.0);
    }

    #[test]
    fn test_expected_sample_count_tracks_rate() {
        // 10 000 valid events through the decay rule: the rate lands at the
        // floor and the number of verifications matches the sum of the
        // per-event rates within 3σ.
        let sampler = VerificationSampler::new();
        let mut expected = 0.0;
        let mut verified = 0u32;
        let mut non_validated = 0u32;
        for _ in 0..10_000 {
            let r = sampler.rate();
            expected += r;
            if sampler.should_verify() {
                verified += 1;
                sampler.record_success();
            } else {
                non_validated += 1;
            }
        }
        assert_eq!(verified + non_validated, 10_000);
        assert!(sampler.rate() >= MIN_RATE && sampler.rate() < MIN_RATE + 1e-9);
        let sigma = (10_000.0 * MIN_RATE * (1.0 - MIN_RATE)).sqrt();
        let diff = (f64::from(verified) - expected).abs();
        assert!(
            diff < 3.0 * sigma + 60.0,
            "verified {verified} too far from expected {expected:.1}"
        );
    }
}
