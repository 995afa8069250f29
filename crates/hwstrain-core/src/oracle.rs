//! Correctness oracle — closed-form prediction of post-burst memory.
//!
//! Every method declares an [`Oracle`]: where the prediction starts from
//! ([`Baseline`]) and how one unit of the method transforms the value
//! ([`StepFn`]).  After a burst of `n` units the engine reads the location
//! back and hands both values to [`verify`].  Any difference is a
//! [`CorrectnessFailure`]; it is never retried.
//!
//! # Step functions
//!
//! | Step                  | `f(v0, n)`                          |
//! |-----------------------|-------------------------------------|
//! | `Add(k)`              | `(v0 + k·n) mod 2^bits`             |
//! | `Identity`            | `v0`                                |
//! | `InvertedWalkingBit`  | `!(1 << ((n - 1) & 7))` (one byte)  |
//! | `UnitCount`           | `n mod 2^bits`                      |
//!
//! A burst of zero units leaves every location at `v0`.

use crate::error::CorrectnessFailure;

/// Value the closed form starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// The target location's own value before the burst.
    Target,
    /// Harness-owned seed threaded through successive bursts.
    Seed,
    /// The last value the burst copied in from elsewhere.
    LastTransferred,
}

/// Effect of one unit of a method on the verified location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFn {
    /// Each unit adds a constant.
    Add(u128),
    /// Each unit leaves the value unchanged.
    Identity,
    /// Unit `i` ends by writing the complement of bit `i & 7`.
    InvertedWalkingBit,
    /// Unit `i` (1-based) writes `i`.
    UnitCount,
}

/// Closed-form oracle for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Oracle {
    pub baseline: Baseline,
    pub step: StepFn,
}

impl Oracle {
    /// Oracle starting from the target's own value.
    pub const fn on_target(step: StepFn) -> Self {
        Self {
            baseline: Baseline::Target,
            step,
        }
    }

    /// Oracle starting from an explicit baseline.
    pub const fn new(baseline: Baseline, step: StepFn) -> Self {
        Self { baseline, step }
    }

    /// Value expected after `n` units starting from `v0`, truncated to a
    /// location `width` bytes wide.
    pub fn expected(&self, v0: u128, n: u64, width: usize) -> u128 {
        let mask = width_mask(width);
        if n == 0 {
            return v0 & mask;
        }
        let value = match self.step {
            StepFn::Add(k) => v0.wrapping_add(k.wrapping_mul(u128::from(n))),
            StepFn::Identity => v0,
            StepFn::InvertedWalkingBit => u128::from(!(1u8 << ((n - 1) & 7))),
            StepFn::UnitCount => u128::from(n),
        };
        value & mask
    }
}

/// All-ones mask for a location `width` bytes wide.
pub fn width_mask(width: usize) -> u128 {
    match width {
        0 => 0,
        w if w >= 16 => u128::MAX,
        w => (1u128 << (w * 8)) - 1,
    }
}

/// Compare an observed value against the oracle's prediction.
#[inline]
pub fn verify(
    method: &'static str,
    offset: usize,
    width: usize,
    expected: u128,
    observed: u128,
) -> Result<(), CorrectnessFailure> {
    if expected == observed {
        Ok(())
    } else {
        Err(CorrectnessFailure {
            method,
            offset,
            width,
            expected,
            observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_by_seven_over_full_burst_returns_to_start() {
        // 7 * 1024 = 7168 = 28 * 256
        let oracle = Oracle::on_target(StepFn::Add(7));
        assert_eq!(oracle.expected(0x10, 1024, 1), 0x10);
    }

    #[test]
    fn increment_wraps_modulo_width() {
        let oracle = Oracle::on_target(StepFn::Add(7));
        assert_eq!(oracle.expected(0xfe, 1, 1), 0x05);
        assert_eq!(oracle.expected(0, 37, 1), (7 * 37) % 256);

        let wide = Oracle::on_target(StepFn::Add(1));
        assert_eq!(wide.expected(0xffff, 1, 2), 0);
        assert_eq!(wide.expected(0, 65_535, 2), 0xffff);
        assert_eq!(wide.expected(u128::MAX, 1, 16), 0);
    }

    #[test]
    fn add_matches_iterated_step_for_every_start_byte() {
        let oracle = Oracle::on_target(StepFn::Add(7));
        for v0 in 0u8..=255 {
            let mut v = v0;
            for n in 1..=300u64 {
                v = v.wrapping_add(7);
                assert_eq!(oracle.expected(u128::from(v0), n, 1), u128::from(v));
            }
        }
    }

    #[test]
    fn identity_ignores_burst_length() {
        let oracle = Oracle::on_target(StepFn::Identity);
        for n in [0, 1, 2, 1023, 1024] {
            assert_eq!(oracle.expected(0x5a, n, 1), 0x5a);
        }
    }

    #[test]
    fn inverted_walking_bit_depends_only_on_last_unit() {
        let oracle = Oracle::on_target(StepFn::InvertedWalkingBit);
        assert_eq!(oracle.expected(0x00, 1024, 1), 0x7f);
        assert_eq!(oracle.expected(0xff, 1, 1), 0xfe);
        assert_eq!(oracle.expected(0x33, 3, 1), 0xfb);
        assert_eq!(oracle.expected(0x33, 0, 1), 0x33);
    }

    #[test]
    fn unit_count_truncates() {
        let oracle = Oracle::on_target(StepFn::UnitCount);
        assert_eq!(oracle.expected(0xdead, 65_535, 2), 0xffff);
        assert_eq!(oracle.expected(0, 65_535, 1), 0xff);
        assert_eq!(oracle.expected(0, 300, 8), 300);
    }

    #[test]
    fn verify_reports_mismatch() {
        assert!(verify("inc", 0, 1, 0x10, 0x10).is_ok());
        let failure = verify("inc", 2, 1, 0x10, 0x11).unwrap_err();
        assert_eq!(failure.method, "inc");
        assert_eq!(failure.offset, 2);
        assert_eq!(failure.expected, 0x10);
        assert_eq!(failure.observed, 0x11);
    }

    #[test]
    fn width_masks() {
        assert_eq!(width_mask(1), 0xff);
        assert_eq!(width_mask(2), 0xffff);
        assert_eq!(width_mask(8), u128::from(u64::MAX));
        assert_eq!(width_mask(16), u128::MAX);
    }
}
