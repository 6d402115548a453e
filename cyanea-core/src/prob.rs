//! Log-space probability type for numerically stable computation.
//!
//! [`LogProb`] represents probabilities as natural logarithms. Chains of small
//! probabilities become sums, which keeps long dynamic programs away from
//! underflow.
//!
//! [`LogProb::floored`] maps anything below machine epsilon to [`LOG_ZERO`],
//! the most negative finite `f64`, instead of `-∞`. Floored values keep max-sum
//! recurrences well defined (no `-∞ - -∞` style NaNs appear when comparing
//! candidates).

/// Smallest probability treated as non-zero by [`LogProb::floored`].
pub const PRECISION: f64 = f64::EPSILON;

/// Finite stand-in for `ln(0)`.
pub const LOG_ZERO: f64 = -f64::MAX;

/// A probability stored as its natural logarithm: `ln(p)`.
///
/// All values are ≤ 0 (since 0 < p ≤ 1), with 0.0 representing certainty
/// (p = 1).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct LogProb(pub f64);

impl LogProb {
    /// Log of `p`, with everything below [`PRECISION`] mapped to [`LOG_ZERO`].
    ///
    /// Never fails and never returns `-∞` or NaN for non-negative input.
    pub fn floored(p: f64) -> Self {
        if p < PRECISION {
            Self(LOG_ZERO)
        } else {
            Self(p.ln())
        }
    }
}
