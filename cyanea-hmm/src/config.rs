//! Configuration for the training loop and the batch drivers.

use cyanea_core::{CyaneaError, Result};

// ---------------------------------------------------------------------------
// Parallelism
// ---------------------------------------------------------------------------

/// Worker count for batch drivers and training.
///
/// Every parallel entry point receives one of these explicitly; nothing is
/// read from a global setting.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParallelConfig {
    /// Number of worker threads. Zero lets rayon choose. Ignored without the
    /// `parallel` feature, where everything runs on the calling thread.
    pub num_threads: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl ParallelConfig {
    /// Single-threaded configuration.
    pub fn sequential() -> Self {
        Self { num_threads: 1 }
    }

    /// Configuration with exactly `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Self {
        Self { num_threads }
    }

    /// Build a dedicated rayon pool with `num_threads` workers.
    ///
    /// # Errors
    ///
    /// Returns [`CyaneaError::Other`] if the pool cannot be created.
    #[cfg(feature = "parallel")]
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|i| format!("cyanea-hmm-{i}"))
            .build()
            .map_err(|e| CyaneaError::Other(format!("failed to build thread pool: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Baum-Welch
// ---------------------------------------------------------------------------

/// Configuration for Baum-Welch training.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BaumWelchConfig {
    /// Maximum number of EM iterations.
    pub max_steps: usize,
    /// Stop once the log-likelihood moves by less than this between
    /// iterations.
    pub threshold: f64,
    /// Worker pool used for the per-sequence passes.
    pub parallel: ParallelConfig,
}

impl Default for BaumWelchConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            threshold: 1e-6,
            parallel: ParallelConfig::default(),
        }
    }
}

impl BaumWelchConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.threshold.is_nan() || self.threshold < 0.0 {
            return Err(CyaneaError::InvalidInput(format!(
                "threshold must be non-negative, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = BaumWelchConfig::default();
        assert_eq!(cfg.max_steps, 100);
        assert!(cfg.threshold > 0.0);
        assert!(cfg.parallel.num_threads >= 1);
        assert!(cfg.validate().is_ok());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn pool_has_requested_size() {
        let pool = ParallelConfig::with_threads(3).thread_pool().unwrap();
        assert_eq!(pool.current_num_threads(), 3);
        assert_eq!(ParallelConfig::sequential().num_threads, 1);
    }

    #[test]
    fn negative_or_nan_threshold_is_rejected() {
        let mut cfg = BaumWelchConfig::default();
        cfg.threshold = -1.0;
        assert!(cfg.validate().is_err());
        cfg.threshold = f64::NAN;
        assert!(cfg.validate().is_err());
    }
}
