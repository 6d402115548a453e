//! Discrete hidden Markov models for the Cyanea ecosystem.
//!
//! Numerically stable inference and multi-core training:
//!
//! - **Models** — [`HmmModel`], its log-space copy [`LogHmmModel`], and
//!   [`SymbolSequence`] observations
//! - **Forward / backward** — scaled recurrences that never underflow, via
//!   [`forward`], [`backward`] and [`log_likelihood`]
//! - **Viterbi** — log-domain decoding with a lowest-index tie-break, via
//!   [`viterbi`]
//! - **Posteriors** — state (gamma) and transition (xi) probabilities
//! - **Training** — Baum-Welch over many sequences with [`baum_welch`]
//! - **Batch drivers** — [`evaluate_models`], [`evaluate_sequences`] and
//!   [`decode`], statically partitioned across a worker pool
//! - **Persistence** — text format for models, sequences and raw arrays in [`io`]
//! - **Generators** — exact-match and seeded random models in [`generate`]
//!
//! The `*_into` engines write into caller-supplied buffers (viewed through
//! [`MatrixViewMut`]) and never allocate. The wrappers and drivers obtain
//! their buffers from a [`BufferService`] after checking the dimension
//! overflow guard.
//!
//! Cargo features: `parallel` (default) runs posteriors, re-estimation,
//! training and the batch drivers on rayon pools; without it everything
//! runs on the calling thread. `serde` derives serialization for models,
//! sequences and configs, with deserialization going through the
//! validating constructors.
//!
//! # Example
//!
//! ```
//! use cyanea_hmm::{baum_welch, viterbi, BaumWelchConfig, HmmModel, SymbolSequence};
//!
//! // Fair and loaded coin; symbol 0 = heads, 1 = tails.
//! let mut model = HmmModel::new(
//!     2,
//!     2,
//!     vec![0.5, 0.5],
//!     vec![0.9, 0.1, 0.2, 0.8],
//!     vec![0.5, 0.5, 0.8, 0.2],
//! )
//! .unwrap();
//!
//! let flips = SymbolSequence::new(0, 2, vec![0, 0, 0, 0, 1, 0, 0, 0]).unwrap();
//! let path = viterbi(&model, &flips).unwrap();
//! assert_eq!(path.states.len(), flips.len());
//!
//! let report = baum_welch(&mut model, &[flips], &BaumWelchConfig::default()).unwrap();
//! assert!(report.log_likelihood <= 0.0);
//! assert_eq!(model.prior(), report.log_likelihood);
//! ```

pub mod backward;
pub mod batch;
pub mod buffer;
pub mod config;
pub mod forward;
pub mod generate;
pub mod io;
pub mod matrix;
pub mod model;
pub mod numeric;
pub mod posterior;
pub mod reestimate;
pub mod train;
pub mod viterbi;

#[cfg(test)]
mod testutil;

pub use backward::{backward, backward_into, rescale_backward, BackwardPass};
pub use batch::{
    decode, decode_with, evaluate_models, evaluate_models_with, evaluate_sequences,
    evaluate_sequences_with,
};
pub use buffer::{check_dimensions, overflow_level, BufferService, HeapBuffers};
pub use config::{BaumWelchConfig, ParallelConfig};
pub use forward::{forward, forward_into, log_likelihood, ForwardPass};
pub use matrix::{Matrix, MatrixView, MatrixViewMut};
pub use model::{HmmModel, LogHmmModel, SymbolSequence};
pub use posterior::{gamma_into, xi_into};
pub use reestimate::Accumulators;
pub use train::{baum_welch, BaumWelch, TrainReport, TrainState};
pub use viterbi::{viterbi, viterbi_into, ViterbiPath, ViterbiScratch};
