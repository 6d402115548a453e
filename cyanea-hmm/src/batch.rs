//! Parallel batch drivers.
//!
//! Each driver validates every unit, checks the overflow guard for the
//! largest shape, then splits the units into one contiguous chunk per
//! worker. A worker allocates its scratch once and reuses it for every unit
//! of its chunk. If any worker fails to allocate, it flips a shared status
//! cell and the other workers stop at their next unit: the driver then
//! returns the error and no partial results.
//!
//! Without the `parallel` feature the whole batch is one chunk run on the
//! calling thread.

use std::sync::atomic::{AtomicU8, Ordering};

use cyanea_core::{CyaneaError, Result};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::buffer::{check_dimensions_without_xi, BufferService, HeapBuffers};
use crate::config::ParallelConfig;
use crate::forward::forward_into;
use crate::matrix::Matrix;
use crate::model::{HmmModel, LogHmmModel, SymbolSequence};
use crate::viterbi::{viterbi_into, ViterbiPath, ViterbiScratch};

// ---------------------------------------------------------------------------
// Abort cell
// ---------------------------------------------------------------------------

const RUNNING: u8 = 0;
const ABORTED: u8 = 1;

/// Shared run status, written at most once.
#[derive(Debug)]
struct AbortCell(AtomicU8);

impl AbortCell {
    fn new() -> Self {
        Self(AtomicU8::new(RUNNING))
    }

    /// Mark the run aborted. Returns `true` for the call that flipped it.
    fn abort(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire) == ABORTED
    }
}

/// Run `work` over `units` in one contiguous chunk per worker.
///
/// `scratch` is called once per chunk. Results come back in unit order.
fn run_partitioned<U, S, R>(
    driver: &'static str,
    units: &[U],
    config: &ParallelConfig,
    scratch: impl Fn() -> Result<S> + Sync,
    work: impl Fn(&mut S, &U) -> Result<R> + Sync,
) -> Result<Vec<R>>
where
    U: Sync,
    R: Send,
{
    if units.is_empty() {
        return Ok(Vec::new());
    }
    #[cfg(feature = "parallel")]
    let pool = config.thread_pool()?;
    #[cfg(feature = "parallel")]
    let workers = pool.current_num_threads().max(1);
    #[cfg(not(feature = "parallel"))]
    let workers = {
        let _ = config;
        1
    };
    let chunk_len = units.len().div_ceil(workers);
    debug!(driver, units = units.len(), workers, chunk_len, "batch start");

    let status = AbortCell::new();
    let run_chunk = |(chunk, part): (usize, &[U])| -> Result<Option<Vec<R>>> {
        if status.is_aborted() {
            return Ok(None);
        }
        let mut local = match scratch() {
            Ok(s) => s,
            Err(e) => {
                if status.abort() {
                    warn!(driver, chunk, error = %e, "worker aborted batch");
                }
                return Err(e);
            }
        };
        let mut out = Vec::with_capacity(part.len());
        for unit in part {
            if status.is_aborted() {
                return Ok(None);
            }
            match work(&mut local, unit) {
                Ok(r) => out.push(r),
                Err(e) => {
                    status.abort();
                    return Err(e);
                }
            }
        }
        trace!(driver, chunk, units = part.len(), "chunk done");
        Ok(Some(out))
    };

    #[cfg(feature = "parallel")]
    let chunks: Vec<Result<Option<Vec<R>>>> =
        pool.install(|| units.par_chunks(chunk_len).enumerate().map(run_chunk).collect());
    #[cfg(not(feature = "parallel"))]
    let chunks: Vec<Result<Option<Vec<R>>>> =
        units.chunks(chunk_len).enumerate().map(run_chunk).collect();

    let mut results = Vec::with_capacity(units.len());
    let mut first_error = None;
    let mut aborted = false;
    for chunk in chunks {
        match chunk {
            Ok(Some(part)) => results.extend(part),
            Ok(None) => aborted = true,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    if aborted {
        return Err(CyaneaError::Allocation(format!("{driver} aborted")));
    }
    Ok(results)
}

/// Alpha scratch plus scaling array for forward-only drivers.
struct ForwardScratch {
    alpha: Matrix,
    scale: Vec<f64>,
}

impl ForwardScratch {
    fn new(max_len: usize, max_states: usize, buffers: &dyn BufferService) -> Result<Self> {
        Ok(Self {
            alpha: buffers.allocate_matrix(max_len, max_states)?,
            scale: buffers.allocate(max_len)?,
        })
    }

    fn log_likelihood(&mut self, model: &HmmModel, seq: &SymbolSequence) -> Result<f64> {
        let view = self.alpha.shaped_mut(seq.len(), model.n_states())?;
        forward_into(model, seq, view, &mut self.scale)
    }
}

/// Viterbi scratch plus a path buffer for the decode driver.
struct DecodeScratch {
    viterbi: ViterbiScratch,
    path: Vec<usize>,
}

impl DecodeScratch {
    fn new(n_states: usize, max_len: usize, buffers: &dyn BufferService) -> Result<Self> {
        Ok(Self {
            viterbi: ViterbiScratch::new(n_states, max_len, buffers)?,
            path: buffers.allocate_indices(max_len)?,
        })
    }

    fn decode(&mut self, model: &LogHmmModel, seq: &SymbolSequence) -> Result<ViterbiPath> {
        let log_prob = viterbi_into(model, seq, &mut self.viterbi, &mut self.path)?;
        Ok(ViterbiPath {
            states: SymbolSequence::new(
                seq.id(),
                model.n_states(),
                self.path[..seq.len()].to_vec(),
            )?,
            log_prob,
        })
    }
}

fn max_len(sequences: &[SymbolSequence]) -> usize {
    sequences.iter().map(SymbolSequence::len).max().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Log-likelihood of `seq` under each of `models`, in model order.
///
/// # Errors
///
/// Fails if the sequence is invalid for any model, on
/// [`OverflowLevel::All`](cyanea_core::OverflowLevel) dimensions, if the
/// pool cannot be built, or with [`CyaneaError::Allocation`] if any worker
/// cannot obtain scratch.
pub fn evaluate_models(
    models: &[HmmModel],
    seq: &SymbolSequence,
    config: &ParallelConfig,
) -> Result<Vec<f64>> {
    evaluate_models_with(models, seq, config, &HeapBuffers)
}

/// [`evaluate_models`] with scratch from `buffers`.
///
/// # Errors
///
/// See [`evaluate_models`].
pub fn evaluate_models_with(
    models: &[HmmModel],
    seq: &SymbolSequence,
    config: &ParallelConfig,
    buffers: &dyn BufferService,
) -> Result<Vec<f64>> {
    for model in models {
        model.validate_sequence(seq)?;
    }
    let max_states = models.iter().map(HmmModel::n_states).max().unwrap_or(0);
    check_dimensions_without_xi(max_states, seq.len())?;

    run_partitioned(
        "evaluate_models",
        models,
        config,
        || ForwardScratch::new(seq.len(), max_states, buffers),
        |scratch, model| scratch.log_likelihood(model, seq),
    )
}

/// Log-likelihood of each of `sequences` under `model`, in sequence order.
///
/// # Errors
///
/// Fails if any sequence is invalid for the model, on
/// [`OverflowLevel::All`](cyanea_core::OverflowLevel) dimensions, if the
/// pool cannot be built, or with [`CyaneaError::Allocation`] if any worker
/// cannot obtain scratch.
pub fn evaluate_sequences(
    model: &HmmModel,
    sequences: &[SymbolSequence],
    config: &ParallelConfig,
) -> Result<Vec<f64>> {
    evaluate_sequences_with(model, sequences, config, &HeapBuffers)
}

/// [`evaluate_sequences`] with scratch from `buffers`.
///
/// # Errors
///
/// See [`evaluate_sequences`].
pub fn evaluate_sequences_with(
    model: &HmmModel,
    sequences: &[SymbolSequence],
    config: &ParallelConfig,
    buffers: &dyn BufferService,
) -> Result<Vec<f64>> {
    for seq in sequences {
        model.validate_sequence(seq)?;
    }
    let max_len = max_len(sequences);
    check_dimensions_without_xi(model.n_states(), max_len)?;

    run_partitioned(
        "evaluate_sequences",
        sequences,
        config,
        || ForwardScratch::new(max_len, model.n_states(), buffers),
        |scratch, seq| scratch.log_likelihood(model, seq),
    )
}

/// Most probable state path of each of `sequences` under `model`.
///
/// The model is converted to log space once and shared read-only by every
/// worker.
///
/// # Errors
///
/// Fails if any sequence is invalid for the model, on
/// [`OverflowLevel::All`](cyanea_core::OverflowLevel) dimensions, if the
/// pool cannot be built, or with [`CyaneaError::Allocation`] if any worker
/// cannot obtain scratch.
pub fn decode(
    model: &HmmModel,
    sequences: &[SymbolSequence],
    config: &ParallelConfig,
) -> Result<Vec<ViterbiPath>> {
    decode_with(model, sequences, config, &HeapBuffers)
}

/// [`decode`] with scratch from `buffers`.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_with(
    model: &HmmModel,
    sequences: &[SymbolSequence],
    config: &ParallelConfig,
    buffers: &dyn BufferService,
) -> Result<Vec<ViterbiPath>> {
    for seq in sequences {
        model.validate_sequence(seq)?;
    }
    let n = model.n_states();
    let max_len = max_len(sequences);
    check_dimensions_without_xi(n, max_len)?;
    let log_model = model.to_log_space();

    run_partitioned(
        "decode",
        sequences,
        config,
        || DecodeScratch::new(n, max_len, buffers),
        |scratch, seq| scratch.decode(&log_model, seq),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::testing::LimitedBuffers;
    use crate::forward::log_likelihood;
    use crate::testutil::{coin_hmm, seq};
    use crate::viterbi::viterbi;

    fn three_state() -> HmmModel {
        HmmModel::new(
            3,
            2,
            vec![0.2, 0.3, 0.5],
            vec![0.6, 0.2, 0.2, 0.1, 0.8, 0.1, 0.3, 0.3, 0.4],
            vec![0.9, 0.1, 0.5, 0.5, 0.2, 0.8],
        )
        .unwrap()
    }

    fn observations() -> Vec<SymbolSequence> {
        (0..11u64)
            .map(|i| {
                let len = 1 + (i as usize * 3) % 9;
                let symbols = (0..len).map(|t| (t + i as usize) % 2).collect();
                SymbolSequence::new(i, 2, symbols).unwrap()
            })
            .collect()
    }

    #[test]
    fn abort_cell_flips_once() {
        let cell = AbortCell::new();
        assert!(!cell.is_aborted());
        assert!(cell.abort());
        assert!(!cell.abort());
        assert!(cell.is_aborted());
    }

    #[test]
    fn evaluate_sequences_matches_sequential() {
        let model = coin_hmm();
        let data = observations();
        let expected: Vec<f64> = data.iter().map(|s| log_likelihood(&model, s).unwrap()).collect();
        for threads in [1, 3, 8] {
            let got =
                evaluate_sequences(&model, &data, &ParallelConfig::with_threads(threads)).unwrap();
            assert_eq!(got.len(), expected.len());
            for (g, e) in got.iter().zip(&expected) {
                assert!((g - e).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn evaluate_models_handles_mixed_state_counts() {
        let models = vec![coin_hmm(), three_state(), coin_hmm().with_id(2), three_state()];
        let s = seq(&[0, 1, 1, 0, 0, 0, 1], 2);
        let got = evaluate_models(&models, &s, &ParallelConfig::with_threads(3)).unwrap();
        for (model, g) in models.iter().zip(&got) {
            assert!((g - log_likelihood(model, &s).unwrap()).abs() < 1e-12);
        }
    }

    #[test]
    fn decode_matches_single_viterbi() {
        let model = three_state();
        let data = observations();
        let paths = decode(&model, &data, &ParallelConfig::with_threads(4)).unwrap();
        assert_eq!(paths.len(), data.len());
        for (path, s) in paths.iter().zip(&data) {
            let single = viterbi(&model, s).unwrap();
            assert_eq!(path.states, single.states);
            assert_eq!(path.states.id(), s.id());
            assert!((path.log_prob - single.log_prob).abs() < 1e-12);
        }
    }

    #[test]
    fn more_workers_than_units() {
        let model = coin_hmm();
        let data = vec![seq(&[0, 1], 2)];
        let got = evaluate_sequences(&model, &data, &ParallelConfig::with_threads(6)).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn empty_batches_are_empty() {
        let cfg = ParallelConfig::with_threads(2);
        assert!(evaluate_sequences(&coin_hmm(), &[], &cfg).unwrap().is_empty());
        assert!(decode(&coin_hmm(), &[], &cfg).unwrap().is_empty());
        assert!(evaluate_models(&[], &seq(&[0], 2), &cfg).unwrap().is_empty());
    }

    #[test]
    fn invalid_unit_fails_before_work() {
        let model = coin_hmm();
        let mut data = observations();
        data.push(seq(&[0, 3], 4));
        let cfg = ParallelConfig::with_threads(2);
        assert!(matches!(
            evaluate_sequences(&model, &data, &cfg),
            Err(CyaneaError::InvalidInput(_))
        ));
        assert!(decode(&model, &data, &cfg).is_err());
    }

    #[test]
    fn allocation_failure_aborts_without_results() {
        let model = coin_hmm();
        let data = observations();
        for threads in [1, 4] {
            let cfg = ParallelConfig::with_threads(threads);
            // Enough for one worker's alpha only.
            let buffers = LimitedBuffers::new(1);
            assert!(matches!(
                evaluate_sequences_with(&model, &data, &cfg, &buffers),
                Err(CyaneaError::Allocation(_))
            ));

            // Enough for one full worker (mu, backtrack, path), not for the rest.
            let buffers = LimitedBuffers::new(3);
            let result = decode_with(&model, &data, &cfg, &buffers);
            if threads == 1 || cfg!(not(feature = "parallel")) {
                assert!(result.is_ok());
            } else {
                assert!(matches!(result, Err(CyaneaError::Allocation(_))));
            }
        }
    }

    #[test]
    fn one_worker_allocates_once_for_the_whole_batch() {
        let model = coin_hmm();
        let data = observations();
        // Alpha plus scale for a single chunk.
        let buffers = LimitedBuffers::new(2);
        let got =
            evaluate_sequences_with(&model, &data, &ParallelConfig::sequential(), &buffers).unwrap();
        assert_eq!(got.len(), data.len());
        assert_eq!(buffers.requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn aborted_workers_stop_requesting() {
        let model = coin_hmm();
        let data = observations();
        let buffers = LimitedBuffers::new(0);
        let cfg = ParallelConfig::with_threads(4);
        assert!(evaluate_models_with(&[model.clone(), model], &data[3], &cfg, &buffers).is_err());
        // Each worker asks at most once before seeing the failure.
        assert!(buffers.requests.load(Ordering::SeqCst) <= 4);
    }
}
