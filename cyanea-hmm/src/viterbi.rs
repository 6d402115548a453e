//! Log-domain Viterbi decoding.
//!
//! Only two rows of the `mu` table are ever alive: the previous step and the
//! one being computed. The full `T × N` backtrack table is kept so the best
//! path can be recovered after the last step.

use cyanea_core::{CyaneaError, Result, Scored};
use tracing::trace;

use crate::buffer::{check_dimensions_without_xi, BufferService, HeapBuffers};
use crate::matrix::{expect_len, Matrix};
use crate::model::{HmmModel, LogHmmModel, SymbolSequence};

/// Reusable working memory for [`viterbi_into`].
///
/// Sized for a state count and a maximum sequence length; any shorter
/// sequence over the same state count can reuse it.
#[derive(Debug)]
pub struct ViterbiScratch {
    mu: Matrix,
    backtrack: Vec<usize>,
    n_states: usize,
    max_len: usize,
}

impl ViterbiScratch {
    /// Allocate scratch for `n_states` states and sequences of up to
    /// `max_len` steps.
    ///
    /// # Errors
    ///
    /// Returns [`CyaneaError::Allocation`] if `buffers` refuses a request.
    pub fn new(n_states: usize, max_len: usize, buffers: &dyn BufferService) -> Result<Self> {
        let cells = n_states.checked_mul(max_len).ok_or_else(|| {
            CyaneaError::Allocation(format!(
                "backtrack table {max_len}x{n_states} overflows usize"
            ))
        })?;
        Ok(Self {
            mu: buffers.allocate_matrix(2, n_states)?,
            backtrack: buffers.allocate_indices(cells)?,
            n_states,
            max_len,
        })
    }
}

/// Most probable state path for `seq` under a log-space model.
///
/// `mu[0, i] = initial[i] + emission[i, o₀]` and
/// `mu[t, i] = maxⱼ(mu[t-1, j] + transition[j, i]) + emission[i, oₜ]`.
/// Ties go to the lowest state index, both when choosing a predecessor and
/// when choosing the final state. The path is written to `path[..T]` and
/// its log-probability returned.
///
/// # Errors
///
/// Returns an error if the sequence is invalid for the model, the scratch
/// was sized for a different state count or a shorter sequence, or `path`
/// is too short.
pub fn viterbi_into(
    model: &LogHmmModel,
    seq: &SymbolSequence,
    scratch: &mut ViterbiScratch,
    path: &mut [usize],
) -> Result<f64> {
    model.validate_sequence(seq)?;
    let n = model.n_states();
    let len = seq.len();
    if scratch.n_states != n {
        return Err(CyaneaError::InvalidInput(format!(
            "scratch sized for {} states, model has {n}",
            scratch.n_states
        )));
    }
    expect_len("viterbi scratch", scratch.max_len, len)?;
    expect_len("path", path.len(), len)?;

    let obs = seq.symbols();
    let transition = model.transition();
    let emission = model.emission();
    let backtrack = &mut scratch.backtrack[..len * n];
    let mut mu = scratch.mu.view_mut();

    for (i, m) in mu.row_mut(0).iter_mut().enumerate() {
        *m = model.initial()[i] + emission.get(i, obs[0]);
    }

    for t in 1..len {
        let (even, odd) = mu.row_pair_mut(0, 1);
        let (prev, cur) = if t % 2 == 1 { (even, odd) } else { (odd, even) };
        let back = &mut backtrack[t * n..(t + 1) * n];
        for (i, (m, b)) in cur.iter_mut().zip(back.iter_mut()).enumerate() {
            let mut best = f64::NEG_INFINITY;
            let mut best_state = 0;
            for (j, &p) in prev.iter().enumerate() {
                let v = p + transition.get(j, i);
                if v > best {
                    best = v;
                    best_state = j;
                }
            }
            *m = best + emission.get(i, obs[t]);
            *b = best_state;
        }
    }

    let last = mu.row((len - 1) % 2);
    let mut best = f64::NEG_INFINITY;
    let mut state = 0;
    for (i, &m) in last.iter().enumerate() {
        if m > best {
            best = m;
            state = i;
        }
    }

    path[len - 1] = state;
    for t in (1..len).rev() {
        state = backtrack[t * n + state];
        path[t - 1] = state;
    }
    Ok(best)
}

// ---------------------------------------------------------------------------
// Wrapping layer
// ---------------------------------------------------------------------------

/// A decoded state path.
#[derive(Debug, Clone, PartialEq)]
pub struct ViterbiPath {
    /// Hidden states, with the observation's id and cardinality `n_states`.
    pub states: SymbolSequence,
    /// Log-probability of the path jointly with the observations.
    pub log_prob: f64,
}

impl Scored for ViterbiPath {
    fn score(&self) -> f64 {
        self.log_prob
    }
}

/// Decode with a prepared log-space model and buffers from `buffers`.
///
/// # Errors
///
/// Fails on invalid input, on [`OverflowLevel::All`](cyanea_core::OverflowLevel)
/// dimensions, or when a buffer cannot be allocated.
pub fn viterbi_with(
    model: &LogHmmModel,
    seq: &SymbolSequence,
    buffers: &dyn BufferService,
) -> Result<ViterbiPath> {
    model.validate_sequence(seq)?;
    check_dimensions_without_xi(model.n_states(), seq.len())?;
    let mut scratch = ViterbiScratch::new(model.n_states(), seq.len(), buffers)?;
    let mut path = buffers.allocate_indices(seq.len())?;
    let log_prob = viterbi_into(model, seq, &mut scratch, &mut path)?;
    trace!(seq = seq.id(), model = model.id(), log_prob, "viterbi path");
    Ok(ViterbiPath {
        states: SymbolSequence::new(seq.id(), model.n_states(), path)?,
        log_prob,
    })
}

/// Most probable state path for `seq` under `model`.
///
/// Converts the model to log space first; use [`viterbi_with`] with a
/// cached [`LogHmmModel`] when decoding many sequences.
///
/// # Errors
///
/// See [`viterbi_with`].
pub fn viterbi(model: &HmmModel, seq: &SymbolSequence) -> Result<ViterbiPath> {
    viterbi_with(&model.to_log_space(), seq, &HeapBuffers)
}
