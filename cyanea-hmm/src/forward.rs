//! Scaled forward recurrence.
//!
//! Each alpha row is normalized as soon as it is computed, and the
//! multiplier is kept in the scaling array. The log-likelihood is recovered
//! from those multipliers, so arbitrarily long sequences never underflow.

use cyanea_core::{Result, Scored};
use tracing::trace;

use crate::buffer::{check_dimensions_without_xi, BufferService, HeapBuffers};
use crate::matrix::{expect_len, expect_shape, Matrix, MatrixViewMut};
use crate::model::{HmmModel, SymbolSequence};
use crate::numeric::{log_of_divisors, normalize};

/// Fill `alpha` (T × N) and `scale[..T]` for `seq` under `model`, returning
/// the log-likelihood `-Σ ln scale[t]`.
///
/// Row 0 is `initial[i] · emission[i, o₀]`; row `t` is
/// `(Σⱼ alpha[t-1, j] · transition[j, i]) · emission[i, oₜ]`. Every row is
/// normalized in place and its multiplier stored in `scale[t]`.
///
/// # Errors
///
/// Returns [`CyaneaError::InvalidInput`](cyanea_core::CyaneaError) if the
/// sequence is empty, holds a symbol the model cannot emit, or the buffers do
/// not fit `T × N`.
pub fn forward_into(
    model: &HmmModel,
    seq: &SymbolSequence,
    mut alpha: MatrixViewMut<'_>,
    scale: &mut [f64],
) -> Result<f64> {
    model.validate_sequence(seq)?;
    let n = model.n_states();
    let len = seq.len();
    expect_shape("alpha", alpha.shape(), (len, n))?;
    expect_len("scale", scale.len(), len)?;

    let scale = &mut scale[..len];
    let obs = seq.symbols();
    let transition = model.transition();
    let emission = model.emission();

    let row0 = alpha.row_mut(0);
    for (i, (a, &pi)) in row0.iter_mut().zip(model.initial()).enumerate() {
        *a = pi * emission.get(i, obs[0]);
    }
    scale[0] = normalize(row0);

    for t in 1..len {
        let (prev, cur) = alpha.row_pair_mut(t - 1, t);
        for (i, a) in cur.iter_mut().enumerate() {
            let inflow: f64 = prev
                .iter()
                .enumerate()
                .map(|(j, &p)| p * transition.get(j, i))
                .sum();
            *a = inflow * emission.get(i, obs[t]);
        }
        scale[t] = normalize(cur);
    }

    Ok(log_of_divisors(scale))
}

// ---------------------------------------------------------------------------
// Wrapping layer
// ---------------------------------------------------------------------------

/// Output of a full forward pass.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// Normalized forward variables, T × N.
    pub alpha: Matrix,
    /// Per-step multipliers, length T.
    pub scale: Vec<f64>,
    /// `ln P(seq | model)`.
    pub log_likelihood: f64,
}

impl Scored for ForwardPass {
    fn score(&self) -> f64 {
        self.log_likelihood
    }
}

/// Run the forward engine with buffers from `buffers`.
///
/// # Errors
///
/// Fails on invalid input, on [`OverflowLevel::All`](cyanea_core::OverflowLevel)
/// dimensions, or when a buffer cannot be allocated.
pub fn forward_with(
    model: &HmmModel,
    seq: &SymbolSequence,
    buffers: &dyn BufferService,
) -> Result<ForwardPass> {
    model.validate_sequence(seq)?;
    check_dimensions_without_xi(model.n_states(), seq.len())?;
    let mut alpha = buffers.allocate_matrix(seq.len(), model.n_states())?;
    let mut scale = buffers.allocate(seq.len())?;
    let log_likelihood = forward_into(model, seq, alpha.view_mut(), &mut scale)?;
    trace!(seq = seq.id(), model = model.id(), log_likelihood, "forward pass");
    Ok(ForwardPass {
        alpha,
        scale,
        log_likelihood,
    })
}

/// Run the forward engine on heap buffers.
///
/// # Errors
///
/// See [`forward_with`].
pub fn forward(model: &HmmModel, seq: &SymbolSequence) -> Result<ForwardPass> {
    forward_with(model, seq, &HeapBuffers)
}

/// `ln P(seq | model)`.
///
/// # Errors
///
/// See [`forward_with`].
pub fn log_likelihood(model: &HmmModel, seq: &SymbolSequence) -> Result<f64> {
    forward(model, seq).map(|pass| pass.log_likelihood)
}
