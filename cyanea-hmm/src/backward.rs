//! Scaled backward recurrence and its alignment with the forward scaling.
//!
//! The backward engine normalizes each beta row independently of the
//! forward pass. Before beta can be combined with alpha (gamma, xi) it must
//! be brought onto the forward scale with [`rescale_backward`].

use cyanea_core::Result;
use tracing::trace;

use crate::buffer::{check_dimensions_without_xi, BufferService, HeapBuffers};
use crate::matrix::{expect_len, expect_shape, Matrix, MatrixViewMut};
use crate::model::{HmmModel, SymbolSequence};
use crate::numeric::normalize;

/// Fill `beta` (T × N) and `scale[..T]` for `seq` under `model`.
///
/// The last row is all ones with `scale[T-1] = 1`. Working backwards,
/// `beta[t, i] = Σⱼ transition[i, j] · emission[j, oₜ₊₁] · beta[t+1, j]`,
/// after which the row is normalized and its multiplier stored.
///
/// # Errors
///
/// Returns an error if the sequence is empty, holds a symbol the model
/// cannot emit, or the buffers do not fit `T × N`.
pub fn backward_into(
    model: &HmmModel,
    seq: &SymbolSequence,
    mut beta: MatrixViewMut<'_>,
    scale: &mut [f64],
) -> Result<()> {
    model.validate_sequence(seq)?;
    let n = model.n_states();
    let len = seq.len();
    expect_shape("beta", beta.shape(), (len, n))?;
    expect_len("scale", scale.len(), len)?;

    let obs = seq.symbols();
    let transition = model.transition();
    let emission = model.emission();

    beta.row_mut(len - 1).fill(1.0);
    scale[len - 1] = 1.0;

    for t in (0..len - 1).rev() {
        let o = obs[t + 1];
        let (cur, next) = beta.row_pair_mut(t, t + 1);
        for (i, b) in cur.iter_mut().enumerate() {
            *b = transition
                .row(i)
                .iter()
                .zip(next.iter())
                .enumerate()
                .map(|(j, (&a, &nb))| a * emission.get(j, o) * nb)
                .sum();
        }
        scale[t] = normalize(cur);
    }
    Ok(())
}

/// Bring `beta` onto the forward scale.
///
/// Walking `t` from `T-1` down to 0 a running factor is multiplied by
/// `scale_alpha[t] / scale_beta[t]` and row `t` of beta by the factor.
/// Afterwards `Σᵢ alpha[t, i] · beta[t, i] / scale_alpha[t]` is one for
/// every `t`.
///
/// # Errors
///
/// Returns an error if either scaling array is shorter than `beta`.
pub fn rescale_backward(
    mut beta: MatrixViewMut<'_>,
    scale_alpha: &[f64],
    scale_beta: &[f64],
) -> Result<()> {
    let len = beta.rows();
    expect_len("alpha scale", scale_alpha.len(), len)?;
    expect_len("beta scale", scale_beta.len(), len)?;

    let mut factor = 1.0;
    for t in (0..len).rev() {
        factor *= scale_alpha[t] / scale_beta[t];
        for b in beta.row_mut(t) {
            *b *= factor;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Wrapping layer
// ---------------------------------------------------------------------------

/// Output of a full backward pass (not yet rescaled).
#[derive(Debug, Clone)]
pub struct BackwardPass {
    /// Normalized backward variables, T × N.
    pub beta: Matrix,
    /// Per-step multipliers, length T.
    pub scale: Vec<f64>,
}

impl BackwardPass {
    /// Rescale onto the forward pass `scale_alpha` in place.
    ///
    /// # Errors
    ///
    /// See [`rescale_backward`].
    pub fn rescale(&mut self, scale_alpha: &[f64]) -> Result<()> {
        rescale_backward(self.beta.view_mut(), scale_alpha, &self.scale)
    }
}

/// Run the backward engine with buffers from `buffers`.
///
/// # Errors
///
/// Fails on invalid input, on [`OverflowLevel::All`](cyanea_core::OverflowLevel)
/// dimensions, or when a buffer cannot be allocated.
pub fn backward_with(
    model: &HmmModel,
    seq: &SymbolSequence,
    buffers: &dyn BufferService,
) -> Result<BackwardPass> {
    model.validate_sequence(seq)?;
    check_dimensions_without_xi(model.n_states(), seq.len())?;
    let mut beta = buffers.allocate_matrix(seq.len(), model.n_states())?;
    let mut scale = buffers.allocate(seq.len())?;
    backward_into(model, seq, beta.view_mut(), &mut scale)?;
    trace!(seq = seq.id(), model = model.id(), "backward pass");
    Ok(BackwardPass { beta, scale })
}

/// Run the backward engine on heap buffers.
///
/// # Errors
///
/// See [`backward_with`].
pub fn backward(model: &HmmModel, seq: &SymbolSequence) -> Result<BackwardPass> {
    backward_with(model, seq, &HeapBuffers)
}
