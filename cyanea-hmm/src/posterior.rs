//! State (gamma) and transition (xi) posteriors.
//!
//! Both read a forward table and a *rescaled* backward table. Output rows are
//! disjoint, so with the `parallel` feature each row is computed by its own
//! rayon task without locking.

use cyanea_core::Result;

use crate::matrix::{expect_len, expect_shape, MatrixView, MatrixViewMut};
use crate::model::{HmmModel, SymbolSequence};

/// `gamma[i, t] = alpha[t, i] · beta[t, i] / scale_alpha[t]`.
///
/// `alpha` and `beta` are `T × N`; `gamma` is `N × T`. Each column of gamma
/// sums to one when beta has been rescaled onto `scale_alpha`.
///
/// # Errors
///
/// Returns an error if the shapes disagree.
pub fn gamma_into(
    alpha: MatrixView<'_>,
    beta: MatrixView<'_>,
    scale_alpha: &[f64],
    mut gamma: MatrixViewMut<'_>,
) -> Result<()> {
    let (len, n) = alpha.shape();
    expect_shape("beta", beta.shape(), (len, n))?;
    expect_shape("gamma", gamma.shape(), (n, len))?;
    expect_len("alpha scale", scale_alpha.len(), len)?;

    gamma.for_each_row(|i, row| {
        for (t, g) in row.iter_mut().enumerate() {
            *g = alpha.get(t, i) * beta.get(t, i) / scale_alpha[t];
        }
    });
    Ok(())
}

/// `xi[i·N + j, t] = alpha[t, i] · transition[i, j] · emission[j, oₜ₊₁] · beta[t+1, j]`
/// for `t` in `0..T-1`.
///
/// `xi` is `(N·N) × (T-1)`. A single-step sequence has no transitions and
/// leaves `xi` empty.
///
/// # Errors
///
/// Returns an error if the sequence is invalid for the model or the shapes
/// disagree.
pub fn xi_into(
    model: &HmmModel,
    seq: &SymbolSequence,
    alpha: MatrixView<'_>,
    beta: MatrixView<'_>,
    mut xi: MatrixViewMut<'_>,
) -> Result<()> {
    model.validate_sequence(seq)?;
    let n = model.n_states();
    let len = seq.len();
    expect_shape("alpha", alpha.shape(), (len, n))?;
    expect_shape("beta", beta.shape(), (len, n))?;
    expect_shape("xi", xi.shape(), (n * n, len - 1))?;
    if len < 2 {
        return Ok(());
    }

    let obs = seq.symbols();
    let transition = model.transition();
    let emission = model.emission();
    xi.for_each_row(|r, row| {
        let (i, j) = (r / n, r % n);
        let a_ij = transition.get(i, j);
        for (t, x) in row.iter_mut().enumerate() {
            *x = alpha.get(t, i) * a_ij * emission.get(j, obs[t + 1]) * beta.get(t + 1, j);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backward::backward;
    use crate::forward::forward;
    use crate::matrix::Matrix;
    use crate::testutil::{all_paths, coin_hmm, path_probability, seq};

    fn posteriors(model: &HmmModel, s: &SymbolSequence) -> (Matrix, Matrix) {
        let fwd = forward(model, s).unwrap();
        let mut bwd = backward(model, s).unwrap();
        bwd.rescale(&fwd.scale).unwrap();
        let n = model.n_states();
        let len = s.len();
        let mut gamma = Matrix::zeros(n, len);
        let mut xi = Matrix::zeros(n * n, len - 1);
        gamma_into(fwd.alpha.view(), bwd.beta.view(), &fwd.scale, gamma.view_mut()).unwrap();
        xi_into(model, s, fwd.alpha.view(), bwd.beta.view(), xi.view_mut()).unwrap();
        (gamma, xi)
    }

    #[test]
    fn gamma_matches_path_enumeration() {
        let model = coin_hmm();
        let obs = [0, 1, 1, 0];
        let (gamma, _) = posteriors(&model, &seq(&obs, 2));
        let paths = all_paths(2, obs.len());
        let total: f64 = paths.iter().map(|p| path_probability(&model, p, &obs)).sum();
        for t in 0..obs.len() {
            for i in 0..2 {
                let mass: f64 = paths
                    .iter()
                    .filter(|p| p[t] == i)
                    .map(|p| path_probability(&model, p, &obs))
                    .sum();
                assert!((gamma.get(i, t) - mass / total).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn xi_matches_path_enumeration() {
        let model = coin_hmm();
        let obs = [1, 0, 0];
        let (_, xi) = posteriors(&model, &seq(&obs, 2));
        let paths = all_paths(2, obs.len());
        let total: f64 = paths.iter().map(|p| path_probability(&model, p, &obs)).sum();
        for t in 0..obs.len() - 1 {
            for i in 0..2 {
                for j in 0..2 {
                    let mass: f64 = paths
                        .iter()
                        .filter(|p| p[t] == i && p[t + 1] == j)
                        .map(|p| path_probability(&model, p, &obs))
                        .sum();
                    assert!((xi.get(i * 2 + j, t) - mass / total).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn xi_marginalizes_to_gamma() {
        let model = coin_hmm();
        let s = seq(&[0, 0, 1, 0, 1, 1], 2);
        let (gamma, xi) = posteriors(&model, &s);
        for t in 0..s.len() - 1 {
            for i in 0..2 {
                let out: f64 = (0..2).map(|j| xi.get(i * 2 + j, t)).sum();
                assert!((out - gamma.get(i, t)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn single_step_has_empty_xi() {
        let model = coin_hmm();
        let s = seq(&[1], 2);
        let (gamma, xi) = posteriors(&model, &s);
        assert_eq!(xi.cols(), 0);
        let sum: f64 = (0..2).map(|i| gamma.get(i, 0)).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let alpha = Matrix::zeros(3, 2);
        let beta = Matrix::zeros(3, 2);
        let mut gamma = Matrix::zeros(3, 2);
        assert!(gamma_into(alpha.view(), beta.view(), &[1.0; 3], gamma.view_mut()).is_err());

        let s = seq(&[0, 1, 0], 2);
        let mut xi = Matrix::zeros(4, 3);
        assert!(xi_into(&coin_hmm(), &s, alpha.view(), beta.view(), xi.view_mut()).is_err());
    }

    mod proptests {
        use super::*;
        use crate::testutil::model_and_sequence;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn gamma_columns_sum_to_one((model, s) in model_and_sequence(4, 3, 12)) {
                let (gamma, _) = posteriors(&model, &s);
                for t in 0..s.len() {
                    let sum: f64 = (0..model.n_states()).map(|i| gamma.get(i, t)).sum();
                    prop_assert!((sum - 1.0).abs() < 1e-9);
                }
            }
        }
    }
}
