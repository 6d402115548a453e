//! Baum-Welch re-estimation sums.
//!
//! [`Accumulators`] collects the expected-count numerators and denominators
//! over every training sequence of one iteration. Contributions are purely
//! additive, so the order sequences are visited in does not matter.

use cyanea_core::{CyaneaError, Result};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::buffer::BufferService;
use crate::matrix::{expect_shape, Matrix, MatrixView};
use crate::model::{HmmModel, SymbolSequence};

/// Expected-count sums for one Baum-Welch iteration.
#[derive(Debug, Clone)]
pub struct Accumulators {
    n_states: usize,
    n_symbols: usize,
    initial: Vec<f64>,
    a_num: Matrix,
    a_denom: Vec<f64>,
    b_num: Matrix,
    b_denom: Vec<f64>,
}

impl Accumulators {
    /// Zeroed accumulators for an `n_states × n_symbols` model.
    ///
    /// # Errors
    ///
    /// Returns [`CyaneaError::Allocation`] if a buffer cannot be obtained.
    pub fn new(n_states: usize, n_symbols: usize, buffers: &dyn BufferService) -> Result<Self> {
        Ok(Self {
            n_states,
            n_symbols,
            initial: buffers.allocate(n_states)?,
            a_num: buffers.allocate_matrix(n_states, n_states)?,
            a_denom: buffers.allocate(n_states)?,
            b_num: buffers.allocate_matrix(n_states, n_symbols)?,
            b_denom: buffers.allocate(n_states)?,
        })
    }

    /// Zero every sum.
    pub fn reset(&mut self) {
        self.initial.fill(0.0);
        self.a_num.as_mut_slice().fill(0.0);
        self.a_denom.fill(0.0);
        self.b_num.as_mut_slice().fill(0.0);
        self.b_denom.fill(0.0);
    }

    /// Add one sequence's posteriors.
    ///
    /// With `T = seq.len()`:
    /// - `a_num[i, j] += Σ_{t<T-1} xi[i·N + j, t]`
    /// - `a_denom[i] += Σ_{t<T-1} gamma[i, t]`
    /// - `b_num[i, oₜ] += gamma[i, t]` for every `t < T`
    /// - `b_denom[i] += Σ_{t<T} gamma[i, t]`
    ///
    /// The transition sums stop one step early because the last step has no
    /// outgoing transition; the emission sums include it.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence holds symbols outside the model or
    /// the posterior shapes do not match it.
    pub fn accumulate(
        &mut self,
        seq: &SymbolSequence,
        xi: MatrixView<'_>,
        gamma: MatrixView<'_>,
    ) -> Result<()> {
        let n = self.n_states;
        let len = seq.len();
        if len == 0 {
            return Err(CyaneaError::InvalidInput(format!(
                "sequence {} is empty",
                seq.id()
            )));
        }
        if let Some(&o) = seq.symbols().iter().find(|&&o| o >= self.n_symbols) {
            return Err(CyaneaError::InvalidInput(format!(
                "symbol {o} out of range (n_symbols = {})",
                self.n_symbols
            )));
        }
        expect_shape("gamma", gamma.shape(), (n, len))?;
        expect_shape("xi", xi.shape(), (n * n, len - 1))?;

        let obs = seq.symbols();
        let last = len - 1;
        let mut a_num = self.a_num.view_mut();
        let mut b_num = self.b_num.view_mut();

        let update =
            |i: usize, a_row: &mut [f64], b_row: &mut [f64], a_den: &mut f64, b_den: &mut f64| {
                for (j, a) in a_row.iter_mut().enumerate() {
                    *a += xi.row(i * n + j).iter().sum::<f64>();
                }
                let g = gamma.row(i);
                let mut partial = 0.0;
                for t in 0..last {
                    partial += g[t];
                    b_row[obs[t]] += g[t];
                }
                *a_den += partial;
                *b_den += partial + g[last];
                b_row[obs[last]] += g[last];
            };

        #[cfg(feature = "parallel")]
        {
            a_num
                .par_rows_mut()
                .zip(b_num.par_rows_mut())
                .zip(self.a_denom.par_iter_mut())
                .zip(self.b_denom.par_iter_mut())
                .enumerate()
                .for_each(|(i, (((a_row, b_row), a_den), b_den))| {
                    update(i, a_row, b_row, a_den, b_den)
                });
        }
        #[cfg(not(feature = "parallel"))]
        {
            let rows = a_num
                .rows_mut()
                .zip(b_num.rows_mut())
                .zip(self.a_denom.iter_mut())
                .zip(self.b_denom.iter_mut());
            for (i, (((a_row, b_row), a_den), b_den)) in rows.enumerate() {
                update(i, a_row, b_row, a_den, b_den);
            }
        }
        Ok(())
    }

    /// `initial[i] += gamma[i, 0]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `gamma` does not have one row per state and at
    /// least one column.
    pub fn accumulate_initial(&mut self, gamma: MatrixView<'_>) -> Result<()> {
        if gamma.rows() != self.n_states || gamma.cols() == 0 {
            return Err(CyaneaError::InvalidInput(format!(
                "gamma is {}x{}, expected {} rows and at least one column",
                gamma.rows(),
                gamma.cols(),
                self.n_states
            )));
        }
        for (i, acc) in self.initial.iter_mut().enumerate() {
            *acc += gamma.get(i, 0);
        }
        Ok(())
    }

    /// Overwrite `model`'s parameters with the accumulated estimates.
    ///
    /// The initial distribution becomes the normalized accumulated initial
    /// mass, `transition[i, j] = a_num[i, j] / a_denom[i]` and
    /// `emission[i, k] = b_num[i, k] / b_denom[i]`. A row whose denominator
    /// is zero or not finite keeps its previous values.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` has a different shape.
    pub fn apply(&self, model: &mut HmmModel) -> Result<()> {
        if model.n_states() != self.n_states || model.n_symbols() != self.n_symbols {
            return Err(CyaneaError::InvalidInput(format!(
                "accumulators are {}x{}, model is {}x{}",
                self.n_states,
                self.n_symbols,
                model.n_states(),
                model.n_symbols()
            )));
        }
        let (initial, transition, emission) = model.params_mut();

        let mass: f64 = self.initial.iter().sum();
        if usable(mass) {
            for (p, &acc) in initial.iter_mut().zip(&self.initial) {
                *p = acc / mass;
            }
        }
        update_rows(transition, self.a_num.view(), &self.a_denom);
        update_rows(emission, self.b_num.view(), &self.b_denom);
        Ok(())
    }

    /// Accumulated initial-state mass.
    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    /// Transition numerators, `N × N`.
    pub fn a_num(&self) -> MatrixView<'_> {
        self.a_num.view()
    }

    /// Transition denominators, one per state.
    pub fn a_denom(&self) -> &[f64] {
        &self.a_denom
    }

    /// Emission numerators, `N × K`.
    pub fn b_num(&self) -> MatrixView<'_> {
        self.b_num.view()
    }

    /// Emission denominators, one per state.
    pub fn b_denom(&self) -> &[f64] {
        &self.b_denom
    }
}

fn usable(denominator: f64) -> bool {
    denominator > 0.0 && denominator.is_finite()
}

fn update_rows(target: &mut [f64], numerators: MatrixView<'_>, denominators: &[f64]) {
    let width = numerators.cols();
    if width == 0 {
        return;
    }
    for ((row, num), &den) in target
        .chunks_mut(width)
        .zip(numerators.iter_rows())
        .zip(denominators)
    {
        if !usable(den) {
            continue;
        }
        for (p, &x) in row.iter_mut().zip(num) {
            *p = x / den;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HeapBuffers;
    use crate::testutil::{coin_hmm, seq};

    fn posteriors_for(model: &HmmModel, s: &SymbolSequence) -> (Matrix, Matrix) {
        use crate::backward::backward;
        use crate::forward::forward;
        use crate::posterior::{gamma_into, xi_into};

        let fwd = forward(model, s).unwrap();
        let mut bwd = backward(model, s).unwrap();
        bwd.rescale(&fwd.scale).unwrap();
        let n = model.n_states();
        let mut gamma = Matrix::zeros(n, s.len());
        let mut xi = Matrix::zeros(n * n, s.len() - 1);
        gamma_into(fwd.alpha.view(), bwd.beta.view(), &fwd.scale, gamma.view_mut()).unwrap();
        xi_into(model, s, fwd.alpha.view(), bwd.beta.view(), xi.view_mut()).unwrap();
        (xi, gamma)
    }

    #[test]
    fn sums_follow_asymmetric_ranges() {
        // 1 state: gamma and xi are all ones.
        let model = HmmModel::new(1, 2, vec![1.0], vec![1.0], vec![0.5, 0.5]).unwrap();
        let s = seq(&[0, 1, 1], 2);
        let (xi, gamma) = posteriors_for(&model, &s);
        let mut acc = Accumulators::new(1, 2, &HeapBuffers).unwrap();
        acc.accumulate(&s, xi.view(), gamma.view()).unwrap();
        assert!((acc.a_num().get(0, 0) - 2.0).abs() < 1e-12);
        assert!((acc.a_denom()[0] - 2.0).abs() < 1e-12);
        assert!((acc.b_denom()[0] - 3.0).abs() < 1e-12);
        assert!((acc.b_num().get(0, 0) - 1.0).abs() < 1e-12);
        assert!((acc.b_num().get(0, 1) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn sums_are_additive_and_resettable() {
        let model = coin_hmm();
        let s1 = seq(&[0, 1, 1, 0], 2);
        let s2 = seq(&[1, 1, 0], 2);
        let (xi1, g1) = posteriors_for(&model, &s1);
        let (xi2, g2) = posteriors_for(&model, &s2);

        let mut both = Accumulators::new(2, 2, &HeapBuffers).unwrap();
        both.accumulate(&s1, xi1.view(), g1.view()).unwrap();
        both.accumulate(&s2, xi2.view(), g2.view()).unwrap();

        let mut reversed = Accumulators::new(2, 2, &HeapBuffers).unwrap();
        reversed.accumulate(&s2, xi2.view(), g2.view()).unwrap();
        reversed.accumulate(&s1, xi1.view(), g1.view()).unwrap();
        for (a, b) in both.a_num().iter_rows().zip(reversed.a_num().iter_rows()) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-12);
            }
        }
        // Expected transitions out of a state equal its expected visits
        // before the last step.
        for i in 0..2 {
            let out: f64 = both.a_num().row(i).iter().sum();
            assert!((out - both.a_denom()[i]).abs() < 1e-10);
            let emitted: f64 = both.b_num().row(i).iter().sum();
            assert!((emitted - both.b_denom()[i]).abs() < 1e-10);
        }

        both.reset();
        assert!(both.a_denom().iter().all(|&x| x == 0.0));
        assert!(both.b_num().iter_rows().flatten().all(|&x| x == 0.0));
    }

    #[test]
    fn apply_produces_stochastic_rows() {
        let mut model = coin_hmm();
        let s = seq(&[0, 0, 1, 0, 1, 1, 0, 0], 2);
        let (xi, gamma) = posteriors_for(&model, &s);
        let mut acc = Accumulators::new(2, 2, &HeapBuffers).unwrap();
        acc.accumulate(&s, xi.view(), gamma.view()).unwrap();
        acc.accumulate_initial(gamma.view()).unwrap();
        acc.apply(&mut model).unwrap();

        let pi: f64 = model.initial().iter().sum();
        assert!((pi - 1.0).abs() < 1e-12);
        for row in model.transition().iter_rows().chain(model.emission().iter_rows()) {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn zero_denominator_keeps_row() {
        // Single-step sequences contribute nothing to the transition sums.
        let mut model = coin_hmm();
        let s = seq(&[0], 2);
        let (xi, gamma) = posteriors_for(&model, &s);
        let mut acc = Accumulators::new(2, 2, &HeapBuffers).unwrap();
        acc.accumulate(&s, xi.view(), gamma.view()).unwrap();
        acc.accumulate_initial(gamma.view()).unwrap();
        let before = model.transition().to_matrix();
        acc.apply(&mut model).unwrap();
        assert_eq!(model.transition().to_matrix(), before);
        assert_eq!(model.emission().get(0, 0), 1.0);
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let model = coin_hmm();
        let s = seq(&[0, 1], 2);
        let (xi, gamma) = posteriors_for(&model, &s);
        let mut acc = Accumulators::new(3, 2, &HeapBuffers).unwrap();
        assert!(acc.accumulate(&s, xi.view(), gamma.view()).is_err());
        assert!(acc.accumulate_initial(gamma.view()).is_err());
        let mut other = coin_hmm();
        assert!(acc.apply(&mut other).is_err());

        let mut narrow = Accumulators::new(2, 1, &HeapBuffers).unwrap();
        assert!(narrow.accumulate(&s, xi.view(), gamma.view()).is_err());
    }
}
