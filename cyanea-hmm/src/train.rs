//! Baum-Welch (EM) training over a set of observation sequences.
//!
//! One iteration runs, for every sequence in turn, the forward and backward
//! passes (as two concurrent tasks with the `parallel` feature), rescales
//! beta, derives gamma and xi, and adds the sequence's expected counts to
//! shared accumulators. The summed log-likelihood then decides whether to
//! stop or to overwrite the model with the re-estimated parameters.

use cyanea_core::prob::PRECISION;
use cyanea_core::{CyaneaError, Result};
use tracing::{debug, info, trace, warn};

use crate::backward::{backward_into, rescale_backward};
use crate::buffer::{check_dimensions, BufferService, HeapBuffers};
use crate::config::BaumWelchConfig;
use crate::forward::forward_into;
use crate::matrix::Matrix;
use crate::model::{HmmModel, SymbolSequence};
use crate::numeric::log_prob_distance;
use crate::posterior::{gamma_into, xi_into};
use crate::reestimate::Accumulators;

/// Where a trainer is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrainState {
    /// Training is running (or has not started).
    Iterating,
    /// The log-likelihood stopped moving, or reached certainty.
    Converged,
    /// `max_steps` iterations ran without convergence. Not an error.
    Diverged,
    /// Training stopped on an error; the model may hold a partial update.
    Failed,
}

/// Outcome of a training run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainReport {
    /// Number of parameter updates applied to the model.
    pub steps: usize,
    /// Final state (`Converged` or `Diverged`).
    pub state: TrainState,
    /// Summed log-likelihood of the last E-step.
    pub log_likelihood: f64,
    /// Summed log-likelihood of every E-step, in order.
    pub history: Vec<f64>,
}

/// Working memory for one training run, sized for the longest sequence.
struct Scratch {
    alpha: Matrix,
    beta: Matrix,
    gamma: Matrix,
    xi: Matrix,
    scale_alpha: Vec<f64>,
    scale_beta: Vec<f64>,
    acc: Accumulators,
}

impl Scratch {
    fn new(model: &HmmModel, max_len: usize, buffers: &dyn BufferService) -> Result<Self> {
        let n = model.n_states();
        Ok(Self {
            alpha: buffers.allocate_matrix(max_len, n)?,
            beta: buffers.allocate_matrix(max_len, n)?,
            gamma: buffers.allocate_matrix(n, max_len)?,
            xi: buffers.allocate_matrix(n * n, max_len - 1)?,
            scale_alpha: buffers.allocate(max_len)?,
            scale_beta: buffers.allocate(max_len)?,
            acc: Accumulators::new(n, model.n_symbols(), buffers)?,
        })
    }

    /// Add one sequence's expected counts and return its log-likelihood.
    fn accumulate(&mut self, model: &HmmModel, seq: &SymbolSequence) -> Result<f64> {
        let n = model.n_states();
        let len = seq.len();
        let Self {
            alpha,
            beta,
            gamma,
            xi,
            scale_alpha,
            scale_beta,
            acc,
        } = self;

        let run_forward = |alpha: &mut Matrix, scale: &mut [f64]| {
            alpha
                .shaped_mut(len, n)
                .and_then(|view| forward_into(model, seq, view, scale))
        };
        let run_backward = |beta: &mut Matrix, scale: &mut [f64]| {
            beta.shaped_mut(len, n)
                .and_then(|view| backward_into(model, seq, view, scale))
        };
        #[cfg(feature = "parallel")]
        let (ll, backward) = rayon::join(
            || run_forward(alpha, &mut scale_alpha[..]),
            || run_backward(beta, &mut scale_beta[..]),
        );
        #[cfg(not(feature = "parallel"))]
        let (ll, backward) = (
            run_forward(alpha, &mut scale_alpha[..]),
            run_backward(beta, &mut scale_beta[..]),
        );
        let ll = ll?;
        backward?;

        rescale_backward(beta.shaped_mut(len, n)?, &scale_alpha[..], &scale_beta[..])?;
        gamma_into(
            alpha.shaped(len, n)?,
            beta.shaped(len, n)?,
            &scale_alpha[..],
            gamma.shaped_mut(n, len)?,
        )?;
        xi_into(
            model,
            seq,
            alpha.shaped(len, n)?,
            beta.shaped(len, n)?,
            xi.shaped_mut(n * n, len - 1)?,
        )?;
        acc.accumulate(seq, xi.shaped(n * n, len - 1)?, gamma.shaped(n, len)?)?;
        acc.accumulate_initial(gamma.shaped(n, len)?)?;
        trace!(seq = seq.id(), log_likelihood = ll, "accumulated sequence");
        Ok(ll)
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Baum-Welch trainer.
///
/// Holds the configuration and the state of the most recent run.
#[derive(Debug, Clone)]
pub struct BaumWelch {
    config: BaumWelchConfig,
    state: TrainState,
}

impl BaumWelch {
    /// A trainer that has not run yet.
    pub fn new(config: BaumWelchConfig) -> Self {
        Self {
            config,
            state: TrainState::Iterating,
        }
    }

    /// The trainer configuration.
    pub fn config(&self) -> &BaumWelchConfig {
        &self.config
    }

    /// State reached by the most recent run.
    pub fn state(&self) -> TrainState {
        self.state
    }

    /// Train `model` in place on heap buffers.
    ///
    /// # Errors
    ///
    /// See [`BaumWelch::train_with`].
    pub fn train(
        &mut self,
        model: &mut HmmModel,
        sequences: &[SymbolSequence],
    ) -> Result<TrainReport> {
        self.train_with(model, sequences, &HeapBuffers)
    }

    /// Train `model` in place, taking scratch from `buffers`.
    ///
    /// On success the model holds the last applied update and its `prior`
    /// holds the last log-likelihood (0.0 if it reached certainty).
    ///
    /// # Errors
    ///
    /// - [`CyaneaError::InvalidInput`] for an empty sequence list, an empty
    ///   sequence, a symbol the model cannot emit, or a bad configuration.
    /// - [`CyaneaError::Overflow`] if alpha/beta/gamma or xi for the longest
    ///   sequence cannot be addressed.
    /// - [`CyaneaError::Allocation`] if scratch cannot be obtained.
    /// - [`CyaneaError::Other`] if the worker pool cannot be built
    ///   (`parallel` feature).
    ///
    /// Every error leaves the trainer in [`TrainState::Failed`].
    pub fn train_with(
        &mut self,
        model: &mut HmmModel,
        sequences: &[SymbolSequence],
        buffers: &dyn BufferService,
    ) -> Result<TrainReport> {
        self.state = TrainState::Iterating;
        let result = self.run(model, sequences, buffers);
        match &result {
            Ok(report) => {
                self.state = report.state;
                info!(
                    model = model.id(),
                    steps = report.steps,
                    state = ?report.state,
                    log_likelihood = report.log_likelihood,
                    "baum-welch finished"
                );
            }
            Err(e) => {
                self.state = TrainState::Failed;
                warn!(model = model.id(), error = %e, "baum-welch failed");
            }
        }
        result
    }

    fn run(
        &self,
        model: &mut HmmModel,
        sequences: &[SymbolSequence],
        buffers: &dyn BufferService,
    ) -> Result<TrainReport> {
        self.config.validate()?;
        if sequences.is_empty() {
            return Err(CyaneaError::InvalidInput("no training sequences".into()));
        }
        for seq in sequences {
            model.validate_sequence(seq)?;
        }
        let max_len = sequences.iter().map(SymbolSequence::len).max().unwrap_or(0);
        check_dimensions(model.n_states(), max_len)?;

        let mut scratch = Scratch::new(model, max_len, buffers)?;

        #[cfg(feature = "parallel")]
        {
            let pool = self.config.parallel.thread_pool()?;
            debug!(
                model = model.id(),
                sequences = sequences.len(),
                max_len,
                workers = pool.current_num_threads(),
                "baum-welch start"
            );
            pool.install(|| self.iterate(model, sequences, &mut scratch))
        }
        #[cfg(not(feature = "parallel"))]
        {
            debug!(
                model = model.id(),
                sequences = sequences.len(),
                max_len,
                workers = 1,
                "baum-welch start"
            );
            self.iterate(model, sequences, &mut scratch)
        }
    }

    fn iterate(
        &self,
        model: &mut HmmModel,
        sequences: &[SymbolSequence],
        scratch: &mut Scratch,
    ) -> Result<TrainReport> {
        let mut report = TrainReport {
            steps: 0,
            state: TrainState::Iterating,
            log_likelihood: model.prior(),
            history: Vec::new(),
        };

        for step in 0..self.config.max_steps {
            scratch.acc.reset();
            let mut ll = 0.0;
            for seq in sequences {
                ll += scratch.accumulate(model, seq)?;
            }
            report.log_likelihood = ll;
            report.history.push(ll);

            let distance = log_prob_distance(model.prior(), ll);
            debug!(step, log_likelihood = ll, distance, "baum-welch iteration");
            model.set_prior(ll);
            if distance < self.config.threshold {
                report.state = TrainState::Converged;
                break;
            }
            if ll > -PRECISION {
                model.set_prior(0.0);
                report.state = TrainState::Converged;
                break;
            }
            scratch.acc.apply(model)?;
            report.steps += 1;
        }

        if report.state == TrainState::Iterating {
            report.state = TrainState::Diverged;
        }
        Ok(report)
    }
}

/// Train `model` in place with a fresh [`BaumWelch`] trainer.
///
/// # Errors
///
/// See [`BaumWelch::train_with`].
pub fn baum_welch(
    model: &mut HmmModel,
    sequences: &[SymbolSequence],
    config: &BaumWelchConfig,
) -> Result<TrainReport> {
    BaumWelch::new(config.clone()).train(model, sequences)
}
