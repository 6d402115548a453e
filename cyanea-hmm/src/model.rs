//! Discrete hidden Markov models and symbol sequences.
//!
//! [`HmmModel`] stores its parameters in probability space as flat row-major
//! tables. [`LogHmmModel`] is the log-space copy required by Viterbi
//! decoding; it can only be obtained from [`HmmModel::to_log_space`], so the
//! "parameters must already be logarithms" precondition is carried by the
//! type rather than by convention.

use cyanea_core::{CyaneaError, Result, Summarizable};

use crate::matrix::MatrixView;
use crate::numeric::log_transform;

/// Tolerance for probability rows summing to one.
const SUM_TOLERANCE: f64 = 1e-6;

fn check_stochastic(name: &str, values: &[f64], width: usize) -> Result<()> {
    for (r, row) in values.chunks(width).enumerate() {
        if row
            .iter()
            .any(|&p| !(-SUM_TOLERANCE..=1.0 + SUM_TOLERANCE).contains(&p))
        {
            return Err(CyaneaError::InvalidInput(format!(
                "{name} row {r} contains a value outside [0, 1]"
            )));
        }
        let row_sum: f64 = row.iter().sum();
        if (row_sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(CyaneaError::InvalidInput(format!(
                "{name} row {r} sums to {row_sum}, expected ~1.0"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// HmmModel
// ---------------------------------------------------------------------------

/// A discrete Hidden Markov Model.
///
/// With the `serde` feature, deserialization goes through [`HmmModel::new`],
/// so a decoded model has the same shape and stochasticity guarantees as a
/// constructed one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "HmmModelRecord")
)]
pub struct HmmModel {
    /// Identifying tag.
    id: u64,
    /// Number of hidden states.
    n_states: usize,
    /// Number of observable symbols.
    n_symbols: usize,
    /// Initial state probabilities pi[i] (length `n_states`).
    initial: Vec<f64>,
    /// Transition matrix A[i][j] = P(state_j | state_i), row-major
    /// `n_states * n_states`.
    transition: Vec<f64>,
    /// Emission matrix B[j][k] = P(symbol_k | state_j), row-major
    /// `n_states * n_symbols`.
    emission: Vec<f64>,
    /// Last computed log-likelihood (0.0 until first evaluated by training).
    prior: f64,
}

impl HmmModel {
    /// Create a new HMM after validating dimensions and probability constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `n_states` or `n_symbols` is zero
    /// - Vector dimensions do not match the declared sizes
    /// - Any probability row does not sum to approximately 1.0 (tolerance 1e-6)
    pub fn new(
        n_states: usize,
        n_symbols: usize,
        initial: Vec<f64>,
        transition: Vec<f64>,
        emission: Vec<f64>,
    ) -> Result<Self> {
        if n_states == 0 {
            return Err(CyaneaError::InvalidInput("n_states must be > 0".into()));
        }
        if n_symbols == 0 {
            return Err(CyaneaError::InvalidInput("n_symbols must be > 0".into()));
        }
        if initial.len() != n_states {
            return Err(CyaneaError::InvalidInput(format!(
                "initial length {} != n_states {}",
                initial.len(),
                n_states
            )));
        }
        let n_trans = n_states.checked_mul(n_states).ok_or_else(|| {
            CyaneaError::InvalidInput(format!("n_states {n_states} too large"))
        })?;
        if transition.len() != n_trans {
            return Err(CyaneaError::InvalidInput(format!(
                "transition length {} != n_states*n_states {}",
                transition.len(),
                n_trans
            )));
        }
        let n_emit = n_states.checked_mul(n_symbols).ok_or_else(|| {
            CyaneaError::InvalidInput(format!(
                "n_states {n_states} * n_symbols {n_symbols} too large"
            ))
        })?;
        if emission.len() != n_emit {
            return Err(CyaneaError::InvalidInput(format!(
                "emission length {} != n_states*n_symbols {}",
                emission.len(),
                n_emit
            )));
        }

        check_stochastic("initial", &initial, n_states)?;
        check_stochastic("transition", &transition, n_states)?;
        check_stochastic("emission", &emission, n_symbols)?;

        Ok(Self {
            id: 0,
            n_states,
            n_symbols,
            initial,
            transition,
            emission,
            prior: 0.0,
        })
    }

    /// Set the identifying tag.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Set the stored log-likelihood.
    pub fn with_prior(mut self, prior: f64) -> Self {
        self.prior = prior;
        self
    }

    /// Identifying tag.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of hidden states.
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Number of observable symbols.
    pub fn n_symbols(&self) -> usize {
        self.n_symbols
    }

    /// Last log-likelihood computed by training (0.0 if never trained).
    pub fn prior(&self) -> f64 {
        self.prior
    }

    pub(crate) fn set_prior(&mut self, prior: f64) {
        self.prior = prior;
    }

    /// Initial state distribution.
    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    /// Transition table as an `n_states × n_states` view.
    pub fn transition(&self) -> MatrixView<'_> {
        MatrixView::rows_of(&self.transition, self.n_states)
    }

    /// Emission table as an `n_states × n_symbols` view.
    pub fn emission(&self) -> MatrixView<'_> {
        MatrixView::rows_of(&self.emission, self.n_symbols)
    }

    /// Mutable access to `(initial, transition, emission)` for re-estimation.
    pub(crate) fn params_mut(&mut self) -> (&mut [f64], &mut [f64], &mut [f64]) {
        (&mut self.initial, &mut self.transition, &mut self.emission)
    }

    /// Check that every symbol of `seq` is emitted by this model and that the
    /// sequence is non-empty.
    ///
    /// # Errors
    ///
    /// Returns an error for empty sequences or out-of-range symbols.
    pub fn validate_sequence(&self, seq: &SymbolSequence) -> Result<()> {
        validate_symbols(seq, self.n_symbols)
    }

    /// Log-space copy of this model for Viterbi decoding.
    ///
    /// Probabilities below machine epsilon map to `-f64::MAX`.
    pub fn to_log_space(&self) -> LogHmmModel {
        let mut initial = self.initial.clone();
        let mut transition = self.transition.clone();
        let mut emission = self.emission.clone();
        log_transform(&mut initial);
        log_transform(&mut transition);
        log_transform(&mut emission);
        LogHmmModel {
            id: self.id,
            n_states: self.n_states,
            n_symbols: self.n_symbols,
            initial,
            transition,
            emission,
        }
    }
}

/// Unvalidated field layout of a serialized [`HmmModel`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct HmmModelRecord {
    id: u64,
    n_states: usize,
    n_symbols: usize,
    initial: Vec<f64>,
    transition: Vec<f64>,
    emission: Vec<f64>,
    prior: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<HmmModelRecord> for HmmModel {
    type Error = CyaneaError;

    fn try_from(record: HmmModelRecord) -> Result<Self> {
        Ok(HmmModel::new(
            record.n_states,
            record.n_symbols,
            record.initial,
            record.transition,
            record.emission,
        )?
        .with_id(record.id)
        .with_prior(record.prior))
    }
}

impl Summarizable for HmmModel {
    fn summary(&self) -> String {
        format!(
            "HMM #{}: {} states, {} symbols, log-likelihood {:.6}",
            self.id, self.n_states, self.n_symbols, self.prior
        )
    }
}

fn validate_symbols(seq: &SymbolSequence, n_symbols: usize) -> Result<()> {
    if seq.is_empty() {
        return Err(CyaneaError::InvalidInput(format!(
            "sequence {} is empty",
            seq.id()
        )));
    }
    for (t, &o) in seq.symbols().iter().enumerate() {
        if o >= n_symbols {
            return Err(CyaneaError::InvalidInput(format!(
                "sequence {}: symbol[{t}] = {o} out of range (n_symbols = {n_symbols})",
                seq.id()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LogHmmModel
// ---------------------------------------------------------------------------

/// An [`HmmModel`] with every parameter replaced by its (floored) logarithm.
#[derive(Debug, Clone, PartialEq)]
pub struct LogHmmModel {
    id: u64,
    n_states: usize,
    n_symbols: usize,
    initial: Vec<f64>,
    transition: Vec<f64>,
    emission: Vec<f64>,
}

impl LogHmmModel {
    /// Identifying tag of the source model.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of hidden states.
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Number of observable symbols.
    pub fn n_symbols(&self) -> usize {
        self.n_symbols
    }

    /// `ln pi[i]`.
    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    /// `ln A` as an `n_states × n_states` view.
    pub fn transition(&self) -> MatrixView<'_> {
        MatrixView::rows_of(&self.transition, self.n_states)
    }

    /// `ln B` as an `n_states × n_symbols` view.
    pub fn emission(&self) -> MatrixView<'_> {
        MatrixView::rows_of(&self.emission, self.n_symbols)
    }

    /// See [`HmmModel::validate_sequence`].
    ///
    /// # Errors
    ///
    /// Returns an error for empty sequences or out-of-range symbols.
    pub fn validate_sequence(&self, seq: &SymbolSequence) -> Result<()> {
        validate_symbols(seq, self.n_symbols)
    }
}

// ---------------------------------------------------------------------------
// SymbolSequence
// ---------------------------------------------------------------------------

/// An ordered list of symbol indices drawn from `0..cardinality`.
///
/// Used both for observations and for decoded state paths (where the
/// cardinality is the model's state count).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "SymbolSequenceRecord")
)]
pub struct SymbolSequence {
    id: u64,
    cardinality: usize,
    symbols: Vec<usize>,
}

impl SymbolSequence {
    /// Create a sequence, checking every symbol against `cardinality`.
    ///
    /// # Errors
    ///
    /// Returns an error if `cardinality` is zero, `symbols` is empty, or any
    /// symbol is `>= cardinality`.
    pub fn new(id: u64, cardinality: usize, symbols: Vec<usize>) -> Result<Self> {
        if cardinality == 0 {
            return Err(CyaneaError::InvalidInput("cardinality must be > 0".into()));
        }
        if symbols.is_empty() {
            return Err(CyaneaError::InvalidInput(format!(
                "sequence {id} has no symbols"
            )));
        }
        if let Some(t) = symbols.iter().position(|&s| s >= cardinality) {
            return Err(CyaneaError::InvalidInput(format!(
                "sequence {id}: symbol[{t}] = {} >= cardinality {cardinality}",
                symbols[t]
            )));
        }
        Ok(Self {
            id,
            cardinality,
            symbols,
        })
    }

    /// Identifying tag.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Alphabet size.
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// The symbols.
    pub fn symbols(&self) -> &[usize] {
        &self.symbols
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the sequence has no time steps.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct SymbolSequenceRecord {
    id: u64,
    cardinality: usize,
    symbols: Vec<usize>,
}

#[cfg(feature = "serde")]
impl TryFrom<SymbolSequenceRecord> for SymbolSequence {
    type Error = CyaneaError;

    fn try_from(record: SymbolSequenceRecord) -> Result<Self> {
        SymbolSequence::new(record.id, record.cardinality, record.symbols)
    }
}

impl Summarizable for SymbolSequence {
    fn summary(&self) -> String {
        format!(
            "sequence #{}: {} steps over {} symbols",
            self.id,
            self.symbols.len(),
            self.cardinality
        )
    }
}
