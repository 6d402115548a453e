//! Synthetic models and sequences.
//!
//! Seeded generators for benchmarks and tests, plus the exact-match model: a
//! left-to-right chain that emits one given sequence with probability one.

use cyanea_core::{CyaneaError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::matrix::MatrixViewMut;
use crate::model::{HmmModel, SymbolSequence};
use crate::numeric::{normalize, normalize_rows};

/// A chain model that emits `seq` with probability one.
///
/// State `t` emits `seq[t]` and moves to state `t + 1`; the last state loops
/// on itself. The model has one state per time step and one symbol per
/// letter of the sequence's alphabet, and carries the sequence's id.
///
/// # Errors
///
/// Returns an error if the sequence is empty.
pub fn exact_match_model(seq: &SymbolSequence) -> Result<HmmModel> {
    let n = seq.len();
    if n == 0 {
        return Err(CyaneaError::InvalidInput(
            "cannot build an exact-match model for an empty sequence".into(),
        ));
    }
    let k = seq.cardinality();

    let mut initial = vec![0.0; n];
    initial[0] = 1.0;
    let mut transition = vec![0.0; n * n];
    for t in 0..n - 1 {
        transition[t * n + t + 1] = 1.0;
    }
    transition[n * n - 1] = 1.0;
    let mut emission = vec![0.0; n * k];
    for (t, &o) in seq.symbols().iter().enumerate() {
        emission[t * k + o] = 1.0;
    }

    Ok(HmmModel::new(n, k, initial, transition, emission)?.with_id(seq.id()))
}

/// Random weight in `(0, 1]`, drawn as `1 / u` with `u` uniform on `1..=spread`.
fn weight(rng: &mut StdRng, spread: usize) -> f64 {
    1.0 / rng.gen_range(1..=spread) as f64
}

/// `count` random `n_states × n_symbols` models with ids `0..count`.
///
/// Every entry is strictly positive. The same seed yields the same models.
///
/// # Errors
///
/// Returns an error if `n_states` or `n_symbols` is zero.
pub fn random_models(
    count: usize,
    n_states: usize,
    n_symbols: usize,
    seed: u64,
) -> Result<Vec<HmmModel>> {
    if n_states == 0 || n_symbols == 0 {
        return Err(CyaneaError::InvalidInput(
            "n_states and n_symbols must be > 0".into(),
        ));
    }
    let spread = n_states.saturating_mul(n_symbols);
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| -> Result<HmmModel> {
            let mut initial: Vec<f64> = (0..n_states).map(|_| weight(&mut rng, spread)).collect();
            let mut transition: Vec<f64> = (0..n_states * n_states)
                .map(|_| weight(&mut rng, spread))
                .collect();
            let mut emission: Vec<f64> = (0..n_states * n_symbols)
                .map(|_| weight(&mut rng, spread))
                .collect();
            normalize(&mut initial);
            normalize_rows(&mut MatrixViewMut::new(&mut transition, n_states, n_states)?);
            normalize_rows(&mut MatrixViewMut::new(&mut emission, n_states, n_symbols)?);
            Ok(HmmModel::new(n_states, n_symbols, initial, transition, emission)?
                .with_id(id as u64))
        })
        .collect()
}

/// `count` uniform random sequences of `length` symbols from
/// `0..cardinality`, with ids `0..count`.
///
/// # Errors
///
/// Returns an error if `cardinality` or `length` is zero.
pub fn random_sequences(
    count: usize,
    cardinality: usize,
    length: usize,
    seed: u64,
) -> Result<Vec<SymbolSequence>> {
    if cardinality == 0 || length == 0 {
        return Err(CyaneaError::InvalidInput(
            "cardinality and length must be > 0".into(),
        ));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| {
            let symbols = (0..length).map(|_| rng.gen_range(0..cardinality)).collect();
            SymbolSequence::new(id as u64, cardinality, symbols)
        })
        .collect()
}
