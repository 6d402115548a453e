//! Shared fixtures and brute-force references for unit tests.

use proptest::prelude::*;

use crate::model::{HmmModel, SymbolSequence};

/// 2-state fair/loaded coin HMM.
pub(crate) fn coin_hmm() -> HmmModel {
    let initial = vec![0.5, 0.5];
    let transition = vec![
        0.9, 0.1, // fair -> fair, loaded
        0.2, 0.8, // loaded -> fair, loaded
    ];
    let emission = vec![
        0.5, 0.5, // fair:   P(H), P(T)
        0.8, 0.2, // loaded: P(H), P(T)
    ];
    HmmModel::new(2, 2, initial, transition, emission).unwrap()
}

/// 2-state "occasionally dishonest casino" with a 6-sided die.
pub(crate) fn casino_hmm() -> HmmModel {
    let initial = vec![0.5, 0.5];
    let transition = vec![
        0.95, 0.05, // fair -> fair, loaded
        0.10, 0.90, // loaded -> fair, loaded
    ];
    let mut emission = vec![1.0 / 6.0; 2 * 6];
    // Loaded die: heavily biased toward 6 (symbol index 5)
    emission[6..12].copy_from_slice(&[0.1, 0.1, 0.1, 0.1, 0.1, 0.5]);
    HmmModel::new(2, 6, initial, transition, emission).unwrap()
}

pub(crate) fn seq(symbols: &[usize], cardinality: usize) -> SymbolSequence {
    SymbolSequence::new(0, cardinality, symbols.to_vec()).unwrap()
}

/// Probability of one state path jointly with the observations.
pub(crate) fn path_probability(model: &HmmModel, path: &[usize], obs: &[usize]) -> f64 {
    let a = model.transition();
    let b = model.emission();
    let mut p = model.initial()[path[0]] * b.get(path[0], obs[0]);
    for t in 1..obs.len() {
        p *= a.get(path[t - 1], path[t]) * b.get(path[t], obs[t]);
    }
    p
}

/// Every state path of length `len` over `n` states, in lexicographic order.
pub(crate) fn all_paths(n: usize, len: usize) -> Vec<Vec<usize>> {
    let mut paths = vec![Vec::new()];
    for _ in 0..len {
        paths = paths
            .into_iter()
            .flat_map(|p| {
                (0..n).map(move |s| {
                    let mut q = p.clone();
                    q.push(s);
                    q
                })
            })
            .collect();
    }
    paths
}

/// Log-likelihood by summing every path explicitly.
pub(crate) fn brute_force_log_likelihood(model: &HmmModel, obs: &[usize]) -> f64 {
    all_paths(model.n_states(), obs.len())
        .iter()
        .map(|p| path_probability(model, p, obs))
        .sum::<f64>()
        .ln()
}

fn stochastic_rows(rows: usize, cols: usize) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(0.05f64..1.0, rows * cols).prop_map(move |mut v| {
        for row in v.chunks_mut(cols) {
            let s: f64 = row.iter().sum();
            row.iter_mut().for_each(|x| *x /= s);
        }
        v
    })
}

/// Random strictly-positive model with `n` states and `k` symbols.
pub(crate) fn model_strategy(n: usize, k: usize) -> impl Strategy<Value = HmmModel> {
    (stochastic_rows(1, n), stochastic_rows(n, n), stochastic_rows(n, k))
        .prop_map(move |(pi, a, b)| HmmModel::new(n, k, pi, a, b).unwrap())
}

/// Random model of 1..=`max_n` states and 1..=`max_k` symbols plus an
/// observation sequence of 1..=`max_t` steps it can emit.
pub(crate) fn model_and_sequence(
    max_n: usize,
    max_k: usize,
    max_t: usize,
) -> impl Strategy<Value = (HmmModel, SymbolSequence)> {
    (1..=max_n, 1..=max_k, 1..=max_t).prop_flat_map(|(n, k, t)| {
        (
            model_strategy(n, k),
            proptest::collection::vec(0..k, t)
                .prop_map(move |s| SymbolSequence::new(0, k, s).unwrap()),
        )
    })
}
