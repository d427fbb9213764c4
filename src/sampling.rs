//! Pure numeric helpers behind cluster sampling.
//!
//! - `reduce_score`: collapse a per-test score map to one scalar fitness
//! - `softmax`: temperature-scaled probability vector, max-subtracted for
//!   numerical stability
//! - `random_weighted_index`: cumulative-sum draw from a probability vector

use std::collections::BTreeMap;

use rand::Rng;

/// Collapse a per-test score map to a single scalar fitness.
///
/// Uses the arithmetic mean of the per-test values. An empty map reduces to
/// 0.0; every program evaluated against an empty battery lands in the same
/// degenerate cluster, so the constant only has to be consistent.
pub fn reduce_score(scores_per_test: &BTreeMap<String, f64>) -> f64 {
    if scores_per_test.is_empty() {
        return 0.0;
    }
    scores_per_test.values().sum::<f64>() / scores_per_test.len() as f64
}

/// Temperature-scaled softmax over a score vector.
///
/// Computes `exp((s_i - max) / temperature)` normalized to sum to 1. The
/// maximum is subtracted first so large scores cannot overflow `exp`.
///
/// `temperature <= 0` is the greedy limit: the mass is split uniformly
/// across all indices achieving the maximum score, never dividing by the
/// temperature.
pub fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if temperature <= 0.0 {
        let num_maxima = scores.iter().filter(|&&s| s == max).count();
        return scores
            .iter()
            .map(|&s| if s == max { 1.0 / num_maxima as f64 } else { 0.0 })
            .collect();
    }

    let exps: Vec<f64> = scores
        .iter()
        .map(|&s| ((s - max) / temperature).exp())
        .collect();
    let total: f64 = exps.iter().sum();

    exps.into_iter().map(|e| e / total).collect()
}

/// Draw an index from a probability vector.
///
/// Draws `u` uniformly in `[0, 1)` and returns the first index whose
/// cumulative probability exceeds `u`. Rounding can leave the cumulative
/// sum a hair below 1.0, so the final index is returned as a fallback and
/// is therefore always reachable.
pub fn random_weighted_index(probabilities: &[f64], rng: &mut impl Rng) -> usize {
    assert!(
        !probabilities.is_empty(),
        "probability vector must not be empty"
    );
    assert!(
        probabilities.iter().any(|&p| p > 0.0),
        "probability vector must carry positive mass"
    );

    let u: f64 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    for (i, &p) in probabilities.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return i;
        }
    }

    probabilities.len() - 1
}
