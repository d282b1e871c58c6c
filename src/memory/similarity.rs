//! Cosine similarity and top-k selection shared by every backend.

/// Cosine similarity in `[-1, 1]`.
///
/// Vectors of different length, empty vectors, zero vectors, and vectors with
/// non-finite components score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !score.is_finite() {
        return 0.0;
    }
    score.clamp(-1.0, 1.0)
}

/// `true` if every component is a finite number.
pub fn is_finite_vector(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// A candidate text with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredText {
    pub text: String,
    pub score: f64,
}

/// Rank candidates by descending score and keep at most `k`.
///
/// Candidates must arrive in insertion order; equal scores keep that order.
/// When `min_similarity` is set, anything below it is dropped before truncation.
/// A NaN score ranks below every number.
pub fn select_top(
    mut candidates: Vec<ScoredText>,
    k: usize,
    min_similarity: Option<f64>,
) -> Vec<ScoredText> {
    if let Some(floor) = min_similarity {
        candidates.retain(|c| c.score >= floor);
    }
    // Stable sort: ties stay in insertion order.
    candidates.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
    candidates.truncate(k);
    candidates
}

fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}
