//! Vector arithmetic for embeddings.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Order-stable mean of a group of vectors
//! - Weighted blend of two vectors

use std::cmp::Ordering;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ, either vector is empty, or either has
/// zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    ((dot / denom) as f32).clamp(-1.0, 1.0)
}

/// Total order over vectors by their raw bit patterns.
fn cmp_bits(a: &[f32], b: &[f32]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

/// Arithmetic mean of equally sized vectors.
///
/// Inputs are summed in a canonical order so that any permutation of the
/// same vectors produces a bit-identical result. Returns `None` for an empty
/// input or mismatched lengths.
pub fn mean(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut ordered: Vec<&[f32]> = vectors.to_vec();
    ordered.sort_by(|a, b| cmp_bits(a, b));

    let mut sum = vec![0.0f64; dim];
    for v in &ordered {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += *x as f64;
        }
    }

    let n = ordered.len() as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}

/// `wa·a + wb·b`, or `None` if the lengths differ.
pub fn blend(a: &[f32], wa: f32, b: &[f32], wb: f32) -> Option<Vec<f32>> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (wa as f64 * *x as f64 + wb as f64 * *y as f64) as f32)
            .collect(),
    )
}

/// Rank named vectors by cosine similarity to `query`.
///
/// Sorted by similarity descending, ties broken by name ascending.
pub fn rank_by_similarity<'a, I>(query: &[f32], candidates: I) -> Vec<(String, f32)>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut ranked: Vec<(String, f32)> = candidates
        .into_iter()
        .map(|(name, v)| (name.to_string(), cosine_similarity(query, v)))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}
