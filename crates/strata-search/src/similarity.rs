//! Pairwise candidate similarity for redundancy penalties.
//!
//! Cosine similarity over embeddings when both candidates carry one of the
//! same dimension; otherwise a bounded lexical proxy: Jaccard overlap of
//! hashed word tokens. Both are mapped into `[0,1]`.

use std::collections::HashSet;

use strata_core::Candidate;

/// Cosine similarity clamped to `[0,1]`; `None` on dimension mismatch or zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let a_norm: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let b_norm: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if a_norm == 0.0 || b_norm == 0.0 {
        return None;
    }

    let sim = dot_product / (a_norm * b_norm);
    sim.is_finite().then(|| sim.clamp(0.0, 1.0))
}

/// Hashed word tokens of `text`, lowercased, single characters dropped.
pub fn token_signature(text: &str) -> HashSet<u64> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| {
            let digest = blake3::hash(t.to_lowercase().as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest.as_bytes()[..8]);
            u64::from_le_bytes(head)
        })
        .collect()
}

/// Jaccard overlap of two signatures; two empty signatures share nothing.
pub fn jaccard(a: &HashSet<u64>, b: &HashSet<u64>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Symmetric `n × n` similarity table with unit diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    n: usize,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    /// Compute all pairs for `candidates`.
    pub fn build<'a>(candidates: impl IntoIterator<Item = &'a Candidate>) -> Self {
        let candidates: Vec<&Candidate> = candidates.into_iter().collect();
        let n = candidates.len();
        let signatures: Vec<HashSet<u64>> =
            candidates.iter().map(|c| token_signature(&c.text())).collect();

        let mut values = vec![0.0; n * n];
        for i in 0..n {
            values[i * n + i] = 1.0;
            for j in (i + 1)..n {
                let sim = pair_similarity(candidates[i], candidates[j], &signatures[i], &signatures[j]);
                values[i * n + j] = sim;
                values[j * n + i] = sim;
            }
        }

        Self { n, values }
    }

    /// Build from explicit values (row-major). Used by tests and callers
    /// that bring their own similarity.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let n = rows.len();
        let values = rows
            .into_iter()
            .flat_map(|row| {
                let mut row: Vec<f64> = row.into_iter().map(crate::calibration::clamp01).collect();
                row.resize(n, 0.0);
                row
            })
            .collect();
        Self { n, values }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }
}

fn pair_similarity(a: &Candidate, b: &Candidate, sig_a: &HashSet<u64>, sig_b: &HashSet<u64>) -> f64 {
    if a.id == b.id {
        return 1.0;
    }
    if let (Some(ea), Some(eb)) = (&a.embedding, &b.embedding) {
        if let Some(sim) = cosine_similarity(ea, eb) {
            return sim;
        }
    }
    jaccard(sig_a, sig_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        // Negative similarity is clamped.
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_cosine_similarity_rejects_mismatch_and_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn test_token_signature_is_case_insensitive() {
        assert_eq!(token_signature("Rust Ownership"), token_signature("rust ownership!"));
        assert!(token_signature("a b c").is_empty());
    }

    #[test]
    fn test_jaccard_bounds() {
        let a = token_signature("rust borrow checker");
        let b = token_signature("rust borrow checker");
        let c = token_signature("python garbage collector");
        assert_eq!(jaccard(&a, &b), 1.0);
        assert_eq!(jaccard(&a, &c), 0.0);
        let d = token_signature("rust lifetimes");
        let half = jaccard(&a, &d);
        assert!(half > 0.0 && half < 1.0);
    }

    #[test]
    fn test_matrix_prefers_embeddings_then_lexical() {
        let a = Candidate::new("a", "web", 1, 0.9)
            .with_title("rust ownership")
            .with_embedding(vec![1.0, 0.0]);
        let b = Candidate::new("b", "web", 2, 0.8)
            .with_title("rust ownership")
            .with_embedding(vec![0.0, 1.0]);
        let c = Candidate::new("c", "kg", 1, 0.7).with_title("rust ownership");

        let m = SimilarityMatrix::build([&a, &b, &c]);
        assert_eq!(m.len(), 3);
        assert_eq!(m.get(0, 0), 1.0);
        // Embeddings say orthogonal even though text matches.
        assert_eq!(m.get(0, 1), 0.0);
        // No embedding on c: lexical proxy.
        assert_eq!(m.get(0, 2), 1.0);
        assert_eq!(m.get(2, 0), m.get(0, 2));
    }

    #[test]
    fn test_from_rows_clamps_and_pads() {
        let m = SimilarityMatrix::from_rows(vec![vec![1.0, 2.0], vec![-1.0]]);
        assert_eq!(m.get(0, 1), 1.0);
        assert_eq!(m.get(1, 0), 0.0);
        assert_eq!(m.get(1, 1), 0.0);
    }
}
