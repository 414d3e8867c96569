/**
 * Scoring Module
 *
 * Pure functions that rank lessons during hybrid retrieval. No I/O, no
 * state. The final score combines four signals:
 *
 * ```text
 * final = cosine(query, lesson) x confidence x time_decay x vote_factor
 * ```
 *
 * - cosine         semantic similarity of the embedding vectors, [-1, 1]
 * - confidence     the publisher's own estimate, [0, 1]
 * - time_decay     geometric half-life over days since last update, (0, 1]
 * - vote_factor    1.0 + 0.1 per net upvote, clamped below at 0.1
 *
 * The server expresses the decay as exp(-0.01 * days) instead; the two
 * shapes agree on monotonicity and bounds but not bit-for-bit, so callers
 * treat scores as opaque ranking keys.
 */

/// Age at which the time-decay factor reaches 0.5.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Lower clamp for the vote factor. Mass-downvoted lessons stay
/// discoverable at low rank instead of dropping to zero.
pub const MIN_VOTE_FACTOR: f64 = 0.1;

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector's norm is below 1e-9, so a zero vector
/// never produces NaN. Unequal lengths are a programmer error.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(
        a.len(),
        b.len(),
        "Embeddings must have same dimensions for cosine similarity"
    );

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < 1e-9 || norm_b < 1e-9 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Geometric decay: 0.5^(age / half_life). Age 0 gives 1.0; one half-life
/// gives 0.5.
pub fn time_decay(age_days: f64, half_life_days: f64) -> f64 {
    0.5_f64.powf(age_days / half_life_days)
}

/// Net-vote multiplier: each net upvote adds 10%, clamped below at
/// `MIN_VOTE_FACTOR`.
pub fn vote_factor(upvotes: u32, downvotes: u32) -> f64 {
    let net = upvotes as f64 - downvotes as f64;
    (1.0 + 0.1 * net).max(MIN_VOTE_FACTOR)
}

/// Combined relevance score used to order query results.
pub fn final_score(
    cosine_sim: f32,
    confidence: f64,
    age_days: f64,
    upvotes: u32,
    downvotes: u32,
    half_life_days: f64,
) -> f64 {
    cosine_sim as f64
        * confidence
        * time_decay(age_days, half_life_days)
        * vote_factor(upvotes, downvotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let a = vec![0.5, 0.5, 0.5, 0.5];
        let sim = cosine(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6, "identical vectors score ~1.0");

        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine(&a, &b)).abs() < 1e-6, "orthogonal vectors score ~0.0");
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm() {
        let zero = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine(&zero, &b), 0.0);
        assert_eq!(cosine(&b, &zero), 0.0);
        assert_eq!(cosine(&zero, &zero), 0.0);
    }

    #[test]
    fn test_time_decay_half_life() {
        assert!((time_decay(0.0, 30.0) - 1.0).abs() < 1e-12);
        assert!((time_decay(30.0, 30.0) - 0.5).abs() < 1e-12);
        assert!((time_decay(60.0, 30.0) - 0.25).abs() < 1e-12);

        // Always within (0, 1] for non-negative ages
        for age in [0.0, 1.0, 7.0, 365.0, 10_000.0] {
            let d = time_decay(age, DEFAULT_HALF_LIFE_DAYS);
            assert!(d > 0.0 && d <= 1.0, "decay {} out of range for age {}", d, age);
        }
    }

    #[test]
    fn test_vote_factor_bounds() {
        assert!((vote_factor(0, 0) - 1.0).abs() < 1e-12);
        assert!((vote_factor(5, 0) - 1.5).abs() < 1e-12);
        assert!((vote_factor(0, 5) - 0.5).abs() < 1e-12);

        // Mass downvotes clamp at 0.1, never zero or negative
        assert_eq!(vote_factor(0, 100), MIN_VOTE_FACTOR);
        assert_eq!(vote_factor(1, 50), MIN_VOTE_FACTOR);
    }

    #[test]
    fn test_final_score_bounded_by_confidence() {
        // With no votes and zero age, score == cosine * confidence <= confidence
        let score = final_score(1.0, 0.8, 0.0, 0, 0, 30.0);
        assert!((score - 0.8).abs() < 1e-9);

        let score = final_score(0.9, 0.7, 15.0, 2, 1, 30.0);
        assert!(score > 0.0);
        assert!(score <= 0.7 * 1.1 + 1e-9);
    }

    #[test]
    fn test_final_score_vote_ordering() {
        // Identical lessons, one upvoted five times: 1.5x the other's score
        let plain = final_score(0.6, 0.5, 0.0, 0, 0, 30.0);
        let boosted = final_score(0.6, 0.5, 0.0, 5, 0, 30.0);
        assert!(boosted >= plain * 1.5 - 1e-9);
    }
}
