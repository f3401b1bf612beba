//! Word error rate scoring for valid-sampling take selection.

/// Edit-distance breakdown between a reference and a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WerBreakdown {
    /// Total edit cost (substitutions + deletions + insertions).
    pub cost: usize,
    /// Substitution count.
    pub substitutions: usize,
    /// Deletion count (reference words missing from the hypothesis).
    pub deletions: usize,
    /// Insertion count (hypothesis words not in the reference).
    pub insertions: usize,
    /// Reference length in words.
    pub ref_len: usize,
}

impl WerBreakdown {
    /// Word error rate: cost over the reference length (floored at one).
    #[must_use]
    pub fn wer(&self) -> f64 {
        self.cost as f64 / self.ref_len.max(1) as f64
    }
}

/// Normalize text for comparison: lowercase, strip everything that is not
/// alphanumeric or whitespace, collapse whitespace runs.
#[must_use]
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute the word-level edit distance between `reference` and
/// `hypothesis` with unit costs, tracking the S/D/I breakdown.
#[must_use]
pub fn word_error_rate(reference: &str, hypothesis: &str) -> WerBreakdown {
    let reference = normalize(reference);
    let hypothesis = normalize(hypothesis);
    let r: Vec<&str> = reference.split_whitespace().collect();
    let h: Vec<&str> = hypothesis.split_whitespace().collect();
    let (m, n) = (r.len(), h.len());

    #[derive(Clone, Copy, Default)]
    struct Cell {
        cost: usize,
        sub: usize,
        del: usize,
        ins: usize,
    }

    let mut dp = vec![vec![Cell::default(); n + 1]; m + 1];
    for (i, row) in dp.iter_mut().enumerate().skip(1) {
        row[0] = Cell {
            cost: i,
            del: i,
            ..Cell::default()
        };
    }
    for j in 1..=n {
        dp[0][j] = Cell {
            cost: j,
            ins: j,
            ..Cell::default()
        };
    }

    for i in 1..=m {
        for j in 1..=n {
            if r[i - 1] == h[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
                continue;
            }
            let ins = {
                let mut c = dp[i][j - 1];
                c.cost += 1;
                c.ins += 1;
                c
            };
            let del = {
                let mut c = dp[i - 1][j];
                c.cost += 1;
                c.del += 1;
                c
            };
            let sub = {
                let mut c = dp[i - 1][j - 1];
                c.cost += 1;
                c.sub += 1;
                c
            };
            let mut best = ins;
            if del.cost < best.cost {
                best = del;
            }
            if sub.cost < best.cost {
                best = sub;
            }
            dp[i][j] = best;
        }
    }

    let final_cell = dp[m][n];
    WerBreakdown {
        cost: final_cell.cost,
        substitutions: final_cell.sub,
        deletions: final_cell.del,
        insertions: final_cell.ins,
        ref_len: m,
    }
}

/// Valid-sampling score: `1 - WER`, clamped to `[0, 1]`. Higher is better.
#[must_use]
pub fn score(reference: &str, hypothesis: &str) -> f64 {
    (1.0 - word_error_rate(reference, hypothesis).wer()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn identical_text_scores_one() {
        assert!((score("hello world", "hello world") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        assert!((score("Hello, world!", "hello   world") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_hypothesis_scores_zero() {
        let breakdown = word_error_rate("hello world", "");
        assert_eq!(breakdown.deletions, 2);
        assert_eq!(breakdown.cost, 2);
        assert!((breakdown.wer() - 1.0).abs() < f64::EPSILON);
        assert!(score("hello world", "").abs() < f64::EPSILON);
    }

    #[test]
    fn insertions_beyond_reference_clamp_to_zero() {
        // Two insertions against a one-word reference: raw WER is 2.0.
        let breakdown = word_error_rate("hello", "hello there friend");
        assert_eq!(breakdown.insertions, 2);
        assert!((breakdown.wer() - 2.0).abs() < f64::EPSILON);
        assert!(score("hello", "hello there friend").abs() < f64::EPSILON);
    }

    #[test]
    fn substitution_counts() {
        let breakdown = word_error_rate("the quick brown fox", "the quick red fox");
        assert_eq!(breakdown.substitutions, 1);
        assert_eq!(breakdown.deletions, 0);
        assert_eq!(breakdown.insertions, 0);
        assert_eq!(breakdown.ref_len, 4);
        assert!((breakdown.wer() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_reference_divides_by_one() {
        let breakdown = word_error_rate("", "anything at all");
        assert_eq!(breakdown.ref_len, 0);
        assert!((breakdown.wer() - 3.0).abs() < f64::EPSILON);
    }
}
