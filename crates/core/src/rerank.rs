use crate::models::TextChunk;
use crate::traits::RelevanceScorer;

/// Keyword overlap score: `2 × distinct query terms present + total term occurrences`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

impl RelevanceScorer for LexicalScorer {
    fn score(&self, query: &str, chunk: &TextChunk) -> f64 {
        let content = chunk.content.to_lowercase();
        let mut terms: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
        terms.sort_unstable();
        terms.dedup();

        let matches = terms.iter().filter(|term| content.contains(term.as_str())).count();
        let frequency: usize = terms
            .iter()
            .map(|term| content.matches(term.as_str()).count())
            .sum();
        (matches * 2 + frequency) as f64
    }
}

pub fn rerank(
    scorer: &dyn RelevanceScorer,
    query: &str,
    chunks: Vec<TextChunk>,
    top_k: usize,
) -> Vec<TextChunk> {
    let mut scored: Vec<(f64, TextChunk)> = chunks
        .into_iter()
        .map(|chunk| (scorer.score(query, &chunk), chunk))
        .collect();
    scored.sort_by(|left, right| right.0.total_cmp(&left.0));
    scored.into_iter().take(top_k).map(|(_, chunk)| chunk).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_score_counts_distinct_matches_twice() {
        let chunk = TextChunk::new("Ripple ripple voltage at the output", "a.pdf", 1);
        // ripple: matched, 2 occurrences; voltage: matched, 1; jitter: absent.
        assert_eq!(LexicalScorer.score("ripple voltage jitter", &chunk), 2.0 * 2.0 + 3.0);
        assert_eq!(LexicalScorer.score("", &chunk), 0.0);
    }

    #[test]
    fn rerank_keeps_top_k_by_score() {
        let chunks = vec![
            TextChunk::new("unrelated text", "a.pdf", 1),
            TextChunk::new("loop gain and phase margin", "a.pdf", 2),
            TextChunk::new("phase margin", "a.pdf", 3),
        ];
        let ranked = rerank(&LexicalScorer, "phase margin loop", chunks, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].page, Some(2));
        assert_eq!(ranked[1].page, Some(3));
    }
}
