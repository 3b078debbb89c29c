use std::collections::BTreeSet;

use crate::model::RetrievedResult;
use crate::pipeline::embedding::word_tokens;

/// Extractive reader: picks the sentences sharing most words with the query
/// and answers with their longest run of words absent from the query.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapReader {
    per_candidate: usize,
    total: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Span {
    score: f64,
    candidate_rank: usize,
    text: String,
}

impl OverlapReader {
    pub fn new(per_candidate: usize, total: usize) -> Self {
        Self {
            per_candidate: per_candidate.max(1),
            total: total.max(1),
        }
    }

    /// Ranked answer strings, best first, at most `total` of them.
    pub fn read(&self, query: &str, candidates: &RetrievedResult) -> Vec<String> {
        let query_terms = word_tokens(query).into_iter().collect::<BTreeSet<String>>();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut spans = Vec::<Span>::new();
        for (candidate_rank, candidate) in candidates.iter().enumerate() {
            let mut local = candidate
                .text
                .split_inclusive(['.', '!', '?'])
                .filter_map(|sentence| extract_span(sentence, &query_terms, candidate_rank))
                .collect::<Vec<Span>>();
            sort_spans(&mut local);
            local.truncate(self.per_candidate);
            spans.extend(local);
        }

        sort_spans(&mut spans);
        let mut seen = BTreeSet::<String>::new();
        spans
            .into_iter()
            .filter(|span| seen.insert(span.text.to_lowercase()))
            .take(self.total)
            .map(|span| span.text)
            .collect()
    }
}

fn extract_span(sentence: &str, query_terms: &BTreeSet<String>, candidate_rank: usize) -> Option<Span> {
    let words = sentence.split_whitespace().collect::<Vec<&str>>();
    let normalized = words
        .iter()
        .map(|word| word_tokens(word).join(""))
        .collect::<Vec<String>>();

    let overlap = normalized
        .iter()
        .filter(|token| !token.is_empty() && query_terms.contains(*token))
        .count();
    if overlap == 0 {
        return None;
    }

    let mut best = (0_usize, 0_usize);
    let mut run_start = 0_usize;
    for index in 0..=normalized.len() {
        let breaks_run = index == normalized.len()
            || normalized[index].is_empty()
            || query_terms.contains(&normalized[index]);
        if breaks_run {
            if index - run_start > best.1 - best.0 {
                best = (run_start, index);
            }
            run_start = index + 1;
        }
    }
    if best.1 == best.0 {
        return None;
    }

    let text = words[best.0..best.1]
        .join(" ")
        .trim_matches(|character: char| !character.is_alphanumeric())
        .to_string();
    if text.is_empty() {
        return None;
    }

    Some(Span {
        score: overlap as f64 / normalized.len().max(1) as f64,
        candidate_rank,
        text,
    })
}

fn sort_spans(spans: &mut [Span]) {
    spans.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.candidate_rank.cmp(&right.candidate_rank))
            .then(left.text.cmp(&right.text))
    });
}
