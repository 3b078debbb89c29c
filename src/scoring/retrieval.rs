use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::error::{TuneError, TuneResult};
use crate::model::{GoldLabel, MetricBundle, RetrievedDoc, RetrievedResult};

/// Per-question contribution to recall, MRR and MAP.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuestionScore {
    pub hit: bool,
    pub reciprocal_rank: f64,
    pub average_precision: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalMetrics {
    pub recall: f64,
    pub map: f64,
    pub mrr: f64,
    pub correct_retrievals: usize,
    pub n_questions: usize,
    pub top_k: usize,
    pub retrieve_time: f64,
}

pub const RETRIEVAL_METRIC_NAMES: [&str; 7] = [
    "recall",
    "map",
    "mrr",
    "correct_retrievals",
    "n_questions",
    "top_k",
    "retrieve_time",
];

impl RetrievalMetrics {
    pub fn to_bundle(&self) -> MetricBundle {
        MetricBundle::new()
            .with("recall", self.recall)
            .with("map", self.map)
            .with("mrr", self.mrr)
            .with("correct_retrievals", self.correct_retrievals as f64)
            .with("n_questions", self.n_questions as f64)
            .with("top_k", self.top_k as f64)
            .with("retrieve_time", self.retrieve_time)
    }
}

/// Score one ranked list against the relevant set of one question.
///
/// Closed domain: a document is relevant when its id equals a gold id not
/// matched at a better rank, and average precision is normalized by the
/// number of distinct gold ids.
/// Open domain: a document is relevant when its text contains a gold answer,
/// and average precision is normalized by the relevant documents found.
pub fn score_ranking(
    relevant: &BTreeSet<String>,
    ranked: &[RetrievedDoc],
    open_domain: bool,
) -> QuestionScore {
    let mut score = QuestionScore::default();
    let mut relevant_found = 0_usize;
    let mut precision_sum = 0.0;
    let mut matched_ids = BTreeSet::<&str>::new();

    for (index, doc) in ranked.iter().enumerate() {
        let rank = index + 1;
        let is_relevant = if open_domain {
            relevant
                .iter()
                .filter(|answer| !answer.is_empty())
                .any(|answer| doc.text.contains(answer.as_str()))
        } else {
            relevant.contains(&doc.doc_id) && matched_ids.insert(doc.doc_id.as_str())
        };
        if !is_relevant {
            continue;
        }

        relevant_found += 1;
        if !score.hit {
            score.hit = true;
            score.reciprocal_rank = 1.0 / rank as f64;
        }
        precision_sum += relevant_found as f64 / rank as f64;
    }

    if score.hit {
        let normalizer = if open_domain {
            relevant_found
        } else {
            relevant.len()
        };
        score.average_precision = precision_sum / normalizer as f64;
    }

    score
}

/// Recall, MRR and MAP over every question in `gold`.
///
/// `retrieve` is called once per question; results beyond `top_k` are ignored.
pub fn score_retrieval<F>(
    gold: &BTreeMap<String, GoldLabel>,
    mut retrieve: F,
    top_k: usize,
    open_domain: bool,
) -> TuneResult<RetrievalMetrics>
where
    F: FnMut(&str) -> TuneResult<RetrievedResult>,
{
    if gold.is_empty() {
        return Err(TuneError::undefined(
            "retrieval scoring needs at least one labeled question",
        ));
    }

    let mut correct_retrievals = 0_usize;
    let mut summed_reciprocal_rank = 0.0;
    let mut summed_avg_precision = 0.0;
    let mut retrieve_time = 0.0;

    for (question, label) in gold {
        let started = Instant::now();
        let mut retrieved = retrieve(question)?;
        retrieve_time += started.elapsed().as_secs_f64();
        retrieved.truncate(top_k);

        let score = score_ranking(label.relevant(open_domain), &retrieved, open_domain);
        if score.hit {
            correct_retrievals += 1;
        }
        summed_reciprocal_rank += score.reciprocal_rank;
        summed_avg_precision += score.average_precision;
    }

    let n_questions = gold.len();
    let metrics = RetrievalMetrics {
        recall: correct_retrievals as f64 / n_questions as f64,
        map: summed_avg_precision / n_questions as f64,
        mrr: summed_reciprocal_rank / n_questions as f64,
        correct_retrievals,
        n_questions,
        top_k,
        retrieve_time,
    };

    info!(
        correct_retrievals,
        n_questions,
        top_k,
        recall = metrics.recall,
        "retriever found a relevant document in the top-k"
    );

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> RetrievedDoc {
        RetrievedDoc {
            doc_id: id.to_string(),
            name: id.to_string(),
            text: text.to_string(),
            score: 0.0,
        }
    }

    fn label(question: &str, ids: &[&str], answers: &[&str]) -> GoldLabel {
        GoldLabel {
            question: question.to_string(),
            document_ids: ids.iter().map(|id| id.to_string()).collect(),
            answers: answers.iter().map(|answer| answer.to_string()).collect(),
            origin: "gold_label".to_string(),
            meta: BTreeMap::new(),
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn closed_domain_worked_example() {
        let gold = BTreeMap::from([
            ("Q1".to_string(), label("Q1", &["doc_a"], &[])),
            ("Q2".to_string(), label("Q2", &["doc_b"], &[])),
        ]);
        let rankings = BTreeMap::from([
            ("Q1", vec![doc("doc_a", ""), doc("doc_c", "")]),
            ("Q2", vec![doc("doc_c", ""), doc("doc_b", "")]),
        ]);

        let metrics = score_retrieval(
            &gold,
            |question| Ok(rankings[question].clone()),
            2,
            false,
        )
        .expect("two questions are scored");

        assert_close(metrics.recall, 1.0);
        assert_close(metrics.mrr, 0.75);
        assert_close(metrics.map, 0.75);
        assert_eq!(metrics.n_questions, 2);
        assert_eq!(metrics.top_k, 2);
    }

    #[test]
    fn closed_domain_average_precision_uses_distinct_gold_count() {
        let relevant = ["a", "b", "c"].iter().map(|id| id.to_string()).collect();
        let ranked = vec![doc("a", ""), doc("x", ""), doc("b", "")];

        let score = score_ranking(&relevant, &ranked, false);
        assert!(score.hit);
        assert_close(score.reciprocal_rank, 1.0);
        // (1/1 + 2/3) / 3 distinct gold ids
        assert_close(score.average_precision, (1.0 + 2.0 / 3.0) / 3.0);
    }

    #[test]
    fn repeated_document_id_counts_once_in_closed_domain() {
        let relevant = ["a".to_string()].into_iter().collect();
        let ranked = vec![doc("a", ""), doc("a", ""), doc("a", "")];

        let score = score_ranking(&relevant, &ranked, false);
        assert_close(score.average_precision, 1.0);
    }

    #[test]
    fn open_domain_average_precision_uses_found_count() {
        let relevant = ["Paris".to_string()].into_iter().collect();
        let ranked = vec![
            doc("d1", "Lyon is large"),
            doc("d2", "Paris is the capital"),
            doc("d3", "Paris again"),
        ];

        let score = score_ranking(&relevant, &ranked, true);
        assert_close(score.reciprocal_rank, 0.5);
        // (1/2 + 2/3) / 2 relevant found
        assert_close(score.average_precision, (0.5 + 2.0 / 3.0) / 2.0);
    }

    #[test]
    fn misses_count_in_denominator_and_results_are_truncated() {
        let gold = BTreeMap::from([
            ("Q1".to_string(), label("Q1", &["doc_a"], &[])),
            ("Q2".to_string(), label("Q2", &["doc_b"], &[])),
        ]);

        let metrics = score_retrieval(
            &gold,
            |_| Ok(vec![doc("doc_a", ""), doc("doc_b", "")]),
            1,
            false,
        )
        .expect("questions are scored");

        // Q2's gold sits at rank 2, outside top_k = 1.
        assert_close(metrics.recall, 0.5);
        assert_close(metrics.mrr, 0.5);
        assert_close(metrics.map, 0.5);
    }

    #[test]
    fn metrics_stay_in_unit_interval() {
        let gold = BTreeMap::from([
            ("Q1".to_string(), label("Q1", &["a"], &["x"])),
            ("Q2".to_string(), label("Q2", &["b", "c"], &["y"])),
            ("Q3".to_string(), label("Q3", &[], &[])),
        ]);
        for open_domain in [false, true] {
            let metrics = score_retrieval(
                &gold,
                |_| Ok(vec![doc("a", "x y"), doc("a", "x"), doc("c", "y"), doc("b", "")]),
                4,
                open_domain,
            )
            .expect("questions are scored");
            for value in [metrics.recall, metrics.mrr, metrics.map] {
                assert!((0.0..=1.0).contains(&value), "{value} out of range");
            }
        }
    }

    #[test]
    fn zero_questions_is_metric_undefined() {
        let gold = BTreeMap::new();
        let error = score_retrieval(&gold, |_| Ok(Vec::new()), 5, false)
            .expect_err("no questions to aggregate");
        assert!(matches!(error, TuneError::MetricUndefined(_)));
    }

    #[test]
    fn retrieve_failure_propagates() {
        let gold = BTreeMap::from([("Q1".to_string(), label("Q1", &["a"], &[]))]);
        let error = score_retrieval(
            &gold,
            |_| Err(TuneError::RunExecution("index offline".to_string())),
            5,
            false,
        )
        .expect_err("retrieve error surfaces");
        assert!(error.to_string().contains("index offline"));
    }
}
