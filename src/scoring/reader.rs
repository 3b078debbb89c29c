use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::info;

use crate::error::{TuneError, TuneResult};
use crate::model::MetricBundle;
use crate::util::normalize_whitespace;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderMetrics {
    pub correct_readings_top1: usize,
    pub correct_readings_topk: usize,
    pub correct_readings_top1_has_answer: usize,
    pub correct_readings_topk_has_answer: usize,
    pub exact_matches_top1: usize,
    pub exact_matches_topk: usize,
    pub exact_matches_top1_has_answer: usize,
    pub exact_matches_topk_has_answer: usize,
    pub summed_f1_top1: f64,
    pub summed_f1_topk: f64,
    pub n_questions: usize,
    pub n_questions_has_answer: usize,
    pub top_k: usize,
}

pub const READER_METRIC_NAMES: [&str; 21] = [
    "correct_readings_top1",
    "correct_readings_topk",
    "correct_readings_top1_has_answer",
    "correct_readings_topk_has_answer",
    "exact_matches_top1",
    "exact_matches_topk",
    "exact_matches_top1_has_answer",
    "exact_matches_topk_has_answer",
    "reader_top1_accuracy",
    "reader_topk_accuracy",
    "reader_top1_accuracy_has_answer",
    "reader_topk_accuracy_has_answer",
    "reader_top1_em",
    "reader_topk_em",
    "reader_top1_em_has_answer",
    "reader_topk_em_has_answer",
    "reader_top1_f1",
    "reader_topk_f1",
    "reader_n_questions",
    "reader_n_questions_has_answer",
    "reader_top_k",
];

impl ReaderMetrics {
    pub fn to_bundle(&self) -> MetricBundle {
        let all = self.n_questions as f64;
        let answered = self.n_questions_has_answer as f64;
        MetricBundle::new()
            .with("correct_readings_top1", self.correct_readings_top1 as f64)
            .with("correct_readings_topk", self.correct_readings_topk as f64)
            .with(
                "correct_readings_top1_has_answer",
                self.correct_readings_top1_has_answer as f64,
            )
            .with(
                "correct_readings_topk_has_answer",
                self.correct_readings_topk_has_answer as f64,
            )
            .with("exact_matches_top1", self.exact_matches_top1 as f64)
            .with("exact_matches_topk", self.exact_matches_topk as f64)
            .with(
                "exact_matches_top1_has_answer",
                self.exact_matches_top1_has_answer as f64,
            )
            .with(
                "exact_matches_topk_has_answer",
                self.exact_matches_topk_has_answer as f64,
            )
            .with("reader_top1_accuracy", self.correct_readings_top1 as f64 / all)
            .with("reader_topk_accuracy", self.correct_readings_topk as f64 / all)
            .with(
                "reader_top1_accuracy_has_answer",
                self.correct_readings_top1_has_answer as f64 / answered,
            )
            .with(
                "reader_topk_accuracy_has_answer",
                self.correct_readings_topk_has_answer as f64 / answered,
            )
            .with("reader_top1_em", self.exact_matches_top1 as f64 / all)
            .with("reader_topk_em", self.exact_matches_topk as f64 / all)
            .with(
                "reader_top1_em_has_answer",
                self.exact_matches_top1_has_answer as f64 / answered,
            )
            .with(
                "reader_topk_em_has_answer",
                self.exact_matches_topk_has_answer as f64 / answered,
            )
            .with("reader_top1_f1", self.summed_f1_top1 / all)
            .with("reader_topk_f1", self.summed_f1_topk / all)
            .with("reader_n_questions", all)
            .with("reader_n_questions_has_answer", answered)
            .with("reader_top_k", self.top_k as f64)
    }
}

/// Lowercase, turn punctuation into spaces, collapse whitespace.
pub fn normalize_answer(answer: &str) -> String {
    let lowered = answer
        .chars()
        .flat_map(char::to_lowercase)
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect::<String>();
    normalize_whitespace(&lowered)
}

/// SQuAD-style token F1 between a prediction and one gold answer.
pub fn token_f1(prediction: &str, gold: &str) -> f64 {
    let predicted = normalize_answer(prediction);
    let expected = normalize_answer(gold);
    let predicted_tokens = predicted.split_whitespace().collect::<Vec<&str>>();
    let expected_tokens = expected.split_whitespace().collect::<Vec<&str>>();

    if predicted_tokens.is_empty() || expected_tokens.is_empty() {
        return if predicted_tokens.is_empty() && expected_tokens.is_empty() {
            1.0
        } else {
            0.0
        };
    }

    let mut expected_counts = HashMap::<&str, usize>::new();
    for token in &expected_tokens {
        *expected_counts.entry(*token).or_default() += 1;
    }
    let mut common = 0_usize;
    for token in &predicted_tokens {
        if let Some(count) = expected_counts.get_mut(token)
            && *count > 0
        {
            *count -= 1;
            common += 1;
        }
    }
    if common == 0 {
        return 0.0;
    }

    let precision = common as f64 / predicted_tokens.len() as f64;
    let recall = common as f64 / expected_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

struct AnswerMatcher<'a> {
    gold: Vec<&'a str>,
    gold_normalized: Vec<String>,
}

impl<'a> AnswerMatcher<'a> {
    fn new(answers: &'a BTreeSet<String>) -> Self {
        let gold = answers
            .iter()
            .map(String::as_str)
            .filter(|answer| !normalize_answer(answer).is_empty())
            .collect::<Vec<&str>>();
        let gold_normalized = gold.iter().map(|answer| normalize_answer(answer)).collect();
        Self {
            gold,
            gold_normalized,
        }
    }

    fn has_answer(&self) -> bool {
        !self.gold.is_empty()
    }

    /// No-answer questions match a prediction that normalizes to nothing.
    fn normalized_match(&self, prediction: &str) -> bool {
        let normalized = normalize_answer(prediction);
        if self.has_answer() {
            self.gold_normalized.contains(&normalized)
        } else {
            normalized.is_empty()
        }
    }

    fn exact_match(&self, prediction: &str) -> bool {
        if self.has_answer() {
            self.gold.contains(&prediction)
        } else {
            prediction.is_empty()
        }
    }

    fn f1(&self, prediction: &str) -> f64 {
        if self.has_answer() {
            self.gold
                .iter()
                .map(|gold| token_f1(prediction, gold))
                .fold(0.0, f64::max)
        } else if normalize_answer(prediction).is_empty() {
            1.0
        } else {
            0.0
        }
    }
}

/// Top-1 and top-k reading metrics over every question in `gold_answers`.
///
/// A question missing from `predictions` is treated as an abstention.
pub fn score_reader(
    gold_answers: &BTreeMap<String, BTreeSet<String>>,
    predictions: &BTreeMap<String, Vec<String>>,
    k: usize,
) -> TuneResult<ReaderMetrics> {
    let mut metrics = ReaderMetrics {
        correct_readings_top1: 0,
        correct_readings_topk: 0,
        correct_readings_top1_has_answer: 0,
        correct_readings_topk_has_answer: 0,
        exact_matches_top1: 0,
        exact_matches_topk: 0,
        exact_matches_top1_has_answer: 0,
        exact_matches_topk_has_answer: 0,
        summed_f1_top1: 0.0,
        summed_f1_topk: 0.0,
        n_questions: gold_answers.len(),
        n_questions_has_answer: 0,
        top_k: k,
    };
    let no_predictions = Vec::new();

    for (question, answers) in gold_answers {
        let matcher = AnswerMatcher::new(answers);
        let predicted = predictions.get(question).unwrap_or(&no_predictions);
        let window = &predicted[..predicted.len().min(k)];
        let abstained = window.is_empty();

        let (top1_correct, top1_exact, top1_f1) = match window.first() {
            Some(first) => (
                matcher.normalized_match(first),
                matcher.exact_match(first),
                matcher.f1(first),
            ),
            None => {
                let credit = !matcher.has_answer();
                (credit, credit, if credit { 1.0 } else { 0.0 })
            }
        };
        let topk_correct = if abstained {
            top1_correct
        } else {
            window.iter().any(|answer| matcher.normalized_match(answer))
        };
        let topk_exact = if abstained {
            top1_exact
        } else {
            window.iter().any(|answer| matcher.exact_match(answer))
        };
        let topk_f1 = if abstained {
            top1_f1
        } else {
            window
                .iter()
                .map(|answer| matcher.f1(answer))
                .fold(0.0, f64::max)
        };

        metrics.correct_readings_top1 += usize::from(top1_correct);
        metrics.correct_readings_topk += usize::from(topk_correct);
        metrics.exact_matches_top1 += usize::from(top1_exact);
        metrics.exact_matches_topk += usize::from(topk_exact);
        metrics.summed_f1_top1 += top1_f1;
        metrics.summed_f1_topk += topk_f1;

        if matcher.has_answer() {
            metrics.n_questions_has_answer += 1;
            metrics.correct_readings_top1_has_answer += usize::from(top1_correct);
            metrics.correct_readings_topk_has_answer += usize::from(topk_correct);
            metrics.exact_matches_top1_has_answer += usize::from(top1_exact);
            metrics.exact_matches_topk_has_answer += usize::from(topk_exact);
        }
    }

    if metrics.n_questions == 0 {
        return Err(TuneError::undefined(
            "reader scoring needs at least one labeled question",
        ));
    }
    if metrics.n_questions_has_answer == 0 {
        return Err(TuneError::undefined(
            "reader scoring needs at least one question with an answer",
        ));
    }

    info!(
        correct_readings_top1 = metrics.correct_readings_top1,
        correct_readings_topk = metrics.correct_readings_topk,
        n_questions = metrics.n_questions,
        top_k = k,
        "reader predictions scored"
    );

    Ok(metrics)
}
