//! Lightweight, position-weighted retriever precision.
//!
//! Gold identifiers are matched against retrieved document *names* by
//! substring containment, which is looser than the id equality used by
//! [`score_retrieval`](super::score_retrieval). Both behaviors are kept as-is
//! and named apart; they must not be unified without deciding which one the
//! evaluation data was labeled for.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::error::{TuneError, TuneResult};
use crate::model::{GoldLabel, MetaFilter, MetricBundle, RetrievedResult};

/// Sum over gold ids of the credit for the first retrieved name containing it.
///
/// Unweighted credit is `1`; weighted credit is
/// `(gold_rank + 1) / (gold_rank + 1 + retrieved_rank)` with 0-based ranks.
pub fn compute_retriever_precision(
    gold_ids: &[String],
    retrieved_names: &[String],
    weight_position: bool,
) -> f64 {
    let mut summed_precision = 0.0;
    for (gold_rank, gold_id) in gold_ids.iter().enumerate() {
        let first_match = retrieved_names
            .iter()
            .position(|name| name.contains(gold_id.as_str()));
        if let Some(retrieved_rank) = first_match {
            summed_precision += if weight_position {
                (gold_rank + 1) as f64 / (gold_rank + 1 + retrieved_rank) as f64
            } else {
                1.0
            };
        }
    }
    summed_precision
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecisionQuestion {
    pub question: String,
    pub predicted: Vec<String>,
    pub expected: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrecisionDetail {
    pub successes: Vec<PrecisionQuestion>,
    pub errors: Vec<PrecisionQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrieverPrecision {
    pub precision: f64,
    pub correctly_retrieved: usize,
    pub n_questions: usize,
    pub avg_time_s: f64,
    pub weighted: bool,
    pub detail: PrecisionDetail,
}

pub const PRECISION_METRIC_NAMES: [&str; 4] = [
    "precision",
    "correctly_retrieved",
    "precision_n_questions",
    "avg_time_s",
];

impl RetrieverPrecision {
    pub fn to_bundle(&self) -> MetricBundle {
        MetricBundle::new()
            .with("precision", self.precision)
            .with("correctly_retrieved", self.correctly_retrieved as f64)
            .with("precision_n_questions", self.n_questions as f64)
            .with("avg_time_s", self.avg_time_s)
    }
}

/// Mean [`compute_retriever_precision`] over the gold questions.
///
/// With `filter_level` set, each question is retrieved with a metadata filter
/// on its own value for that field; questions without a value are skipped.
pub fn score_retriever_precision<F>(
    gold: &BTreeMap<String, GoldLabel>,
    mut retrieve: F,
    weight_position: bool,
    filter_level: Option<&str>,
) -> TuneResult<RetrieverPrecision>
where
    F: FnMut(&str, Option<&MetaFilter>) -> TuneResult<RetrievedResult>,
{
    let mut summed_precision = 0.0;
    let mut correctly_retrieved = 0_usize;
    let mut n_questions = 0_usize;
    let mut total_time = 0.0;
    let mut detail = PrecisionDetail::default();

    for (question, label) in gold {
        let filter = match filter_level {
            None => None,
            Some(field) => match label.meta.get(field).filter(|value| !value.is_empty()) {
                Some(value) => Some(MetaFilter {
                    field: field.to_string(),
                    value: value.clone(),
                }),
                None => continue,
            },
        };

        let started = Instant::now();
        let retrieved = retrieve(question, filter.as_ref())?;
        total_time += started.elapsed().as_secs_f64();

        let expected = label.document_ids.iter().cloned().collect::<Vec<String>>();
        let predicted = retrieved
            .iter()
            .map(|doc| doc.name.clone())
            .collect::<Vec<String>>();
        let precision = compute_retriever_precision(&expected, &predicted, weight_position);
        summed_precision += precision;
        n_questions += 1;

        let entry = PrecisionQuestion {
            question: question.clone(),
            predicted,
            expected,
        };
        if precision > 0.0 {
            correctly_retrieved += 1;
            detail.successes.push(entry);
        } else {
            detail.errors.push(entry);
        }
    }

    if n_questions == 0 {
        return Err(TuneError::undefined(match filter_level {
            Some(field) => format!("no gold question carries a value for filter `{field}`"),
            None => "precision scoring needs at least one labeled question".to_string(),
        }));
    }

    let result = RetrieverPrecision {
        precision: summed_precision / n_questions as f64,
        correctly_retrieved,
        n_questions,
        avg_time_s: total_time / n_questions as f64,
        weighted: weight_position,
        detail,
    };

    info!(
        correctly_retrieved,
        n_questions,
        mean_precision = result.precision,
        avg_time_ms = result.avg_time_s * 1000.0,
        weighted = weight_position,
        "retriever precision computed"
    );

    Ok(result)
}
