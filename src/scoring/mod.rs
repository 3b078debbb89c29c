//! Ranking and reading metrics.

mod precision;
mod reader;
mod retrieval;

pub use self::precision::{PrecisionDetail, score_retriever_precision};
pub use self::reader::score_reader;
pub use self::retrieval::score_retrieval;

use self::precision::PRECISION_METRIC_NAMES;
use self::reader::READER_METRIC_NAMES;
use self::retrieval::RETRIEVAL_METRIC_NAMES;

/// Every metric a full evaluation can report, in result-log column order.
pub fn metric_names() -> impl Iterator<Item = &'static str> {
    RETRIEVAL_METRIC_NAMES
        .into_iter()
        .chain(READER_METRIC_NAMES)
        .chain(PRECISION_METRIC_NAMES)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::model::MetricBundle;
    use crate::scoring::precision::RetrieverPrecision;
    use crate::scoring::retrieval::RetrievalMetrics;

    fn names(bundle: &MetricBundle) -> BTreeSet<&str> {
        bundle.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn metric_names_cover_every_bundle() {
        let retrieval = RetrievalMetrics {
            recall: 1.0,
            map: 1.0,
            mrr: 1.0,
            correct_retrievals: 1,
            n_questions: 1,
            top_k: 3,
            retrieve_time: 0.1,
        };
        assert_eq!(
            names(&retrieval.to_bundle()),
            RETRIEVAL_METRIC_NAMES.into_iter().collect()
        );

        let gold = BTreeMap::from([(
            "Q1".to_string(),
            BTreeSet::from(["paris".to_string()]),
        )]);
        let predictions = BTreeMap::from([("Q1".to_string(), vec!["paris".to_string()])]);
        let reader = score_reader(&gold, &predictions, 1).expect("question is scored");
        assert_eq!(
            names(&reader.to_bundle()),
            READER_METRIC_NAMES.into_iter().collect()
        );

        let precision = RetrieverPrecision {
            precision: 1.0,
            correctly_retrieved: 1,
            n_questions: 1,
            avg_time_s: 0.1,
            weighted: false,
            detail: PrecisionDetail::default(),
        };
        assert_eq!(
            names(&precision.to_bundle()),
            PRECISION_METRIC_NAMES.into_iter().collect()
        );

        let all = metric_names().collect::<Vec<&str>>();
        let distinct = all.iter().copied().collect::<BTreeSet<&str>>();
        assert_eq!(all.len(), distinct.len());
    }
}
