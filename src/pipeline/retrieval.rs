use std::collections::{BTreeSet, HashMap};

use crate::error::TuneResult;
use crate::model::{MetaFilter, RetrievedDoc};
use crate::params::{PipelineParams, RetrieverKind};
use crate::pipeline::embedding::EncoderRole;
use crate::pipeline::store::PassageStore;

pub const HYBRID_RRF_K: u32 = 60;
const CANDIDATE_POOL_FACTOR: usize = 4;

/// Ranking strategy selected by `retriever_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Retriever {
    Bm25,
    /// Cosine over stored embeddings; DPR embeds passages with their title.
    Dense { role: EncoderRole },
    Title,
    /// BM25 over text, boosted for passages whose title ranks in the first
    /// `k_title` title hits.
    TitleBm25 { k_title: usize, boosting: f64 },
    Hybrid { rrf_k: u32 },
}

impl Retriever {
    pub fn from_params(params: &PipelineParams) -> Self {
        match params.retriever_type {
            RetrieverKind::Bm25 => Self::Bm25,
            RetrieverKind::Sbert => Self::Dense {
                role: EncoderRole::Symmetric,
            },
            RetrieverKind::Dpr => Self::Dense {
                role: EncoderRole::Query,
            },
            RetrieverKind::Title => Self::Title,
            RetrieverKind::TitleBm25 => Self::TitleBm25 {
                k_title: params.k_title_retriever,
                boosting: params.boosting,
            },
            RetrieverKind::Hybrid => Self::Hybrid {
                rrf_k: HYBRID_RRF_K,
            },
        }
    }

    /// Embedding pass needed after indexing, and whether it includes titles.
    pub fn embedding_pass(&self) -> Option<bool> {
        match self {
            Self::Dense { role } => Some(*role != EncoderRole::Symmetric),
            Self::Hybrid { .. } => Some(false),
            _ => None,
        }
    }

    pub fn retrieve(
        &self,
        store: &PassageStore,
        query: &str,
        top_k: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<Vec<RetrievedDoc>> {
        match self {
            Self::Bm25 => store.search_text(query, top_k, filter),
            Self::Dense { role } => store.search_embeddings(query, *role, top_k, filter),
            Self::Title => store.search_titles(query, top_k, filter),
            Self::TitleBm25 { k_title, boosting } => {
                let boosted_docs = store
                    .search_titles(query, *k_title, filter)?
                    .into_iter()
                    .map(|doc| doc.doc_id)
                    .collect::<BTreeSet<String>>();
                let pool = top_k.saturating_mul(CANDIDATE_POOL_FACTOR);
                let mut candidates = store.search_text(query, pool, filter)?;
                boost_titles(&mut candidates, &boosted_docs, *boosting);
                candidates.truncate(top_k);
                Ok(candidates)
            }
            Self::Hybrid { rrf_k } => {
                let pool = top_k.saturating_mul(CANDIDATE_POOL_FACTOR);
                let lexical = store.search_text(query, pool, filter)?;
                let semantic =
                    store.search_embeddings(query, EncoderRole::Symmetric, pool, filter)?;
                let mut fused = fuse_rrf(&lexical, &semantic, *rrf_k);
                fused.truncate(top_k);
                Ok(fused)
            }
        }
    }
}

fn boost_titles(candidates: &mut [RetrievedDoc], boosted_docs: &BTreeSet<String>, boosting: f64) {
    for candidate in candidates.iter_mut() {
        if boosted_docs.contains(&candidate.doc_id) {
            candidate.score *= 1.0 + boosting;
        }
    }
    sort_by_score(candidates);
}

/// Reciprocal rank fusion keyed by passage text within a document.
fn fuse_rrf(lexical: &[RetrievedDoc], semantic: &[RetrievedDoc], rrf_k: u32) -> Vec<RetrievedDoc> {
    let rrf_base = f64::from(rrf_k.max(1));
    let mut merged = HashMap::<(String, String), RetrievedDoc>::new();

    for ranked in [lexical, semantic] {
        for (index, candidate) in ranked.iter().enumerate() {
            let contribution = 1.0 / (rrf_base + (index + 1) as f64);
            let entry = merged
                .entry((candidate.doc_id.clone(), candidate.text.clone()))
                .or_insert_with(|| RetrievedDoc {
                    score: 0.0,
                    ..candidate.clone()
                });
            entry.score += contribution;
        }
    }

    let mut out = merged.into_values().collect::<Vec<RetrievedDoc>>();
    sort_by_score(&mut out);
    out
}

fn sort_by_score(candidates: &mut [RetrievedDoc]) {
    candidates.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.doc_id.cmp(&right.doc_id))
            .then(left.text.cmp(&right.text))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParamValue, ParameterSet};

    fn doc(id: &str, text: &str, score: f64) -> RetrievedDoc {
        RetrievedDoc {
            doc_id: id.to_string(),
            name: id.to_string(),
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn rrf_rewards_agreement_between_lists() {
        let lexical = vec![doc("a", "x", 9.0), doc("b", "y", 5.0)];
        let semantic = vec![doc("b", "y", 0.9), doc("c", "z", 0.8)];
        let fused = fuse_rrf(&lexical, &semantic, 60);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].doc_id, "b");
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn title_boost_reorders_candidates() {
        let mut candidates = vec![doc("a", "x", 3.0), doc("b", "y", 2.0)];
        let boosted = BTreeSet::from(["b".to_string()]);
        boost_titles(&mut candidates, &boosted, 1.0);
        assert_eq!(candidates[0].doc_id, "b");
        assert_eq!(candidates[0].score, 4.0);
    }

    #[test]
    fn dense_variants_pick_encoder_roles() {
        let mut params = PipelineParams::from_parameter_set(&ParameterSet::from_pairs([
            ("retriever_type", ParamValue::from("dpr")),
            ("k_retriever", ParamValue::Int(3)),
            ("k_reader_total", ParamValue::Int(3)),
        ]))
        .expect("params validate");
        assert_eq!(
            Retriever::from_params(&params),
            Retriever::Dense {
                role: EncoderRole::Query
            }
        );
        assert_eq!(Retriever::from_params(&params).embedding_pass(), Some(true));

        params.retriever_type = RetrieverKind::Bm25;
        assert_eq!(Retriever::from_params(&params).embedding_pass(), None);
    }
}
