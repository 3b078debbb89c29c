use std::collections::BTreeMap;

use super::*;
use crate::model::{ParamValue, ParameterSet};

fn params(retriever: &str) -> PipelineParams {
    PipelineParams::from_parameter_set(&ParameterSet::from_pairs([
        ("retriever_type", ParamValue::from(retriever)),
        ("k_retriever", ParamValue::Int(2)),
        ("k_reader_total", ParamValue::Int(2)),
        ("split_by", ParamValue::from("passage")),
        ("split_length", ParamValue::Int(1)),
    ]))
    .expect("pipeline params validate")
}

fn documents() -> Vec<Document> {
    let doc = |id: &str, title: &str, text: &str, theme: &str| Document {
        id: id.to_string(),
        name: format!("{id}--{title}"),
        text: text.to_string(),
        meta: BTreeMap::from([
            ("title".to_string(), title.to_string()),
            ("theme".to_string(), theme.to_string()),
        ]),
    };
    vec![
        doc(
            "F1",
            "Conges payes",
            "Chaque salarie acquiert deux jours et demi de conges payes par mois.\n\nLes conges se prennent entre mai et octobre.",
            "travail",
        ),
        doc(
            "F2",
            "Carte grise",
            "La carte grise se demande sur le site de l'ANTS.",
            "vehicule",
        ),
    ]
}

#[test]
fn every_retriever_variant_finds_the_relevant_document() {
    for retriever in ["bm25", "sbert", "dpr", "title_bm25", "hybrid"] {
        let factory = SqlitePipelineFactory::in_memory();
        let mut pipeline = factory
            .build(&params(retriever), &ExecutionContext::default())
            .expect("pipeline builds");
        pipeline.index(&documents()).expect("documents index");

        let hits = pipeline
            .retrieve("demande de carte grise", 2, None)
            .expect("retrieval runs");
        assert_eq!(
            hits.first().map(|doc| doc.doc_id.as_str()),
            Some("F2"),
            "retriever {retriever}"
        );
    }
}

#[test]
fn title_retriever_matches_titles() {
    let factory = SqlitePipelineFactory::in_memory();
    let mut pipeline = factory
        .build(&params("title"), &ExecutionContext::default())
        .expect("pipeline builds");
    pipeline.index(&documents()).expect("documents index");

    let hits = pipeline.retrieve("conges", 5, None).expect("retrieval runs");
    assert_eq!(hits.len(), 2, "both F1 passages share the title");
    assert!(hits.iter().all(|doc| doc.doc_id == "F1"));
}

#[test]
fn reindexing_replaces_previous_contents() {
    let path = tempfile::tempdir().expect("tempdir");
    let factory = SqlitePipelineFactory::new(path.path().join("passages.sqlite"));

    let mut first = factory
        .build(&params("bm25"), &ExecutionContext::default())
        .expect("pipeline builds");
    first.index(&documents()).expect("documents index");

    let mut second = factory
        .build(&params("bm25"), &ExecutionContext::default())
        .expect("pipeline builds");
    second.index(&documents()[1..]).expect("documents index");

    let hits = first.retrieve("conges", 5, None).expect("retrieval runs");
    assert!(hits.is_empty(), "shared index was rewritten by the second run");
}

#[test]
fn filter_and_reader_flow_through_the_pipeline() {
    let factory = SqlitePipelineFactory::in_memory();
    let mut pipeline = factory
        .build(&params("bm25"), &ExecutionContext::default())
        .expect("pipeline builds");
    pipeline.index(&documents()).expect("documents index");

    let filter = MetaFilter {
        field: "theme".to_string(),
        value: "vehicule".to_string(),
    };
    let hits = pipeline
        .retrieve("conges carte", 5, Some(&filter))
        .expect("filtered retrieval runs");
    assert!(hits.iter().all(|doc| doc.doc_id == "F2"));

    let answers = pipeline
        .read("ou demander la carte grise", &hits)
        .expect("reader runs");
    assert!(!answers.is_empty());
    assert!(answers.len() <= 2);
}
