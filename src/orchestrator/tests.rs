use std::cell::Cell;
use std::collections::BTreeMap;

use super::*;
use crate::model::{Document, MetaFilter, ParamValue, RetrievedDoc};
use crate::optimizer::GaussianProcessOptimizer;
use crate::pipeline::QaPipeline;
use crate::space::OptionSpec;
use crate::tracker::SqliteTracker;

const GOLD: &str = r#"
{
  "data": [
    {
      "title": "Conges",
      "meta": {"theme": "travail"},
      "paragraphs": [
        {
          "context": "Le salarie acquiert deux jours et demi de conges par mois.",
          "document_id": "F1",
          "qas": [
            {"question": "Combien de jours de conges par mois ?", "answers": [{"text": "deux jours et demi"}]}
          ]
        }
      ]
    },
    {
      "title": "Carte grise",
      "meta": {"theme": "vehicule"},
      "paragraphs": [
        {
          "context": "La carte grise se demande sur le site de l'ANTS.",
          "document_id": "F2",
          "qas": [
            {"question": "Ou demander la carte grise ?", "answers": [{"text": "site de l'ANTS"}]}
          ]
        }
      ]
    }
  ]
}
"#;

/// Ranks documents by shared words and answers from a fixed key.
struct FakePipeline {
    documents: Vec<Document>,
    answer_key: BTreeMap<String, String>,
}

impl QaPipeline for FakePipeline {
    fn index(&mut self, documents: &[Document]) -> TuneResult<()> {
        self.documents = documents.to_vec();
        Ok(())
    }

    fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<RetrievedResult> {
        let query_words = query.to_lowercase();
        let mut ranked = self
            .documents
            .iter()
            .filter(|doc| {
                filter.is_none_or(|filter| doc.meta.get(&filter.field) == Some(&filter.value))
            })
            .map(|doc| RetrievedDoc {
                doc_id: doc.id.clone(),
                name: doc.name.clone(),
                text: doc.text.clone(),
                score: doc
                    .text
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|word| query_words.contains(*word))
                    .count() as f64,
            })
            .collect::<Vec<RetrievedDoc>>();
        ranked.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.doc_id.cmp(&right.doc_id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    fn read(&self, query: &str, candidates: &RetrievedResult) -> TuneResult<Vec<String>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.answer_key.get(query).cloned().into_iter().collect())
    }
}

/// Counts builds; refuses to build `dpr` pipelines.
struct FakeFactory {
    builds: Cell<usize>,
}

impl FakeFactory {
    fn new() -> Self {
        Self {
            builds: Cell::new(0),
        }
    }
}

impl PipelineFactory for FakeFactory {
    fn build(
        &self,
        params: &PipelineParams,
        _context: &ExecutionContext,
    ) -> TuneResult<Box<dyn QaPipeline>> {
        self.builds.set(self.builds.get() + 1);
        if params.retriever_type.as_str() == "dpr" {
            return Err(TuneError::RunExecution(
                "dense encoder weights missing".to_string(),
            ));
        }
        Ok(Box::new(FakePipeline {
            documents: Vec::new(),
            answer_key: BTreeMap::from([
                (
                    "Combien de jours de conges par mois ?".to_string(),
                    "deux jours et demi".to_string(),
                ),
                (
                    "Ou demander la carte grise ?".to_string(),
                    "site de l'ANTS.".to_string(),
                ),
            ]),
        }))
    }
}

struct Fixture {
    tracker: SqliteTracker,
    factory: FakeFactory,
    gold: GoldDataset,
    result_log: ResultLog,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        Self {
            tracker: SqliteTracker::open_in_memory().expect("tracker opens"),
            factory: FakeFactory::new(),
            gold: GoldDataset::from_json_str(GOLD).expect("gold parses"),
            result_log: ResultLog::new(dir.path().join("results.csv")),
            dir,
        }
    }

    fn orchestrator(&self) -> TuningOrchestrator<'_> {
        TuningOrchestrator::new(
            "test-exp",
            &self.tracker,
            &self.factory,
            &self.gold,
            &self.result_log,
        )
    }
}

fn base_params(retriever: &str) -> ParameterSet {
    ParameterSet::from_pairs([
        ("retriever_type", ParamValue::from(retriever)),
        ("k_retriever", ParamValue::Int(2)),
        ("k_reader_total", ParamValue::Int(1)),
    ])
}

#[test]
fn completed_run_merges_retrieval_reader_and_precision_metrics() {
    let fixture = Fixture::new();
    let record = fixture
        .orchestrator()
        .run_configuration(&base_params("bm25"))
        .expect("sweep infrastructure works");

    assert_eq!(record.status, RunStatus::Done);
    assert_eq!(record.metrics.get("recall"), Some(1.0));
    assert_eq!(record.metrics.get("mrr"), Some(1.0));
    assert_eq!(record.metrics.get("n_questions"), Some(2.0));
    assert_eq!(record.metrics.get("reader_topk_accuracy"), Some(1.0));
    assert_eq!(record.metrics.get("reader_top1_em"), Some(0.5));
    assert_eq!(record.metrics.get("precision"), Some(1.0));
    assert_eq!(record.run_id, run_identity(&base_params("bm25")));
}

#[test]
fn repeated_configuration_is_served_from_cache() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();

    let first = orchestrator
        .run_configuration(&base_params("bm25"))
        .expect("first run");
    let second = orchestrator
        .run_configuration(&base_params("bm25"))
        .expect("second run");

    assert_eq!(fixture.factory.builds.get(), 1);
    assert_eq!(first.status, RunStatus::Done);
    assert_eq!(second.status, RunStatus::Cached);
    assert_eq!(second.metrics, first.metrics);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(fixture.result_log.read_all().expect("log parses").rows.len(), 2);
}

#[test]
fn disabled_cache_executes_again_and_supersedes() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator().with_cache(false);

    orchestrator
        .run_configuration(&base_params("bm25"))
        .expect("first run");
    let second = orchestrator
        .run_configuration(&base_params("bm25"))
        .expect("second run");

    assert_eq!(fixture.factory.builds.get(), 2);
    assert_eq!(second.status, RunStatus::Done);
    let past = fixture
        .tracker
        .list_past_runs("test-exp")
        .expect("history lists");
    assert_eq!(past.len(), 1);
}

#[test]
fn one_failing_configuration_does_not_stop_the_grid() {
    let fixture = Fixture::new();
    let space = ParameterSpace::new(vec![
        OptionSpec::discrete(
            "retriever_type",
            vec![
                ParamValue::from("bm25"),
                ParamValue::from("dpr"),
                ParamValue::from("sbert"),
            ],
        ),
        OptionSpec::discrete("k_retriever", vec![ParamValue::Int(1)]),
        OptionSpec::discrete("k_reader_total", vec![ParamValue::Int(1)]),
    ]);

    let summary = fixture
        .orchestrator()
        .run_grid(&space, DEFAULT_TARGET_METRIC)
        .expect("grid completes");

    assert_eq!(summary.records.len(), 3);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed, 1);
    let failed = &summary.records[1];
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.metrics.is_empty());
    assert!(
        failed
            .error
            .as_deref()
            .is_some_and(|error| error.contains("dense encoder weights missing"))
    );

    let raw = std::fs::read_to_string(fixture.result_log.path()).expect("log readable");
    assert_eq!(
        raw.lines().filter(|line| line.starts_with("run_id,")).count(),
        1
    );
    assert_eq!(raw.lines().count(), 4);

    let table = fixture.result_log.read_all().expect("log parses");
    assert_eq!(table.rows.len(), 3);
    assert_eq!(table.rows[1]["status"], "failed");
    assert_eq!(table.rows[1]["recall"], "");
    assert_eq!(table.rows[2]["recall"], "1");
}

#[test]
fn failure_log_line_names_every_option() {
    assert_eq!(
        describe_params(&base_params("dpr")),
        "k_reader_total=1 k_retriever=2 retriever_type=dpr"
    );
}

#[test]
fn unwritable_details_dir_does_not_abort_the_run() {
    let fixture = Fixture::new();
    let blocked = fixture.dir.path().join("blocked");
    std::fs::write(&blocked, "not a directory").expect("file written");
    let params = base_params("bm25").with("filter_level", ParamValue::from("theme"));

    let record = fixture
        .orchestrator()
        .with_details_dir(blocked.join("details"))
        .run_configuration(&params)
        .expect("run completes");

    assert_eq!(record.status, RunStatus::Done);
    let past = fixture
        .tracker
        .get_run("test-exp", &record.run_id)
        .expect("tracker reads")
        .expect("run recorded");
    assert_eq!(past.status, Some(RunStatus::Done));
    assert_eq!(fixture.result_log.read_all().expect("log parses").rows.len(), 1);
}

#[test]
fn invalid_configuration_aborts_before_any_execution() {
    let fixture = Fixture::new();
    let space = ParameterSpace::new(vec![
        OptionSpec::discrete("retriever_type", vec![ParamValue::from("bm25")]),
        OptionSpec::discrete(
            "k_retriever",
            vec![ParamValue::Int(3), ParamValue::from("lots")],
        ),
        OptionSpec::discrete("k_reader_total", vec![ParamValue::Int(1)]),
    ]);

    let error = fixture
        .orchestrator()
        .run_grid(&space, DEFAULT_TARGET_METRIC)
        .expect_err("second configuration is invalid");
    assert!(format!("{error:#}").contains("k_retriever"));
    assert_eq!(fixture.factory.builds.get(), 0);
    assert!(!fixture.result_log.path().exists());
}

#[test]
fn filter_level_feeds_precision_and_details_are_written() {
    let fixture = Fixture::new();
    let details = fixture.dir.path().join("details");
    let params = base_params("bm25").with("filter_level", ParamValue::from("theme"));

    let record = fixture
        .orchestrator()
        .with_details_dir(details.clone())
        .run_configuration(&params)
        .expect("run completes");

    assert_eq!(record.metrics.get("precision_n_questions"), Some(2.0));
    assert!(details.join(format!("{}.json", record.run_id)).exists());
}

#[test]
fn loss_mapping_is_pure_and_bounded() {
    let params = base_params("bm25");
    let done = RunOutcome::Completed(MetricBundle::new().with("reader_topk_accuracy", 0.8))
        .into_record("r1", &params);
    assert!((objective_loss(&done, DEFAULT_TARGET_METRIC) - 0.2).abs() < 1e-12);

    let mut cached = done.clone();
    cached.status = RunStatus::Cached;
    assert_eq!(
        objective_loss(&cached, DEFAULT_TARGET_METRIC),
        objective_loss(&done, DEFAULT_TARGET_METRIC)
    );

    let failed = RunOutcome::Failed("boom".to_string()).into_record("r2", &params);
    assert_eq!(objective_loss(&failed, DEFAULT_TARGET_METRIC), 1.0);
    assert_eq!(objective_loss(&done, "missing_metric"), 1.0);

    let nan = RunOutcome::Completed(MetricBundle::new().with("reader_topk_accuracy", f64::NAN))
        .into_record("r3", &params);
    assert_eq!(objective_loss(&nan, DEFAULT_TARGET_METRIC), 1.0);
}

#[test]
fn optimization_tells_every_evaluation_and_writes_the_trace() {
    let fixture = Fixture::new();
    let space = ParameterSpace::new(vec![
        OptionSpec::discrete(
            "retriever_type",
            vec![ParamValue::from("bm25"), ParamValue::from("dpr")],
        ),
        OptionSpec::range("k_retriever", ParamValue::Int(1), ParamValue::Int(2)),
        OptionSpec::discrete("k_reader_total", vec![ParamValue::Int(1)]),
    ]);
    let search = space.search_space().expect("space is valid");
    let mut optimizer = GaussianProcessOptimizer::new(&search, 2, 9);
    let mut trace = OptimizerTrace::new("test-exp", DEFAULT_TARGET_METRIC, 9, &search);
    let trace_path = fixture.dir.path().join("traces").join("test-exp.json");

    let summary = fixture
        .orchestrator()
        .run_optimization(
            &space,
            &mut optimizer,
            &mut trace,
            4,
            DEFAULT_TARGET_METRIC,
            Some(&trace_path),
        )
        .expect("optimization completes");

    assert_eq!(summary.records.len(), 4);
    assert_eq!(optimizer.observations(), 4);
    assert_eq!(trace.points.len(), 4);
    for (point, record) in trace.points.iter().zip(&summary.records) {
        assert_eq!(point.run_id, record.run_id);
        assert_eq!(point.loss, objective_loss(record, DEFAULT_TARGET_METRIC));
        if record.status == RunStatus::Failed {
            assert_eq!(point.loss, 1.0);
        }
    }
    let written = OptimizerTrace::load(&trace_path).expect("trace written");
    assert_eq!(written.points.len(), 4);
    assert_eq!(fixture.result_log.read_all().expect("log parses").rows.len(), 4);
}
