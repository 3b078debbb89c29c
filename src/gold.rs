//! SQuAD-shaped evaluation datasets: documents to index plus gold labels.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

use crate::model::{Document, GoldLabel};
use crate::params::DEFAULT_LABEL_ORIGIN;
use crate::util::{normalize_whitespace, sha256_hex};

const GENERATED_DOC_ID_LEN: usize = 16;

#[derive(Debug, Deserialize)]
struct SquadFile {
    data: Vec<SquadArticle>,
}

#[derive(Debug, Deserialize)]
struct SquadArticle {
    #[serde(default)]
    title: String,
    #[serde(default)]
    meta: BTreeMap<String, String>,
    paragraphs: Vec<SquadParagraph>,
}

#[derive(Debug, Deserialize)]
struct SquadParagraph {
    context: String,
    #[serde(default, alias = "doc_id")]
    document_id: Option<String>,
    #[serde(default)]
    meta: BTreeMap<String, String>,
    #[serde(default)]
    qas: Vec<SquadQuestion>,
}

#[derive(Debug, Deserialize)]
struct SquadQuestion {
    question: String,
    #[serde(default)]
    answers: Vec<SquadAnswer>,
    #[serde(default)]
    is_impossible: bool,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    meta: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SquadAnswer {
    text: String,
    #[serde(default, alias = "doc_id")]
    document_id: Option<String>,
}

/// One unaggregated answer annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLabel {
    pub question: String,
    pub document_id: String,
    pub answer: Option<String>,
    pub origin: String,
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GoldDataset {
    pub documents: Vec<Document>,
    pub labels: Vec<RawLabel>,
}

impl GoldDataset {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read gold dataset {}", path.display()))?;
        let dataset = Self::from_json_str(&raw)
            .with_context(|| format!("failed to parse gold dataset {}", path.display()))?;

        info!(
            path = %path.display(),
            documents = dataset.documents.len(),
            labels = dataset.labels.len(),
            "loaded gold dataset"
        );
        Ok(dataset)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: SquadFile = serde_json::from_str(raw)?;
        let mut dataset = Self::default();
        let mut seen_ids = BTreeSet::new();

        for article in file.data {
            for paragraph in article.paragraphs {
                let context = paragraph.context.trim().to_string();
                if context.is_empty() {
                    continue;
                }

                let id = paragraph.document_id.clone().unwrap_or_else(|| {
                    let mut digest = sha256_hex(&format!("{}\n{}", article.title, context));
                    digest.truncate(GENERATED_DOC_ID_LEN);
                    digest
                });
                if !seen_ids.insert(id.clone()) {
                    bail!("document id `{id}` appears twice");
                }

                let mut meta = article.meta.clone();
                meta.extend(paragraph.meta.clone());
                if !article.title.is_empty() {
                    meta.insert("title".to_string(), article.title.clone());
                }

                for qa in &paragraph.qas {
                    let question = normalize_whitespace(&qa.question);
                    if question.is_empty() {
                        continue;
                    }
                    let origin = qa
                        .origin
                        .clone()
                        .unwrap_or_else(|| DEFAULT_LABEL_ORIGIN.to_string());
                    let mut label_meta = meta.clone();
                    label_meta.extend(qa.meta.clone());

                    let answers = qa
                        .answers
                        .iter()
                        .filter(|answer| !qa.is_impossible && !answer.text.trim().is_empty())
                        .collect::<Vec<&SquadAnswer>>();
                    if answers.is_empty() {
                        dataset.labels.push(RawLabel {
                            question,
                            document_id: id.clone(),
                            answer: None,
                            origin,
                            meta: label_meta,
                        });
                        continue;
                    }
                    for answer in answers {
                        dataset.labels.push(RawLabel {
                            question: question.clone(),
                            document_id: answer.document_id.clone().unwrap_or_else(|| id.clone()),
                            answer: Some(answer.text.clone()),
                            origin: origin.clone(),
                            meta: label_meta.clone(),
                        });
                    }
                }

                dataset.documents.push(Document {
                    name: format!("{id}--{}", article.title),
                    id,
                    text: context,
                    meta,
                });
            }
        }

        Ok(dataset)
    }

    /// One label per question for `origin`, with document ids and answers
    /// deduplicated across the raw labels.
    pub fn aggregated_labels(&self, origin: &str) -> BTreeMap<String, GoldLabel> {
        let mut out = BTreeMap::<String, GoldLabel>::new();
        for raw in self.labels.iter().filter(|raw| raw.origin == origin) {
            let label = out
                .entry(raw.question.clone())
                .or_insert_with(|| GoldLabel {
                    question: raw.question.clone(),
                    document_ids: BTreeSet::new(),
                    answers: BTreeSet::new(),
                    origin: raw.origin.clone(),
                    meta: BTreeMap::new(),
                });
            label.document_ids.insert(raw.document_id.clone());
            if let Some(answer) = &raw.answer {
                label.answers.insert(answer.clone());
            }
            for (key, value) in &raw.meta {
                label.meta.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        out
    }
}

/// Answer sets keyed by question, as consumed by the reader scorer.
pub fn gold_answers(labels: &BTreeMap<String, GoldLabel>) -> BTreeMap<String, BTreeSet<String>> {
    labels
        .iter()
        .map(|(question, label)| (question.clone(), label.answers.clone()))
        .collect()
}
