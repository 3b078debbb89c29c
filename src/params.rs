use serde::Serialize;

use crate::error::{TuneError, TuneResult};
use crate::model::{ParamValue, ParameterSet};

const KNOWN_OPTIONS: &[&str] = &[
    "retriever_type",
    "k_retriever",
    "k_title_retriever",
    "k_reader_per_candidate",
    "k_reader_total",
    "boosting",
    "split_by",
    "split_length",
    "preprocessing",
    "filter_level",
    "open_domain",
    "weighted_precision",
    "label_origin",
    "retriever_model_version",
    "reader_model_version",
];

pub const DEFAULT_LABEL_ORIGIN: &str = "gold_label";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    Bm25,
    Sbert,
    Dpr,
    Title,
    TitleBm25,
    Hybrid,
}

impl RetrieverKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bm25" | "sparse" => Some(Self::Bm25),
            "sbert" | "dense" => Some(Self::Sbert),
            "dpr" => Some(Self::Dpr),
            "title" => Some(Self::Title),
            "title_bm25" => Some(Self::TitleBm25),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bm25 => "bm25",
            Self::Sbert => "sbert",
            Self::Dpr => "dpr",
            Self::Title => "title",
            Self::TitleBm25 => "title_bm25",
            Self::Hybrid => "hybrid",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitBy {
    Word,
    Sentence,
    Passage,
}

impl SplitBy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "word" => Some(Self::Word),
            "sentence" => Some(Self::Sentence),
            "passage" => Some(Self::Passage),
            _ => None,
        }
    }
}

/// Typed, validated view of a [`ParameterSet`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineParams {
    pub retriever_type: RetrieverKind,
    pub k_retriever: usize,
    pub k_title_retriever: usize,
    pub k_reader_per_candidate: usize,
    pub k_reader_total: usize,
    pub boosting: f64,
    pub split_by: SplitBy,
    pub split_length: usize,
    pub preprocessing: bool,
    pub filter_level: Option<String>,
    pub open_domain: bool,
    pub weighted_precision: bool,
    pub label_origin: String,
    /// Opaque model tags; they only separate run identities.
    pub retriever_model_version: Option<String>,
    pub reader_model_version: Option<String>,
}

impl PipelineParams {
    pub fn from_parameter_set(params: &ParameterSet) -> TuneResult<Self> {
        if let Some(unknown) = params
            .names()
            .find(|name| !KNOWN_OPTIONS.contains(&name.as_str()))
        {
            return Err(TuneError::config(format!("unknown option `{unknown}`")));
        }

        let retriever_name = required_text(params, "retriever_type")?;
        let retriever_type = RetrieverKind::parse(&retriever_name).ok_or_else(|| {
            TuneError::config(format!(
                "retriever_type `{retriever_name}` is not one of bm25, sbert, dpr, title, title_bm25, hybrid"
            ))
        })?;

        let split_name = optional_text(params, "split_by")?.unwrap_or_else(|| "word".to_string());
        let split_by = SplitBy::parse(&split_name).ok_or_else(|| {
            TuneError::config(format!(
                "split_by `{split_name}` is not one of word, sentence, passage"
            ))
        })?;

        let boosting = match params.get("boosting") {
            None | Some(ParamValue::Null) => 1.0,
            Some(value) => value
                .as_f64()
                .filter(|boost| boost.is_finite() && *boost > 0.0)
                .ok_or_else(|| {
                    TuneError::config(format!("boosting must be a positive number, got {value}"))
                })?,
        };

        Ok(Self {
            retriever_type,
            k_retriever: positive_count(params, "k_retriever", None)?,
            k_title_retriever: positive_count(params, "k_title_retriever", Some(10))?,
            k_reader_per_candidate: positive_count(params, "k_reader_per_candidate", Some(1))?,
            k_reader_total: positive_count(params, "k_reader_total", None)?,
            boosting,
            split_by,
            split_length: positive_count(params, "split_length", Some(1000))?,
            preprocessing: optional_bool(params, "preprocessing", true)?,
            filter_level: optional_text(params, "filter_level")?,
            open_domain: optional_bool(params, "open_domain", false)?,
            weighted_precision: optional_bool(params, "weighted_precision", true)?,
            label_origin: optional_text(params, "label_origin")?
                .unwrap_or_else(|| DEFAULT_LABEL_ORIGIN.to_string()),
            retriever_model_version: opaque_text(params, "retriever_model_version"),
            reader_model_version: opaque_text(params, "reader_model_version"),
        })
    }
}

fn positive_count(params: &ParameterSet, name: &str, default: Option<usize>) -> TuneResult<usize> {
    match (params.get(name), default) {
        (None | Some(ParamValue::Null), Some(fallback)) => Ok(fallback),
        (None | Some(ParamValue::Null), None) => {
            Err(TuneError::config(format!("required option `{name}` is missing")))
        }
        (Some(ParamValue::Int(value)), _) if *value > 0 => Ok(*value as usize),
        (Some(other), _) => Err(TuneError::config(format!(
            "option `{name}` must be a positive integer, got {} `{other}`",
            other.type_name()
        ))),
    }
}

fn required_text(params: &ParameterSet, name: &str) -> TuneResult<String> {
    optional_text(params, name)?
        .ok_or_else(|| TuneError::config(format!("required option `{name}` is missing")))
}

fn optional_text(params: &ParameterSet, name: &str) -> TuneResult<Option<String>> {
    match params.get(name) {
        None | Some(ParamValue::Null) => Ok(None),
        Some(ParamValue::Text(value)) if !value.trim().is_empty() => Ok(Some(value.clone())),
        Some(ParamValue::Text(_)) => Ok(None),
        Some(other) => Err(TuneError::config(format!(
            "option `{name}` must be text, got {} `{other}`",
            other.type_name()
        ))),
    }
}

fn opaque_text(params: &ParameterSet, name: &str) -> Option<String> {
    match params.get(name) {
        None | Some(ParamValue::Null) => None,
        Some(value) => Some(value.to_string()),
    }
}

fn optional_bool(params: &ParameterSet, name: &str, default: bool) -> TuneResult<bool> {
    match params.get(name) {
        None | Some(ParamValue::Null) => Ok(default),
        Some(ParamValue::Bool(value)) => Ok(*value),
        Some(other) => Err(TuneError::config(format!(
            "option `{name}` must be a bool, got {} `{other}`",
            other.type_name()
        ))),
    }
}
