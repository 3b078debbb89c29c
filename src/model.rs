use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// One option value of a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Typed text encoding used for hashing; `5` and `5.0` encode differently.
    pub fn canonical(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(value) => format!("bool:{value}"),
            Self::Int(value) => format!("int:{value}"),
            Self::Float(value) => format!("float:{value:?}"),
            Self::Text(value) => format!(
                "text:{}",
                serde_json::to_string(value).unwrap_or_else(|_| value.clone())
            ),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Immutable mapping of option name to value for one experiment configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    options: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        Self {
            options: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.options.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.options.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.options.keys()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub(crate) fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.options.insert(name.into(), value);
        self
    }
}

/// Named metrics produced by one scoring pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricBundle {
    values: BTreeMap<String, f64>,
}

impl MetricBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn merged(mut self, other: MetricBundle) -> Self {
        self.values.extend(other.values);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.values.iter()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, f64)> for MetricBundle {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
    Cached,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cached => "cached",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "cached" => Some(Self::Cached),
            _ => None,
        }
    }
}

/// Outcome of one attempted configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub params: ParameterSet,
    pub metrics: MetricBundle,
    pub status: RunStatus,
    pub error: Option<String>,
    pub recorded_at: String,
}

/// Ground-truth annotation for one question, aggregated over raw labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldLabel {
    pub question: String,
    pub document_ids: BTreeSet<String>,
    pub answers: BTreeSet<String>,
    pub origin: String,
    pub meta: BTreeMap<String, String>,
}

impl GoldLabel {
    /// Answer strings in open-domain mode, document ids otherwise.
    pub fn relevant(&self, open_domain: bool) -> &BTreeSet<String> {
        if open_domain {
            &self.answers
        } else {
            &self.document_ids
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub text: String,
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDoc {
    pub doc_id: String,
    pub name: String,
    pub text: String,
    pub score: f64,
}

/// Ranked retrieval output, rank 1 first.
pub type RetrievedResult = Vec<RetrievedDoc>;

/// Equality filter on document metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFilter {
    pub field: String,
    pub value: String,
}
