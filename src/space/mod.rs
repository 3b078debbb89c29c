//! Declarative parameter specifications and their two expansions.
//!
//! Grid mode enumerates the cartesian product of every option's values.
//! Optimization mode turns the same input into typed search dimensions and
//! converts between optimizer vectors and named [`ParameterSet`]s.

mod grid;
mod search;

use serde::{Deserialize, Serialize};

use crate::model::ParamValue;

pub use self::search::{Dimension, SearchSpace};

/// One option of the sweep and its candidate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub values: Vec<ParamValue>,
    /// Treat a two-element numeric list as a continuous or integer range.
    #[serde(default)]
    pub range: bool,
}

impl OptionSpec {
    #[cfg(test)]
    pub fn discrete(name: &str, values: Vec<ParamValue>) -> Self {
        Self {
            name: name.to_string(),
            values,
            range: false,
        }
    }

    #[cfg(test)]
    pub fn range(name: &str, low: ParamValue, high: ParamValue) -> Self {
        Self {
            name: name.to_string(),
            values: vec![low, high],
            range: true,
        }
    }
}

/// Ordered list of option specs; input order drives grid enumeration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace {
    options: Vec<OptionSpec>,
}

impl ParameterSpace {
    pub fn new(options: Vec<OptionSpec>) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &[OptionSpec] {
        &self.options
    }
}
