use serde::{Deserialize, Serialize};

use crate::error::{TuneError, TuneResult};
use crate::model::{ParamValue, ParameterSet};

use super::ParameterSpace;

/// One coordinate of the optimizer's search vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dimension {
    /// Coordinate is the index into `choices`.
    Categorical {
        name: String,
        choices: Vec<ParamValue>,
    },
    Integer {
        name: String,
        low: i64,
        high: i64,
    },
    Real {
        name: String,
        low: f64,
        high: f64,
    },
}

impl Dimension {
    pub fn name(&self) -> &str {
        match self {
            Self::Categorical { name, .. } | Self::Integer { name, .. } | Self::Real { name, .. } => {
                name
            }
        }
    }

    /// Inclusive coordinate bounds.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Self::Categorical { choices, .. } => (0.0, choices.len().saturating_sub(1) as f64),
            Self::Integer { low, high, .. } => (*low as f64, *high as f64),
            Self::Real { low, high, .. } => (*low, *high),
        }
    }

    pub fn is_discrete(&self) -> bool {
        !matches!(self, Self::Real { .. })
    }

    /// Clamp into bounds and round discrete coordinates.
    pub fn snap(&self, coordinate: f64) -> f64 {
        let (low, high) = self.bounds();
        let clamped = coordinate.clamp(low, high);
        if self.is_discrete() {
            clamped.round()
        } else {
            clamped
        }
    }

    fn decode_value(&self, coordinate: f64) -> TuneResult<ParamValue> {
        if !coordinate.is_finite() {
            return Err(TuneError::config(format!(
                "non-finite coordinate for `{}`",
                self.name()
            )));
        }
        let snapped = self.snap(coordinate);
        Ok(match self {
            Self::Categorical { choices, .. } => choices[snapped as usize].clone(),
            Self::Integer { .. } => ParamValue::Int(snapped as i64),
            Self::Real { .. } => ParamValue::Float(snapped),
        })
    }

    fn encode_value(&self, value: &ParamValue) -> TuneResult<f64> {
        match self {
            Self::Categorical { name, choices } => choices
                .iter()
                .position(|choice| choice == value)
                .map(|index| index as f64)
                .ok_or_else(|| {
                    TuneError::config(format!("value `{value}` is not a choice of `{name}`"))
                }),
            Self::Integer { name, .. } | Self::Real { name, .. } => value
                .as_f64()
                .map(|number| self.snap(number))
                .ok_or_else(|| TuneError::config(format!("value of `{name}` must be numeric"))),
        }
    }
}

/// Typed dimensions plus the constants excluded from the search vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    dimensions: Vec<Dimension>,
    fixed: Vec<(String, ParamValue)>,
}

impl ParameterSpace {
    /// Infer one search dimension per option.
    ///
    /// `range` options need exactly two numeric values with low < high and
    /// become integer ranges when both ends are integers. Other options with
    /// two or more values become categorical; single values become fixed.
    pub fn search_space(&self) -> TuneResult<SearchSpace> {
        self.check_option_names()?;

        let mut dimensions = Vec::new();
        let mut fixed = Vec::new();
        for option in &self.options {
            let name = option.name.clone();
            if option.range {
                let [low, high] = option.values.as_slice() else {
                    return Err(TuneError::config(format!(
                        "range option `{name}` needs exactly two values, got {}",
                        option.values.len()
                    )));
                };
                let dimension = match (low, high) {
                    (ParamValue::Int(low), ParamValue::Int(high)) if low < high => {
                        Dimension::Integer {
                            name,
                            low: *low,
                            high: *high,
                        }
                    }
                    _ => match (low.as_f64(), high.as_f64()) {
                        (Some(low), Some(high)) if low < high && low.is_finite() && high.is_finite() => {
                            Dimension::Real { name, low, high }
                        }
                        _ => {
                            return Err(TuneError::config(format!(
                                "range option `{name}` needs numeric bounds with low < high"
                            )));
                        }
                    },
                };
                dimensions.push(dimension);
                continue;
            }

            match option.values.len() {
                0 => {
                    return Err(TuneError::config(format!(
                        "option `{name}` has no candidate values"
                    )));
                }
                1 => fixed.push((name, option.values[0].clone())),
                _ => dimensions.push(Dimension::Categorical {
                    name,
                    choices: option.values.clone(),
                }),
            }
        }

        Ok(SearchSpace { dimensions, fixed })
    }
}

impl SearchSpace {
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[cfg(test)]
    pub fn fixed(&self) -> &[(String, ParamValue)] {
        &self.fixed
    }

    pub fn ndim(&self) -> usize {
        self.dimensions.len()
    }

    /// Named configuration for an optimizer vector.
    pub fn decode(&self, vector: &[f64]) -> TuneResult<ParameterSet> {
        if vector.len() != self.dimensions.len() {
            return Err(TuneError::config(format!(
                "search vector has {} coordinates, space has {} dimensions",
                vector.len(),
                self.dimensions.len()
            )));
        }

        let mut params = self
            .fixed
            .iter()
            .fold(ParameterSet::default(), |acc, (name, value)| {
                acc.with(name.clone(), value.clone())
            });
        for (dimension, coordinate) in self.dimensions.iter().zip(vector) {
            params = params.with(dimension.name(), dimension.decode_value(*coordinate)?);
        }
        Ok(params)
    }

    /// Optimizer vector for a named configuration; fixed options are ignored.
    pub fn encode(&self, params: &ParameterSet) -> TuneResult<Vec<f64>> {
        self.dimensions
            .iter()
            .map(|dimension| {
                let value = params.get(dimension.name()).ok_or_else(|| {
                    TuneError::config(format!("option `{}` is missing", dimension.name()))
                })?;
                dimension.encode_value(value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::OptionSpec;

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            OptionSpec::discrete(
                "retriever_type",
                vec![ParamValue::from("bm25"), ParamValue::from("sbert")],
            ),
            OptionSpec::range("k_retriever", ParamValue::Int(1), ParamValue::Int(20)),
            OptionSpec::range("boosting", ParamValue::Float(0.5), ParamValue::Int(3)),
            OptionSpec::discrete("k_reader_total", vec![ParamValue::Int(5)]),
        ])
    }

    #[test]
    fn dimension_types_are_inferred_from_values() {
        let search = space().search_space().expect("space is valid");
        assert_eq!(search.ndim(), 3);
        assert!(matches!(search.dimensions()[0], Dimension::Categorical { .. }));
        assert_eq!(
            search.dimensions()[1],
            Dimension::Integer {
                name: "k_retriever".to_string(),
                low: 1,
                high: 20
            }
        );
        assert_eq!(
            search.dimensions()[2],
            Dimension::Real {
                name: "boosting".to_string(),
                low: 0.5,
                high: 3.0
            }
        );
        assert_eq!(
            search.fixed(),
            &[("k_reader_total".to_string(), ParamValue::Int(5))]
        );
    }

    #[test]
    fn decode_snaps_and_includes_fixed_options() {
        let search = space().search_space().expect("space is valid");
        let params = search.decode(&[0.8, 7.4, 9.0]).expect("vector decodes");

        assert_eq!(params.get("retriever_type"), Some(&ParamValue::from("sbert")));
        assert_eq!(params.get("k_retriever"), Some(&ParamValue::Int(7)));
        assert_eq!(params.get("boosting"), Some(&ParamValue::Float(3.0)));
        assert_eq!(params.get("k_reader_total"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn encode_inverts_decode_on_snapped_points() {
        let search = space().search_space().expect("space is valid");
        let vector = vec![1.0, 12.0, 1.25];
        let params = search.decode(&vector).expect("vector decodes");
        assert_eq!(search.encode(&params).expect("params encode"), vector);
    }

    #[test]
    fn malformed_ranges_and_vectors_are_rejected() {
        let three = ParameterSpace::new(vec![OptionSpec {
            name: "k_retriever".to_string(),
            values: vec![ParamValue::Int(1), ParamValue::Int(2), ParamValue::Int(3)],
            range: true,
        }]);
        assert!(three.search_space().is_err());

        let textual = ParameterSpace::new(vec![OptionSpec::range(
            "split_by",
            ParamValue::from("word"),
            ParamValue::from("passage"),
        )]);
        assert!(textual.search_space().is_err());

        let inverted = ParameterSpace::new(vec![OptionSpec::range(
            "k_retriever",
            ParamValue::Int(9),
            ParamValue::Int(2),
        )]);
        assert!(inverted.search_space().is_err());

        let search = space().search_space().expect("space is valid");
        assert!(search.decode(&[0.0, 1.0]).is_err());
        assert!(search.decode(&[0.0, f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn categorical_encode_rejects_unknown_choice() {
        let search = space().search_space().expect("space is valid");
        let params = ParameterSet::from_pairs([
            ("retriever_type", ParamValue::from("dpr")),
            ("k_retriever", ParamValue::Int(3)),
            ("boosting", ParamValue::Float(1.0)),
        ]);
        assert!(search.encode(&params).is_err());
    }
}
