use std::collections::HashSet;

use crate::error::{TuneError, TuneResult};
use crate::model::ParameterSet;

use super::ParameterSpace;

impl ParameterSpace {
    /// Number of configurations the grid expansion yields.
    pub fn grid_len(&self) -> usize {
        self.options
            .iter()
            .map(|option| option.values.len())
            .product()
    }

    /// Cartesian product, depth-first: the first option is the outermost loop
    /// and the last option varies fastest.
    pub fn grid(&self) -> TuneResult<Vec<ParameterSet>> {
        self.check_option_names()?;
        if let Some(empty) = self.options.iter().find(|option| option.values.is_empty()) {
            return Err(TuneError::config(format!(
                "option `{}` has no candidate values",
                empty.name
            )));
        }

        let mut out = Vec::with_capacity(self.grid_len());
        let mut cursor = vec![0_usize; self.options.len()];
        loop {
            let params = self
                .options
                .iter()
                .zip(cursor.iter())
                .fold(ParameterSet::default(), |acc, (option, &index)| {
                    acc.with(option.name.clone(), option.values[index].clone())
                });
            out.push(params);

            // Odometer increment from the last option backwards.
            let mut position = self.options.len();
            loop {
                if position == 0 {
                    return Ok(out);
                }
                position -= 1;
                cursor[position] += 1;
                if cursor[position] < self.options[position].values.len() {
                    break;
                }
                cursor[position] = 0;
            }
        }
    }

    pub(super) fn check_option_names(&self) -> TuneResult<()> {
        let mut seen = HashSet::new();
        for option in &self.options {
            if option.name.trim().is_empty() {
                return Err(TuneError::config("option name must not be empty"));
            }
            if !seen.insert(option.name.as_str()) {
                return Err(TuneError::config(format!(
                    "option `{}` is declared twice",
                    option.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::ParamValue;
    use crate::space::{OptionSpec, ParameterSpace};

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            OptionSpec::discrete("k_retriever", vec![ParamValue::Int(1), ParamValue::Int(5)]),
            OptionSpec::discrete(
                "retriever_type",
                vec![
                    ParamValue::from("bm25"),
                    ParamValue::from("sbert"),
                    ParamValue::from("hybrid"),
                ],
            ),
            OptionSpec::discrete("preprocessing", vec![ParamValue::Bool(true)]),
        ])
    }

    #[test]
    fn grid_length_is_product_of_cardinalities() {
        let space = space();
        let grid = space.grid().expect("grid expands");
        assert_eq!(grid.len(), 2 * 3);
        assert_eq!(space.grid_len(), 6);
    }

    #[test]
    fn grid_order_is_depth_first_and_stable() {
        let space = space();
        let first = space.grid().expect("grid expands");
        let second = space.grid().expect("grid expands");
        assert_eq!(first, second);

        let order = first
            .iter()
            .map(|params| {
                format!(
                    "{}/{}",
                    params.get("k_retriever").expect("k present"),
                    params.get("retriever_type").expect("type present")
                )
            })
            .collect::<Vec<String>>();
        assert_eq!(
            order,
            vec!["1/bm25", "1/sbert", "1/hybrid", "5/bm25", "5/sbert", "5/hybrid"]
        );
    }

    #[test]
    fn empty_value_list_is_configuration_error() {
        let space = ParameterSpace::new(vec![
            OptionSpec::discrete("k_retriever", vec![ParamValue::Int(1)]),
            OptionSpec::discrete("retriever_type", vec![]),
        ]);
        let error = space.grid().expect_err("empty list rejected");
        assert!(error.to_string().contains("retriever_type"));
    }

    #[test]
    fn duplicate_option_is_configuration_error() {
        let space = ParameterSpace::new(vec![
            OptionSpec::discrete("k_retriever", vec![ParamValue::Int(1)]),
            OptionSpec::discrete("k_retriever", vec![ParamValue::Int(2)]),
        ]);
        assert!(space.grid().is_err());
    }

    #[test]
    fn empty_space_yields_single_empty_configuration() {
        let space = ParameterSpace::new(Vec::new());
        let grid = space.grid().expect("empty space expands");
        assert_eq!(grid.len(), 1);
        assert!(grid[0].is_empty());
    }
}
