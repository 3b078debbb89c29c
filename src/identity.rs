use crate::model::ParameterSet;
use crate::util::sha256_hex;

/// Hex characters kept from the SHA-256 digest.
///
/// 12 hex characters are 48 bits: the birthday collision probability stays
/// around 1e-5 for sweeps of 75 000 configurations. Callers must not treat
/// the id as collision-free for much larger sweeps.
pub const RUN_ID_HEX_LEN: usize = 12;

/// Deterministic, option-order-independent identifier of a configuration.
pub fn run_identity(params: &ParameterSet) -> String {
    let mut digest = sha256_hex(&canonical_text(params));
    digest.truncate(RUN_ID_HEX_LEN);
    digest
}

fn canonical_text(params: &ParameterSet) -> String {
    let mut lines = params
        .iter()
        .map(|(name, value)| format!("{name}={}", value.canonical()))
        .collect::<Vec<String>>();
    lines.sort();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamValue;

    #[test]
    fn identity_ignores_option_insertion_order() {
        let forward = ParameterSet::from_pairs([
            ("k_retriever", ParamValue::Int(5)),
            ("retriever_type", ParamValue::from("bm25")),
            ("boosting", ParamValue::Float(1.5)),
        ]);
        let reversed = ParameterSet::from_pairs([
            ("boosting", ParamValue::Float(1.5)),
            ("retriever_type", ParamValue::from("bm25")),
            ("k_retriever", ParamValue::Int(5)),
        ]);

        assert_eq!(run_identity(&forward), run_identity(&reversed));
        assert_eq!(run_identity(&forward).len(), RUN_ID_HEX_LEN);
    }

    #[test]
    fn identity_separates_distinct_configurations() {
        let fixtures = [
            ParameterSet::from_pairs([("k_retriever", ParamValue::Int(5))]),
            ParameterSet::from_pairs([("k_retriever", ParamValue::Int(6))]),
            ParameterSet::from_pairs([("k_retriever", ParamValue::Float(5.0))]),
            ParameterSet::from_pairs([("k_retriever", ParamValue::from("5"))]),
            ParameterSet::from_pairs([("k_reader", ParamValue::Int(5))]),
            ParameterSet::from_pairs([
                ("k_retriever", ParamValue::Int(5)),
                ("filter_level", ParamValue::Null),
            ]),
        ];

        let ids = fixtures
            .iter()
            .map(run_identity)
            .collect::<std::collections::HashSet<String>>();
        assert_eq!(ids.len(), fixtures.len());
    }

    #[test]
    fn identity_is_lowercase_hex() {
        let params = ParameterSet::from_pairs([("retriever_type", ParamValue::from("sbert"))]);
        let id = run_identity(&params);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }
}
