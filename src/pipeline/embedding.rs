use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::util::normalize_whitespace;

pub const EMBEDDING_DIM: usize = 256;

/// Which side of a bi-encoder a payload is embedded with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EncoderRole {
    /// One shared encoder for queries and passages.
    Symmetric,
    Query,
    Passage,
}

impl EncoderRole {
    fn feature_prefix(self) -> &'static str {
        match self {
            Self::Symmetric => "",
            Self::Query => "q",
            Self::Passage => "p",
        }
    }
}

/// Hashed bag-of-words and bigram embedding, L2-normalized.
///
/// Query and passage roles hash word features identically so that the two
/// towers share a vocabulary; only bigram features are role-specific.
pub fn embed_text(payload: &str, role: EncoderRole, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let features = tokenize_payload(payload, role);

    if features.is_empty() {
        return vector;
    }

    for feature in features {
        let hash = stable_hash(&feature);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>()
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Lowercased alphanumeric words, shared by the lexical reader and embedder.
pub fn word_tokens(text: &str) -> Vec<String> {
    normalize_whitespace(text)
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect()
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn tokenize_payload(payload: &str, role: EncoderRole) -> Vec<String> {
    let words = word_tokens(payload);
    let prefix = role.feature_prefix();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b{prefix}:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    for value in values {
        *value /= norm;
    }
}
