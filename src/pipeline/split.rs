use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{TuneError, TuneResult};
use crate::model::Document;
use crate::params::SplitBy;
use crate::util::normalize_whitespace;

/// One indexable unit cut from a [`Document`]; keeps the parent id.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub doc_id: String,
    pub name: String,
    pub title: String,
    pub text: String,
    pub meta: BTreeMap<String, String>,
}

/// Cuts documents into passages according to `split_by` and `split_length`.
#[derive(Debug, Clone)]
pub struct DocumentSplitter {
    split_by: SplitBy,
    split_length: usize,
    preprocessing: bool,
    sentence_boundary: Regex,
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(str::to_string)
        .collect()
}

impl DocumentSplitter {
    pub fn new(split_by: SplitBy, split_length: usize, preprocessing: bool) -> TuneResult<Self> {
        let sentence_boundary = Regex::new(r"[.!?]+\s+").map_err(|error| {
            TuneError::RunExecution(format!("failed to compile sentence splitter: {error}"))
        })?;
        Ok(Self {
            split_by,
            split_length: split_length.max(1),
            preprocessing,
            sentence_boundary,
        })
    }

    /// Passages of at most `split_length` units; whitespace is collapsed when
    /// `preprocessing` is on, after paragraph boundaries have been used.
    pub fn split(&self, document: &Document) -> Vec<Passage> {
        let units = match self.split_by {
            SplitBy::Word => document
                .text
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<String>>(),
            SplitBy::Sentence => self.split_sentences(&document.text),
            SplitBy::Passage => split_paragraphs(&document.text),
        };
        let joiner = if self.split_by == SplitBy::Passage {
            "\n\n"
        } else {
            " "
        };
        let title = document.meta.get("title").cloned().unwrap_or_default();

        units
            .chunks(self.split_length)
            .map(|chunk| chunk.join(joiner))
            .map(|text| {
                if self.preprocessing {
                    normalize_whitespace(&text)
                } else {
                    text
                }
            })
            .filter(|text| !text.trim().is_empty())
            .map(|text| Passage {
                doc_id: document.id.clone(),
                name: document.name.clone(),
                title: title.clone(),
                text,
                meta: document.meta.clone(),
            })
            .collect()
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0;
        for boundary in self.sentence_boundary.find_iter(text) {
            sentences.push(text[start..boundary.end()].trim().to_string());
            start = boundary.end();
        }
        if start < text.len() {
            sentences.push(text[start..].trim().to_string());
        }
        sentences.retain(|sentence| !sentence.is_empty());
        sentences
    }
}
