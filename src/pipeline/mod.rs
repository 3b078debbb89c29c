//! Pipeline-under-test: the capability traits the orchestrator drives, plus
//! a SQLite-backed reference implementation.

mod embedding;
mod reader;
mod retrieval;
mod split;
mod store;

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::TuneResult;
use crate::model::{Document, MetaFilter, RetrievedResult};
use crate::params::PipelineParams;

pub use self::reader::OverlapReader;
pub use self::retrieval::Retriever;
pub use self::split::{DocumentSplitter, Passage};
pub use self::store::PassageStore;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Device {
    Cpu,
    Gpu(u32),
}

/// Resources a pipeline is built with, passed explicitly by the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ExecutionContext {
    pub device: Device,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
        }
    }
}

/// A retriever/reader pair over a writable document index.
pub trait QaPipeline {
    /// Replace the index contents with `documents` and refresh embeddings.
    fn index(&mut self, documents: &[Document]) -> TuneResult<()>;

    fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<RetrievedResult>;

    /// Ranked answer strings for `query` read from `candidates`.
    fn read(&self, query: &str, candidates: &RetrievedResult) -> TuneResult<Vec<String>>;
}

pub trait PipelineFactory {
    fn build(
        &self,
        params: &PipelineParams,
        context: &ExecutionContext,
    ) -> TuneResult<Box<dyn QaPipeline>>;
}

/// Builds [`IndexedPipeline`]s over one passage database.
#[derive(Debug, Clone)]
pub struct SqlitePipelineFactory {
    db_path: Option<PathBuf>,
}

impl SqlitePipelineFactory {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path: Some(db_path),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self { db_path: None }
    }
}

impl PipelineFactory for SqlitePipelineFactory {
    fn build(
        &self,
        params: &PipelineParams,
        context: &ExecutionContext,
    ) -> TuneResult<Box<dyn QaPipeline>> {
        if let Device::Gpu(ordinal) = context.device {
            warn!(gpu = ordinal, "reference pipeline has no GPU backend; running on CPU");
        }
        let store = match &self.db_path {
            Some(path) => PassageStore::open(path)?,
            None => PassageStore::open_in_memory()?,
        };
        info!(
            retriever = params.retriever_type.as_str(),
            k_retriever = params.k_retriever,
            retriever_model = params.retriever_model_version.as_deref().unwrap_or_default(),
            reader_model = params.reader_model_version.as_deref().unwrap_or_default(),
            "pipeline built"
        );
        Ok(Box::new(IndexedPipeline::new(store, params)?))
    }
}

pub struct IndexedPipeline {
    store: PassageStore,
    splitter: DocumentSplitter,
    retriever: Retriever,
    reader: OverlapReader,
}

impl IndexedPipeline {
    pub fn new(store: PassageStore, params: &PipelineParams) -> TuneResult<Self> {
        Ok(Self {
            store,
            splitter: DocumentSplitter::new(
                params.split_by,
                params.split_length,
                params.preprocessing,
            )?,
            retriever: Retriever::from_params(params),
            reader: OverlapReader::new(params.k_reader_per_candidate, params.k_reader_total),
        })
    }
}

impl QaPipeline for IndexedPipeline {
    fn index(&mut self, documents: &[Document]) -> TuneResult<()> {
        self.store.clear()?;
        let passages = documents
            .iter()
            .flat_map(|document| self.splitter.split(document))
            .collect::<Vec<Passage>>();
        let inserted = self.store.insert_passages(&passages)?;

        let embedded = match self.retriever.embedding_pass() {
            Some(include_title) => self.store.update_embeddings(include_title)?,
            None => 0,
        };

        info!(
            documents = documents.len(),
            passages = inserted,
            embedded,
            "document index rebuilt"
        );
        Ok(())
    }

    fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<RetrievedResult> {
        self.retriever.retrieve(&self.store, query, top_k, filter)
    }

    fn read(&self, query: &str, candidates: &RetrievedResult) -> TuneResult<Vec<String>> {
        Ok(self.reader.read(query, candidates))
    }
}

#[cfg(test)]
mod tests;
