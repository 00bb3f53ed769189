//! BM25 full-text search over a tokenized document corpus: index build,
//! cache persistence, top-K querying, and ranking evaluation.

pub mod config;
pub mod corpus;
pub mod error;
pub mod eval;
pub mod index;
pub mod persist;
pub mod pipeline;
pub mod query;
pub mod stats;
pub mod store;
pub mod tokenizer;

pub use config::EngineConfig;
pub use corpus::{BuildReport, Corpus, CorpusBuilder};
pub use error::{Result, SearchError, Stage, StoreError};
pub use eval::{EvaluationHarness, EvaluationReport, Judgments};
pub use index::{Bm25Index, Bm25Params, DocIndex};
pub use persist::{CachedIndex, IndexCache};
pub use pipeline::{load_cached, load_or_build, rebuild, Origin, SearchIndex};
pub use query::{query, QueryEngine, Ranker, ScoredDoc};
pub use store::{DocumentStore, MemoryStore, RawDocument, SledStore};
