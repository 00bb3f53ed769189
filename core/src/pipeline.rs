//! Build, persist and restore an index in one place.

use crate::corpus::{BuildReport, CorpusBuilder};
use crate::error::{Result, SearchError, Stage, StoreError};
use crate::index::{Bm25Index, Bm25Params};
use crate::persist::IndexCache;
use crate::query::QueryEngine;
use crate::stats::LengthStats;
use crate::store::DocumentStore;
use std::path::Path;
use tracing::info;

/// A built index together with the ids of the documents it covers.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    index: Bm25Index,
    doc_ids: Vec<String>,
    built_at: Option<String>,
}

impl SearchIndex {
    pub fn new(index: Bm25Index, doc_ids: Vec<String>, built_at: Option<String>) -> Result<Self> {
        QueryEngine::new(&index, &doc_ids)?;
        Ok(Self { index, doc_ids, built_at })
    }

    pub fn index(&self) -> &Bm25Index {
        &self.index
    }

    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    pub fn built_at(&self) -> Option<&str> {
        self.built_at.as_deref()
    }

    pub fn engine(&self) -> QueryEngine<'_> {
        QueryEngine::new_unchecked(&self.index, &self.doc_ids)
    }

    pub fn length_stats(&self) -> LengthStats {
        LengthStats::from_lengths(self.index.doc_lengths())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Built,
}

pub fn build_from_store<S: DocumentStore>(
    store: S,
    params: Bm25Params,
    batch_size: usize,
) -> Result<(SearchIndex, BuildReport)> {
    let (corpus, report) = CorpusBuilder::new(store, batch_size).build()?;
    let index = Bm25Index::build(&corpus, params);
    let (_, doc_ids) = corpus.into_parts();
    Ok((SearchIndex { index, doc_ids, built_at: None }, report))
}

/// Build from the store and write the cache. Nothing is written unless the
/// whole build succeeds.
pub fn rebuild<S: DocumentStore>(
    store: S,
    params: Bm25Params,
    batch_size: usize,
    cache_path: &Path,
) -> Result<(SearchIndex, BuildReport)> {
    let (built, report) = build_from_store(store, params, batch_size)?;
    IndexCache::save(&built.index, &built.doc_ids, cache_path)?;
    Ok((built, report))
}

/// Load the index without touching the store. A missing cache is an error
/// here since there is nothing to fall back on.
pub fn load_cached(cache_path: &Path) -> Result<SearchIndex> {
    match IndexCache::load(cache_path)? {
        Some(cached) => Ok(SearchIndex {
            index: cached.index,
            doc_ids: cached.doc_ids,
            built_at: Some(cached.built_at),
        }),
        None => Err(SearchError::CacheMissing(Stage::Load)),
    }
}

/// Use the cache when present; otherwise open the store, build, and save.
///
/// With `params` set, a cache built with different parameters is rejected;
/// with `None` the cached parameters are accepted and a fresh build uses
/// the defaults. A corrupt cache is reported and left in place; the caller
/// decides whether to rebuild.
pub fn load_or_build<S, F>(
    cache_path: &Path,
    params: Option<Bm25Params>,
    batch_size: usize,
    open_store: F,
) -> Result<(SearchIndex, Origin)>
where
    S: DocumentStore,
    F: FnOnce() -> std::result::Result<S, StoreError>,
{
    if let Some(cached) = IndexCache::load(cache_path)? {
        let cached_params = cached.index.params();
        if let Some(params) = params.filter(|p| *p != cached_params) {
            return Err(SearchError::ParamsMismatch {
                stage: Stage::Load,
                cached_k1: cached_params.k1,
                cached_b: cached_params.b,
                k1: params.k1,
                b: params.b,
            });
        }
        info!(num_docs = cached.index.num_docs(), built_at = %cached.built_at, "loaded index from cache");
        let index = SearchIndex { index: cached.index, doc_ids: cached.doc_ids, built_at: Some(cached.built_at) };
        return Ok((index, Origin::Cache));
    }
    info!("no index cache; building from store");
    let store = open_store().map_err(|e| SearchError::StoreUnavailable(Stage::Build, e))?;
    let (built, _) = rebuild(store, params.unwrap_or_default(), batch_size, cache_path)?;
    Ok((built, Origin::Built))
}
