use crate::error::{Result, SearchError, Stage};
use crate::index::{Bm25Index, DocIndex};
use crate::tokenizer::tokenize;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: String,
    pub score: f64,
}

/// Anything that can produce a ranked top-K for free text.
pub trait Ranker {
    fn rank(&self, text: &str, k: usize) -> Result<Vec<ScoredDoc>>;
}

/// Read-only view pairing an index with its document id map. Any number of
/// engines may share one index across threads.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    index: &'a Bm25Index,
    doc_ids: &'a [String],
}

impl<'a> QueryEngine<'a> {
    pub fn new(index: &'a Bm25Index, doc_ids: &'a [String]) -> Result<Self> {
        if index.num_docs() != doc_ids.len() {
            return Err(SearchError::InvalidInput(
                Stage::Query,
                format!("{} document ids for {} indexed documents", doc_ids.len(), index.num_docs()),
            ));
        }
        Ok(Self::new_unchecked(index, doc_ids))
    }

    /// For callers that already hold ids aligned with `index`.
    pub(crate) fn new_unchecked(index: &'a Bm25Index, doc_ids: &'a [String]) -> Self {
        debug_assert_eq!(index.num_docs(), doc_ids.len());
        Self { index, doc_ids }
    }

    pub fn index(&self) -> &'a Bm25Index {
        self.index
    }

    /// Rank by already-tokenized query, returning corpus positions.
    pub fn top_k<S: AsRef<str>>(&self, tokens: &[S], k: usize) -> Vec<(DocIndex, f64)> {
        if tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let scores = self.index.score_all(tokens);
        top_k_by_score(&scores, k)
    }

    pub fn query(&self, text: &str, k: usize) -> Vec<ScoredDoc> {
        let tokens = tokenize(text);
        self.top_k(tokens.as_slice(), k)
            .into_iter()
            .map(|(doc, score)| ScoredDoc { doc_id: self.doc_ids[doc as usize].clone(), score })
            .collect()
    }
}

impl Ranker for QueryEngine<'_> {
    fn rank(&self, text: &str, k: usize) -> Result<Vec<ScoredDoc>> {
        Ok(self.query(text, k))
    }
}

/// Convenience wrapper over [`QueryEngine`].
pub fn query(index: &Bm25Index, doc_ids: &[String], text: &str, k: usize) -> Result<Vec<ScoredDoc>> {
    Ok(QueryEngine::new(index, doc_ids)?.query(text, k))
}

/// Top `min(k, n)` positions by descending score; equal scores keep
/// ascending position order.
fn top_k_by_score(scores: &[f64], k: usize) -> Vec<(DocIndex, f64)> {
    let by_rank = |a: &(DocIndex, f64), b: &(DocIndex, f64)| -> Ordering {
        b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
    };
    let mut ranked: Vec<(DocIndex, f64)> = scores
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as DocIndex, s))
        .collect();
    let k = k.min(ranked.len());
    if k == 0 {
        return Vec::new();
    }
    if k < ranked.len() {
        ranked.select_nth_unstable_by(k - 1, by_rank);
        ranked.truncate(k);
    }
    ranked.sort_unstable_by(by_rank);
    ranked
}
