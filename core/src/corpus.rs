use crate::error::{Result, SearchError, Stage};
use crate::store::{DocumentStore, RawDocument};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Token lists and their store ids, aligned by position: entry `i` of
/// `documents` and of `doc_ids` always describe the same document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    documents: Vec<Vec<String>>,
    doc_ids: Vec<String>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: impl Into<String>, tokens: Vec<String>) {
        self.doc_ids.push(id.into());
        self.documents.push(tokens);
    }

    pub fn documents(&self) -> &[Vec<String>] {
        &self.documents
    }

    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Vec<String>>, Vec<String>) {
        (self.documents, self.doc_ids)
    }
}

impl<S> FromIterator<(S, Vec<String>)> for Corpus
where
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (S, Vec<String>)>>(iter: T) -> Self {
        let mut corpus = Corpus::new();
        for (id, tokens) in iter {
            corpus.push(id, tokens);
        }
        corpus
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub fetched: usize,
    pub included: usize,
    pub skipped_malformed: usize,
    pub batches: usize,
}

/// Pulls tokenized documents out of a store in bounded batches.
pub struct CorpusBuilder<S> {
    store: S,
    batch_size: usize,
}

impl<S: DocumentStore> CorpusBuilder<S> {
    pub fn new(store: S, batch_size: usize) -> Self {
        Self { store, batch_size: batch_size.max(1) }
    }

    pub fn build(&self) -> Result<(Corpus, BuildReport)> {
        let mut corpus = Corpus::new();
        let mut report = BuildReport::default();
        loop {
            let page = self
                .store
                .fetch_tokenized(report.fetched, self.batch_size)
                .map_err(|e| SearchError::StoreUnavailable(Stage::Build, e))?;
            if page.is_empty() {
                break;
            }
            report.batches += 1;
            report.fetched += page.len();
            let last_page = page.len() < self.batch_size;
            for raw in page {
                match validate(raw) {
                    Some((id, tokens)) => corpus.push(id, tokens),
                    None => report.skipped_malformed += 1,
                }
            }
            debug!(batch = report.batches, fetched = report.fetched, "fetched corpus batch");
            if last_page {
                break;
            }
        }
        report.included = corpus.len();
        if report.skipped_malformed > 0 {
            warn!(skipped = report.skipped_malformed, "skipped malformed documents");
        }
        info!(documents = report.included, batches = report.batches, "corpus built");
        Ok((corpus, report))
    }
}

fn validate(raw: RawDocument) -> Option<(String, Vec<String>)> {
    let RawDocument { id, tokens } = raw;
    let Some(Value::Array(items)) = tokens else {
        debug!(%id, "document has no token list");
        return None;
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) => out.push(s),
            _ => {
                debug!(%id, "document token list holds a non-string");
                return None;
            }
        }
    }
    Some((id, out))
}
