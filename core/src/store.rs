//! Document store collaborator.
//!
//! The index is built from `{id, tokens}` records pulled page by page from a
//! [`DocumentStore`]. Stores hand records back in a stable order so that
//! repeated builds over the same snapshot line up position for position.

use crate::error::StoreError;
use serde_json::Value;
use std::ops::Bound;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DOCUMENTS_TREE: &str = "documents";

/// A record as returned by the store, before validation.
///
/// `tokens` is kept as raw JSON so the corpus builder can tell a
/// well-formed token list apart from a malformed one.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: String,
    pub tokens: Option<Value>,
}

pub trait DocumentStore {
    /// Return up to `limit` records carrying a `tokens` field, skipping the
    /// first `skip` of them. An empty page means the end of the collection.
    fn fetch_tokenized(&self, skip: usize, limit: usize) -> Result<Vec<RawDocument>, StoreError>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for &S {
    fn fetch_tokenized(&self, skip: usize, limit: usize) -> Result<Vec<RawDocument>, StoreError> {
        (**self).fetch_tokenized(skip, limit)
    }
}

/// In-process store, mostly useful for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<RawDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: impl Into<String>, tokens: Option<Value>) {
        self.records.push(RawDocument { id: id.into(), tokens });
    }

    /// Convenience for the common case of a well-formed token list.
    pub fn push_tokens(&mut self, id: impl Into<String>, tokens: &[&str]) {
        let tokens = Value::Array(tokens.iter().map(|t| Value::String(t.to_string())).collect());
        self.push(id, Some(tokens));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DocumentStore for MemoryStore {
    fn fetch_tokenized(&self, skip: usize, limit: usize) -> Result<Vec<RawDocument>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.tokens.is_some())
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Embedded store backed by a sled database. Each record is stored as a
/// JSON object under its id; iteration follows key order.
///
/// Sequential pages resume after the last key handed out, so a full scan
/// decodes every record once.
#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
    documents: sled::Tree,
    read_timeout: Duration,
    cursor: Mutex<Option<PageCursor>>,
}

/// Where the previous page ended: `matched` tokenized records precede
/// `last_key` inclusive.
#[derive(Debug)]
struct PageCursor {
    matched: usize,
    last_key: sled::IVec,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P, read_timeout: Duration) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref()).map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let documents = db
            .open_tree(DOCUMENTS_TREE)
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(Self { db, documents, read_timeout, cursor: Mutex::new(None) })
    }

    /// Insert or replace a record. The `id` becomes the key; the JSON object
    /// is stored verbatim.
    pub fn put(&self, id: &str, record: &Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(|e| StoreError::Unreachable(e.to_string()))?;
        self.documents.insert(id.as_bytes(), bytes)?;
        self.reset_cursor();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn reset_cursor(&self) {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Flush pending writes and release the database handle.
    pub fn close(self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl DocumentStore for SledStore {
    fn fetch_tokenized(&self, skip: usize, limit: usize) -> Result<Vec<RawDocument>, StoreError> {
        let started = Instant::now();
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let (entries, mut matched) = match cursor.take() {
            Some(c) if c.matched == skip => {
                (self.documents.range::<sled::IVec, _>((Bound::Excluded(c.last_key), Bound::Unbounded)), skip)
            }
            _ => (self.documents.iter(), 0),
        };
        let mut page = Vec::with_capacity(limit.min(1024));
        let mut last_key = None;
        for entry in entries {
            if started.elapsed() >= self.read_timeout {
                return Err(StoreError::Timeout(self.read_timeout));
            }
            let (key, value) = entry?;
            let tokens = match serde_json::from_slice::<Value>(&value) {
                Ok(Value::Object(mut obj)) => match obj.remove("tokens") {
                    Some(tokens) => Some(tokens),
                    None => continue,
                },
                // Unreadable records still surface so the builder can count them.
                Ok(_) | Err(_) => Some(Value::Null),
            };
            if matched < skip {
                matched += 1;
                continue;
            }
            page.push(RawDocument { id: String::from_utf8_lossy(&key).into_owned(), tokens });
            last_key = Some(key);
            if page.len() >= limit {
                break;
            }
        }
        if let Some(last_key) = last_key {
            *cursor = Some(PageCursor { matched: skip + page.len(), last_key });
        }
        Ok(page)
    }
}
