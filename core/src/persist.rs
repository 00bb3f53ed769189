//! On-disk cache for a built index and its document id map.
//!
//! One file per cache path, laid out as:
//!
//! ```text
//! magic "BM25" | version u32 | k1 f64 | b f64 | num_docs u64
//! | payload_len u64 | crc32 u32 | payload (bincode)
//! ```
//!
//! All integers and floats are little-endian. Writes go to a temporary file
//! in the target directory and are renamed into place.

use crate::error::{CorruptReason, Result, SearchError, Stage};
use crate::index::{Bm25Index, Bm25Params, TermStats};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"BM25";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 8 + 8 + 4;

#[derive(Serialize, Deserialize)]
struct Payload<'a> {
    built_at: Cow<'a, str>,
    avgdl: f64,
    doc_lengths: Cow<'a, [u32]>,
    terms: Cow<'a, BTreeMap<String, TermStats>>,
    doc_ids: Cow<'a, [String]>,
}

/// Contents of a cache file.
#[derive(Debug, Clone)]
pub struct CachedIndex {
    pub index: Bm25Index,
    pub doc_ids: Vec<String>,
    /// RFC 3339 time the cache was written.
    pub built_at: String,
}

pub struct IndexCache;

impl IndexCache {
    pub fn save(index: &Bm25Index, doc_ids: &[String], path: &Path) -> Result<()> {
        if doc_ids.len() != index.num_docs() {
            return Err(SearchError::InvalidInput(
                Stage::Build,
                format!("{} document ids for {} indexed documents", doc_ids.len(), index.num_docs()),
            ));
        }
        let built_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        let payload = Payload {
            built_at: Cow::Owned(built_at),
            avgdl: index.avgdl(),
            doc_lengths: Cow::Borrowed(index.doc_lengths()),
            terms: Cow::Borrowed(index.terms()),
            doc_ids: Cow::Borrowed(doc_ids),
        };
        let body = bincode::serialize(&payload)
            .map_err(|e| SearchError::Io(Stage::Build, io::Error::new(io::ErrorKind::Other, e)))?;

        let params = index.params();
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&params.k1.to_le_bytes());
        buf.extend_from_slice(&params.b.to_le_bytes());
        buf.extend_from_slice(&(index.num_docs() as u64).to_le_bytes());
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        buf.extend_from_slice(&body);

        write_atomic(path, &buf).map_err(|e| SearchError::Io(Stage::Build, e))?;
        info!(num_docs = index.num_docs(), bytes = buf.len(), "index cache written");
        Ok(())
    }

    /// Load a cache file. `Ok(None)` means there is no cache yet.
    pub fn load(path: &Path) -> Result<Option<CachedIndex>> {
        let buf = match fs::read(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no index cache present");
                return Ok(None);
            }
            Err(e) => return Err(SearchError::Io(Stage::Load, e)),
        };
        decode(&buf).map(Some).map_err(|reason| SearchError::CacheCorrupt(Stage::Load, reason))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn decode(buf: &[u8]) -> std::result::Result<CachedIndex, CorruptReason> {
    if buf.len() < 8 {
        return Err(if buf.len() >= 4 && &buf[..4] != MAGIC {
            CorruptReason::BadMagic
        } else {
            CorruptReason::Truncated
        });
    }
    if &buf[..4] != MAGIC {
        return Err(CorruptReason::BadMagic);
    }
    let mut r = Reader { buf, pos: 4 };
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(CorruptReason::UnsupportedVersion(version));
    }
    let k1 = r.f64()?;
    let b = r.f64()?;
    let num_docs = r.u64()?;
    let payload_len = r.u64()?;
    let crc = r.u32()?;
    let body = r.take(payload_len)?;
    if r.pos != buf.len() {
        return Err(CorruptReason::Inconsistent("trailing bytes after payload"));
    }
    if crc32fast::hash(body) != crc {
        return Err(CorruptReason::ChecksumMismatch);
    }
    let payload: Payload<'static> = bincode::deserialize(body).map_err(|_| CorruptReason::Undecodable)?;

    let params = Bm25Params::new(k1, b).map_err(|_| CorruptReason::Inconsistent("parameters out of range"))?;
    let doc_lengths = payload.doc_lengths.into_owned();
    let doc_ids = payload.doc_ids.into_owned();
    let terms = payload.terms.into_owned();
    if doc_lengths.len() as u64 != num_docs || doc_ids.len() as u64 != num_docs {
        return Err(CorruptReason::Inconsistent("document count"));
    }
    let in_range = terms.values().all(|t| {
        t.df as usize == t.postings.len()
            && t.postings.iter().all(|p| (p.doc as u64) < num_docs)
            && t.postings.windows(2).all(|w| w[0].doc < w[1].doc)
    });
    if !in_range {
        return Err(CorruptReason::Inconsistent("term table"));
    }

    Ok(CachedIndex {
        index: Bm25Index::from_parts(params, terms, doc_lengths, payload.avgdl),
        doc_ids,
        built_at: payload.built_at.into_owned(),
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: u64) -> std::result::Result<&'a [u8], CorruptReason> {
        let n = usize::try_from(n).map_err(|_| CorruptReason::Truncated)?;
        let end = self.pos.checked_add(n).ok_or(CorruptReason::Truncated)?;
        let bytes = self.buf.get(self.pos..end).ok_or(CorruptReason::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> std::result::Result<[u8; N], CorruptReason> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N as u64)?);
        Ok(out)
    }

    fn u32(&mut self) -> std::result::Result<u32, CorruptReason> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> std::result::Result<u64, CorruptReason> {
        self.array().map(u64::from_le_bytes)
    }

    fn f64(&mut self) -> std::result::Result<f64, CorruptReason> {
        self.array().map(f64::from_le_bytes)
    }
}
