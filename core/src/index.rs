use crate::corpus::Corpus;
use crate::error::{Result, SearchError, Stage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Position of a document in the corpus it was built from.
pub type DocIndex = u32;

pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length-normalization strength, in `[0, 1]`.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: DEFAULT_K1, b: DEFAULT_B }
    }
}

impl Bm25Params {
    pub fn new(k1: f64, b: f64) -> Result<Self> {
        if !k1.is_finite() || k1 < 0.0 {
            return Err(SearchError::InvalidInput(Stage::Build, format!("k1 must be >= 0, got {k1}")));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(SearchError::InvalidInput(Stage::Build, format!("b must be within [0, 1], got {b}")));
        }
        Ok(Self { k1, b })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: DocIndex,
    pub tf: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermStats {
    pub df: u32,
    /// Sorted by `doc`.
    pub postings: Vec<Posting>,
}

/// BM25 statistics over a corpus. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Index {
    params: Bm25Params,
    terms: BTreeMap<String, TermStats>,
    doc_lengths: Vec<u32>,
    avgdl: f64,
}

impl Bm25Index {
    /// Build from a corpus. Per-document term counting runs on the rayon
    /// pool; global document frequencies and lengths are merged serially
    /// in corpus order, so postings come out sorted without a sort step.
    pub fn build(corpus: &Corpus, params: Bm25Params) -> Self {
        let counts: Vec<(u32, HashMap<&str, u32>)> = corpus
            .documents()
            .par_iter()
            .map(|tokens| {
                let mut tf: HashMap<&str, u32> = HashMap::new();
                for t in tokens {
                    *tf.entry(t.as_str()).or_insert(0) += 1;
                }
                (tokens.len() as u32, tf)
            })
            .collect();

        let mut terms: BTreeMap<String, TermStats> = BTreeMap::new();
        let mut doc_lengths = Vec::with_capacity(counts.len());
        for (doc, (len, tf)) in counts.into_iter().enumerate() {
            doc_lengths.push(len);
            for (term, count) in tf {
                let stats = terms.entry(term.to_string()).or_default();
                stats.df += 1;
                stats.postings.push(Posting { doc: doc as DocIndex, tf: count });
            }
        }

        let avgdl = mean_length(&doc_lengths);
        info!(num_docs = doc_lengths.len(), num_terms = terms.len(), avgdl, "bm25 index built");
        Self { params, terms, doc_lengths, avgdl }
    }

    /// Reassemble an index from persisted parts. Callers are expected to
    /// have validated the parts against each other.
    pub(crate) fn from_parts(
        params: Bm25Params,
        terms: BTreeMap<String, TermStats>,
        doc_lengths: Vec<u32>,
        avgdl: f64,
    ) -> Self {
        Self { params, terms, doc_lengths, avgdl }
    }

    pub(crate) fn terms(&self) -> &BTreeMap<String, TermStats> {
        &self.terms
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn num_docs(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn avgdl(&self) -> f64 {
        self.avgdl
    }

    pub fn doc_lengths(&self) -> &[u32] {
        &self.doc_lengths
    }

    pub fn doc_len(&self, doc: DocIndex) -> Option<u32> {
        self.doc_lengths.get(doc as usize).copied()
    }

    pub fn df(&self, term: &str) -> u32 {
        self.terms.get(term).map_or(0, |s| s.df)
    }

    pub fn postings(&self, term: &str) -> &[Posting] {
        self.terms.get(term).map(|s| s.postings.as_slice()).unwrap_or(&[])
    }

    /// Raw frequency of `term` in document `doc`.
    pub fn tf(&self, term: &str, doc: DocIndex) -> u32 {
        let postings = self.postings(term);
        postings
            .binary_search_by_key(&doc, |p| p.doc)
            .map_or(0, |i| postings[i].tf)
    }

    pub fn idf(&self, term: &str) -> f64 {
        idf(self.num_docs() as u32, self.df(term))
    }

    /// BM25 contribution of one term occurring `tf` times in a document of
    /// length `dl`.
    pub fn term_weight(&self, idf: f64, tf: u32, dl: u32) -> f64 {
        if tf == 0 {
            return 0.0;
        }
        let Bm25Params { k1, b } = self.params;
        let tf = tf as f64;
        let len_ratio = if self.avgdl > 0.0 { dl as f64 / self.avgdl } else { 0.0 };
        idf * tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * len_ratio))
    }

    /// Score every document against `query` tokens. Repeated query tokens
    /// count once. Documents sharing no term with the query score 0.
    pub fn score_all<S: AsRef<str>>(&self, query: &[S]) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.num_docs()];
        let mut seen: Vec<&str> = Vec::with_capacity(query.len());
        for token in query {
            let token = token.as_ref();
            if seen.contains(&token) {
                continue;
            }
            seen.push(token);
            let Some(stats) = self.terms.get(token) else { continue };
            let idf = idf(self.num_docs() as u32, stats.df);
            for p in &stats.postings {
                let dl = self.doc_lengths[p.doc as usize];
                scores[p.doc as usize] += self.term_weight(idf, p.tf, dl);
            }
        }
        scores
    }

    /// Score a single document. Agrees exactly with [`Self::score_all`].
    pub fn score<S: AsRef<str>>(&self, query: &[S], doc: DocIndex) -> f64 {
        let Some(dl) = self.doc_len(doc) else { return 0.0 };
        let mut seen: Vec<&str> = Vec::with_capacity(query.len());
        let mut score = 0.0;
        for token in query {
            let token = token.as_ref();
            if seen.contains(&token) {
                continue;
            }
            seen.push(token);
            score += self.term_weight(self.idf(token), self.tf(token, doc), dl);
        }
        score
    }
}

/// `ln((N - df + 0.5) / (df + 0.5) + 1)`, floored at zero.
pub fn idf(num_docs: u32, df: u32) -> f64 {
    let n = num_docs as f64;
    let df = df as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln().max(0.0)
}

fn mean_length(lengths: &[u32]) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }
    let total: u64 = lengths.iter().map(|&l| l as u64).sum();
    total as f64 / lengths.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn pets() -> Corpus {
        [
            ("d0", toks(&["cat", "dog"])),
            ("d1", toks(&["cat"])),
            ("d2", toks(&["dog", "dog", "dog"])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn term_statistics() {
        let index = Bm25Index::build(&pets(), Bm25Params::default());
        assert_eq!(index.num_docs(), 3);
        assert_eq!(index.df("cat"), 2);
        assert_eq!(index.df("dog"), 2);
        assert_eq!(index.df("bird"), 0);
        assert_eq!(index.doc_lengths(), &[2, 1, 3]);
        assert!((index.avgdl() - 2.0).abs() < 1e-12);
        assert_eq!(index.tf("dog", 2), 3);
        assert_eq!(index.tf("dog", 1), 0);
        let docs: Vec<_> = index.postings("dog").iter().map(|p| p.doc).collect();
        assert_eq!(docs, vec![0, 2]);
    }

    #[test]
    fn idf_is_non_increasing_in_df() {
        let n = 50;
        let mut prev = f64::INFINITY;
        for df in 0..=n {
            let w = idf(n, df);
            assert!(w >= 0.0);
            assert!(w <= prev, "idf rose at df={df}");
            prev = w;
        }
    }

    #[test]
    fn absent_term_contributes_nothing() {
        let corpus: Corpus = [
            ("a", toks(&["engine", "fire"])),
            ("b", toks(&["engine", "smoke"])),
            ("c", toks(&["cabin", "smoke"])),
        ]
        .into_iter()
        .collect();
        let index = Bm25Index::build(&corpus, Bm25Params::default());
        let with = index.score(&["fire"], 0);
        let without = index.score(&["fire"], 1);
        assert!(with > 0.0);
        assert_eq!(without, 0.0);
    }

    #[test]
    fn repeated_query_terms_count_once() {
        let index = Bm25Index::build(&pets(), Bm25Params::default());
        assert_eq!(index.score_all(&["dog"]), index.score_all(&["dog", "dog"]));
    }

    #[test]
    fn single_and_bulk_scoring_agree() {
        let index = Bm25Index::build(&pets(), Bm25Params::new(1.2, 0.5).unwrap());
        let q = ["dog", "cat", "bird"];
        let all = index.score_all(&q);
        for doc in 0..3u32 {
            assert_eq!(all[doc as usize], index.score(&q, doc));
        }
    }

    #[test]
    fn build_is_deterministic() {
        let a = Bm25Index::build(&pets(), Bm25Params::default());
        let b = Bm25Index::build(&pets(), Bm25Params::default());
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_out_of_range_params() {
        assert!(Bm25Params::new(1.5, 1.2).is_err());
        assert!(Bm25Params::new(-0.1, 0.5).is_err());
        assert!(Bm25Params::new(0.0, 0.0).is_ok());
    }

    #[test]
    fn empty_corpus() {
        let index = Bm25Index::build(&Corpus::new(), Bm25Params::default());
        assert_eq!(index.num_docs(), 0);
        assert_eq!(index.avgdl(), 0.0);
        assert!(index.score_all(&["x"]).is_empty());
    }
}
