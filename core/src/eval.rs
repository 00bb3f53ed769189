//! Ranking-quality evaluation against hand-labeled relevance judgments.
//!
//! Relevance is binary: a retrieved id is relevant when it appears in the
//! judgment set for the query. Per query we report Precision@K, Recall@K,
//! NDCG@K, reciprocal rank and average precision; the aggregate is the
//! arithmetic mean over the queries that ran.

use crate::error::{Result, SearchError};
use crate::query::Ranker;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub query: String,
    /// Deduplicated, in first-seen order.
    pub relevant: Vec<String>,
}

/// Query text to relevant document ids, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Judgments {
    entries: Vec<Judgment>,
}

impl Judgments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&mut self, query: impl Into<String>, relevant: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let relevant = relevant
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| seen.insert(id.clone()))
            .collect();
        self.entries.push(Judgment { query: query.into(), relevant });
    }

    /// Parse `{"query text": ["id", ...], ...}`. Numeric ids are accepted
    /// and read as their decimal text.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s).map_err(|e| SearchError::InvalidJudgments(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(SearchError::InvalidJudgments("expected a JSON object".into()));
        };
        let mut judgments = Judgments::new();
        for (query, ids) in map {
            let Value::Array(items) = ids else {
                return Err(SearchError::InvalidJudgments(format!("entry {query:?} is not an array")));
            };
            let mut relevant = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => relevant.push(s),
                    Value::Number(n) => relevant.push(n.to_string()),
                    _ => {
                        return Err(SearchError::InvalidJudgments(format!(
                            "entry {query:?} holds a non-string id"
                        )))
                    }
                }
            }
            judgments.insert(query, relevant);
        }
        Ok(judgments)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SearchError::InvalidJudgments(format!("cannot read file ({})", e.kind())))?;
        Self::from_json_str(&text)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Judgment> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetrics {
    pub query: String,
    pub retrieved: Vec<String>,
    pub relevance: Vec<u8>,
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
    pub reciprocal_rank: f64,
    pub average_precision: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryOutcome {
    Scored(QueryMetrics),
    Failed { query: String, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub queries: usize,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub mean_ndcg: f64,
    pub mean_reciprocal_rank: f64,
    pub mean_average_precision: f64,
    pub zero_relevant_retrieved: usize,
    pub empty_judgments: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub k: usize,
    pub outcomes: Vec<QueryOutcome>,
    pub aggregate: AggregateMetrics,
    /// Set when the run stopped early; `outcomes` holds what finished.
    pub interrupted: bool,
}

pub struct EvaluationHarness<R> {
    ranker: R,
    k: usize,
}

impl<R: Ranker> EvaluationHarness<R> {
    pub fn new(ranker: R, k: usize) -> Self {
        Self { ranker, k }
    }

    pub fn evaluate(&self, judgments: &Judgments) -> EvaluationReport {
        self.evaluate_until(judgments, &AtomicBool::new(false))
    }

    /// Like [`Self::evaluate`], checking `stop` before each query.
    pub fn evaluate_until(&self, judgments: &Judgments, stop: &AtomicBool) -> EvaluationReport {
        let mut outcomes = Vec::with_capacity(judgments.len());
        let mut interrupted = false;
        for judgment in judgments.iter() {
            if stop.load(Ordering::Relaxed) {
                warn!(done = outcomes.len(), total = judgments.len(), "evaluation interrupted");
                interrupted = true;
                break;
            }
            let outcome = match self.ranker.rank(&judgment.query, self.k) {
                Ok(ranking) => {
                    let retrieved = ranking.into_iter().map(|d| d.doc_id).collect();
                    QueryOutcome::Scored(score_query(judgment, retrieved, self.k))
                }
                Err(e) => {
                    warn!(query = %judgment.query, error = %e, "query failed during evaluation");
                    QueryOutcome::Failed { query: judgment.query.clone(), error: e.to_string() }
                }
            };
            outcomes.push(outcome);
        }
        let aggregate = aggregate(&outcomes, judgments);
        info!(
            queries = aggregate.queries,
            k = self.k,
            precision = aggregate.mean_precision,
            recall = aggregate.mean_recall,
            ndcg = aggregate.mean_ndcg,
            "evaluation finished"
        );
        EvaluationReport { k: self.k, outcomes, aggregate, interrupted }
    }
}

/// Metrics for one query given the ids retrieved for it, best first.
pub fn score_query(judgment: &Judgment, retrieved: Vec<String>, k: usize) -> QueryMetrics {
    let relevant: HashSet<&str> = judgment.relevant.iter().map(String::as_str).collect();
    let relevance: Vec<u8> = retrieved
        .iter()
        .take(k)
        .map(|id| u8::from(relevant.contains(id.as_str())))
        .collect();
    let hits = relevance.iter().filter(|&&r| r == 1).count();

    if relevant.is_empty() {
        warn!(query = %judgment.query, "judgment lists no relevant documents; recall is 0");
    } else if hits == 0 {
        warn!(query = %judgment.query, k, "no relevant documents retrieved");
    }

    let precision = if k > 0 { hits as f64 / k as f64 } else { 0.0 };
    let recall = if relevant.is_empty() { 0.0 } else { hits as f64 / relevant.len() as f64 };

    QueryMetrics {
        query: judgment.query.clone(),
        ndcg: ndcg(&relevance, k),
        reciprocal_rank: reciprocal_rank(&relevance),
        average_precision: average_precision(&relevance, relevant.len()),
        retrieved,
        relevance,
        precision,
        recall,
    }
}

fn dcg(gains: impl Iterator<Item = f64>) -> f64 {
    gains.enumerate().map(|(i, g)| g / (i as f64 + 2.0).log2()).sum()
}

/// Binary NDCG@K. The ideal is the retrieved relevance vector sorted
/// descending, so relevant documents outside the top K do not count.
pub fn ndcg(relevance: &[u8], k: usize) -> f64 {
    let top = &relevance[..relevance.len().min(k)];
    let actual = dcg(top.iter().map(|&r| r as f64));
    let mut ideal_order = top.to_vec();
    ideal_order.sort_unstable_by(|a, b| b.cmp(a));
    let ideal = dcg(ideal_order.into_iter().map(f64::from));
    if ideal > 0.0 {
        actual / ideal
    } else {
        0.0
    }
}

fn reciprocal_rank(relevance: &[u8]) -> f64 {
    relevance
        .iter()
        .position(|&r| r == 1)
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

fn average_precision(relevance: &[u8], total_relevant: usize) -> f64 {
    if total_relevant == 0 {
        return 0.0;
    }
    let mut seen = 0usize;
    let mut sum = 0.0;
    for (i, &r) in relevance.iter().enumerate() {
        if r == 1 {
            seen += 1;
            sum += seen as f64 / (i + 1) as f64;
        }
    }
    sum / total_relevant as f64
}

fn aggregate(outcomes: &[QueryOutcome], judgments: &Judgments) -> AggregateMetrics {
    let scored: Vec<&QueryMetrics> = outcomes
        .iter()
        .filter_map(|o| match o {
            QueryOutcome::Scored(m) => Some(m),
            QueryOutcome::Failed { .. } => None,
        })
        .collect();
    let mean = |f: fn(&QueryMetrics) -> f64| -> f64 {
        if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|m| f(m)).sum::<f64>() / scored.len() as f64
        }
    };
    AggregateMetrics {
        queries: scored.len(),
        mean_precision: mean(|m| m.precision),
        mean_recall: mean(|m| m.recall),
        mean_ndcg: mean(|m| m.ndcg),
        mean_reciprocal_rank: mean(|m| m.reciprocal_rank),
        mean_average_precision: mean(|m| m.average_precision),
        zero_relevant_retrieved: scored.iter().filter(|m| !m.relevance.contains(&1)).count(),
        empty_judgments: judgments.iter().take(outcomes.len()).filter(|j| j.relevant.is_empty()).count(),
        failed: outcomes.len() - scored.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bird_strike_example() {
        let judgment = Judgment { query: "bird strike".into(), relevant: ids(&["60001", "60002"]) };
        let m = score_query(&judgment, ids(&["60001", "60005", "60002", "60007", "60009"]), 5);
        assert_eq!(m.relevance, vec![1, 0, 1, 0, 0]);
        assert!((m.precision - 0.4).abs() < 1e-12);
        assert!((m.recall - 1.0).abs() < 1e-12);
        let expected = (1.0 + 1.0 / 4f64.log2()) / (1.0 + 1.0 / 3f64.log2());
        assert!((m.ndcg - expected).abs() < 1e-12);
        assert_eq!(m.reciprocal_rank, 1.0);
    }

    #[test]
    fn perfect_ranking_has_unit_ndcg() {
        assert_eq!(ndcg(&[1, 1, 1, 0, 0], 5), 1.0);
        assert_eq!(ndcg(&[0, 0], 2), 0.0);
        assert!(ndcg(&[0, 1, 1], 3) < 1.0);
    }

    #[test]
    fn ndcg_ideal_comes_from_retrieved_list() {
        let judgment = Judgment { query: "fuel leak".into(), relevant: ids(&["a", "b", "c"]) };
        let m = score_query(&judgment, ids(&["a", "x", "y", "z", "w"]), 5);
        assert_eq!(m.relevance, vec![1, 0, 0, 0, 0]);
        assert_eq!(m.ndcg, 1.0);
        assert!((m.recall - 1.0 / 3.0).abs() < 1e-12);

        let m = score_query(&judgment, ids(&["x", "a", "y"]), 3);
        assert!((m.ndcg - 1.0 / 3f64.log2()).abs() < 1e-12);
    }

    #[test]
    fn empty_relevant_set_scores_zero_recall() {
        let judgment = Judgment { query: "nothing".into(), relevant: vec![] };
        let m = score_query(&judgment, ids(&["a", "b"]), 2);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.ndcg, 0.0);
    }

    #[test]
    fn parses_judgments_in_file_order() {
        let j = Judgments::from_json_str(r#"{"zeta": ["2", "2", "1"], "alpha": [3]}"#).unwrap();
        let all: Vec<_> = j.iter().cloned().collect();
        assert_eq!(all[0].query, "zeta");
        assert_eq!(all[0].relevant, ids(&["2", "1"]));
        assert_eq!(all[1].relevant, ids(&["3"]));
        assert!(Judgments::from_json_str("[1, 2]").is_err());
        assert!(Judgments::from_json_str(r#"{"q": "x"}"#).is_err());
    }
}
