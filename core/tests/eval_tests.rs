use bm25_core::eval::QueryOutcome;
use bm25_core::{
    Bm25Index, Bm25Params, Corpus, EvaluationHarness, Judgments, QueryEngine, Ranker, Result, ScoredDoc,
    SearchError, Stage,
};
use std::sync::atomic::AtomicBool;

fn toks(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn corpus() -> Corpus {
    [
        ("60001", toks(&["bird", "strike", "windshield"])),
        ("60002", toks(&["bird", "strike", "engine", "bird"])),
        ("60003", toks(&["hydraulic", "leak"])),
        ("60004", toks(&["engine", "fire", "warning"])),
    ]
    .into_iter()
    .collect()
}

#[test]
fn all_relevant_retrieved_gives_full_recall_and_ndcg() {
    let corpus = corpus();
    let index = Bm25Index::build(&corpus, Bm25Params::default());
    let engine = QueryEngine::new(&index, corpus.doc_ids()).unwrap();
    let mut judgments = Judgments::new();
    judgments.insert("bird strike", ["60001", "60002"]);

    let report = EvaluationHarness::new(engine, 3).evaluate(&judgments);
    let QueryOutcome::Scored(m) = &report.outcomes[0] else { panic!("query failed") };
    assert_eq!(m.recall, 1.0);
    assert_eq!(m.ndcg, 1.0);
    assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(report.aggregate.queries, 1);
    assert!(!report.interrupted);
}

#[test]
fn empty_judgment_does_not_abort_the_run() {
    let corpus = corpus();
    let index = Bm25Index::build(&corpus, Bm25Params::default());
    let engine = QueryEngine::new(&index, corpus.doc_ids()).unwrap();
    let judgments = Judgments::from_json_str(r#"{"engine fire": [], "hydraulic": ["60003"]}"#).unwrap();

    let report = EvaluationHarness::new(engine, 2).evaluate(&judgments);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.aggregate.empty_judgments, 1);
    let QueryOutcome::Scored(first) = &report.outcomes[0] else { panic!("query failed") };
    assert_eq!(first.recall, 0.0);
    assert!((report.aggregate.mean_recall - 0.5).abs() < 1e-12);
}

struct Flaky;

impl Ranker for Flaky {
    fn rank(&self, text: &str, _k: usize) -> Result<Vec<ScoredDoc>> {
        if text == "boom" {
            return Err(SearchError::InvalidInput(Stage::Query, "simulated".into()));
        }
        Ok(vec![ScoredDoc { doc_id: "1".into(), score: 1.0 }])
    }
}

#[test]
fn failed_query_is_recorded_and_evaluation_continues() {
    let mut judgments = Judgments::new();
    judgments.insert("boom", ["1"]);
    judgments.insert("fine", ["1"]);
    let report = EvaluationHarness::new(Flaky, 1).evaluate(&judgments);
    assert!(matches!(report.outcomes[0], QueryOutcome::Failed { .. }));
    assert!(matches!(report.outcomes[1], QueryOutcome::Scored(_)));
    assert_eq!(report.aggregate.failed, 1);
    assert_eq!(report.aggregate.queries, 1);
    assert_eq!(report.aggregate.mean_precision, 1.0);
}

#[test]
fn stop_flag_interrupts_between_queries() {
    let mut judgments = Judgments::new();
    judgments.insert("a", ["1"]);
    judgments.insert("b", ["1"]);
    let stop = AtomicBool::new(true);
    let report = EvaluationHarness::new(Flaky, 1).evaluate_until(&judgments, &stop);
    assert!(report.interrupted);
    assert!(report.outcomes.is_empty());
    assert_eq!(report.aggregate.queries, 0);
}
