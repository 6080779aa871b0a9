use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use quote_eval::analysis::{bm25_score, JudgeVerdict, ScoreRecord};
use quote_eval::judge::{JudgeError, QuoteJudge};
use quote_eval::quotes::format_score;
use quote_eval::runner::{EvalError, Evaluator, ProgressCallback, RunOptions};
use quote_eval::samples::{ManualScore, Sample};
use quote_eval::store::{
    Document, DocumentFilter, DocumentStore, MemoryStore, SqliteStore, StoreError, StoreResult,
    UpdateOutcome,
};

const GT: &str = "##begin_quote## cats are mammals ##end_quote##";
const SYS: &str = "##begin_quote## Cats are mammals. ##end_quote##";

/// Judge returning a fixed verdict. Responses containing `FAIL` error out,
/// `PANIC` panics and `slow` delays the reply.
struct MockJudge {
    verdict: Mutex<JudgeVerdict>,
    calls: AtomicUsize,
}

impl MockJudge {
    fn new(recall: f64, precision: f64) -> Arc<Self> {
        Arc::new(Self {
            verdict: Mutex::new(JudgeVerdict::new(recall, precision)),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_verdict(&self, recall: f64, precision: f64) {
        *self.verdict.lock().unwrap() = JudgeVerdict::new(recall, precision);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteJudge for MockJudge {
    async fn judge(
        &self,
        _ground_truth: &str,
        system_response: &str,
    ) -> Result<JudgeVerdict, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if system_response.contains("slow") {
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        if system_response.contains("PANIC") {
            panic!("judge exploded");
        }
        if system_response.contains("FAIL") {
            return Err(JudgeError::Parse("not a verdict".to_string()));
        }
        Ok(*self.verdict.lock().unwrap())
    }

    fn render_prompt(&self, ground_truth: &str, system_response: &str) -> (String, String) {
        ("rules".to_string(), format!("{ground_truth} | {system_response}"))
    }
}

/// Store whose score writes for one id match nothing, as if the document
/// was deleted mid-run
struct VanishingStore {
    inner: MemoryStore,
    vanished: String,
}

impl DocumentStore for VanishingStore {
    fn name(&self) -> &str {
        "vanishing"
    }

    fn find(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        self.inner.find(filter)
    }

    fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(id)
    }

    fn insert(&self, document: Document) -> StoreResult<()> {
        self.inner.insert(document)
    }

    fn set_score(&self, id: &str, model: &str, record: &ScoreRecord) -> StoreResult<UpdateOutcome> {
        if id == self.vanished {
            return Ok(UpdateOutcome::default());
        }
        self.inner.set_score(id, model, record)
    }
}

/// Store whose score write for one id fails outright
struct BrokenWriteStore {
    inner: MemoryStore,
    broken: String,
}

impl DocumentStore for BrokenWriteStore {
    fn name(&self) -> &str {
        "broken-write"
    }

    fn find(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        self.inner.find(filter)
    }

    fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(id)
    }

    fn insert(&self, document: Document) -> StoreResult<()> {
        self.inner.insert(document)
    }

    fn set_score(&self, id: &str, model: &str, record: &ScoreRecord) -> StoreResult<UpdateOutcome> {
        if id == self.broken {
            return Err(StoreError::Query("disk I/O error".to_string()));
        }
        self.inner.set_score(id, model, record)
    }
}

/// Judge that tracks how many calls are in flight at once
#[derive(Default)]
struct ConcurrencyJudge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyJudge {
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteJudge for ConcurrencyJudge {
    async fn judge(
        &self,
        _ground_truth: &str,
        _system_response: &str,
    ) -> Result<JudgeVerdict, JudgeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(JudgeVerdict::new(1.0, 1.0))
    }

    fn render_prompt(&self, ground_truth: &str, system_response: &str) -> (String, String) {
        ("rules".to_string(), format!("{ground_truth} | {system_response}"))
    }
}

struct UnreachableStore;

impl DocumentStore for UnreachableStore {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn find(&self, _filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    fn get(&self, _id: &str) -> StoreResult<Option<Document>> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    fn insert(&self, _document: Document) -> StoreResult<()> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    fn set_score(
        &self,
        _id: &str,
        _model: &str,
        _record: &ScoreRecord,
    ) -> StoreResult<UpdateOutcome> {
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

#[derive(Default)]
struct RecordingProgress {
    prompts: Mutex<Vec<String>>,
    completed: AtomicUsize,
}

impl ProgressCallback for RecordingProgress {
    fn on_sample_start(&self, _sample_id: &str, _model: &str) {}

    fn on_sample_complete(&self, _sample_id: &str, _model: &str, _success: bool) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_progress(&self, _completed: usize, _total: usize) {}

    fn on_prompt(&self, sample_id: &str, _system: &str, user: &str) {
        self.prompts
            .lock()
            .unwrap()
            .push(format!("{sample_id}: {user}"));
    }
}

fn quote(text: &str) -> String {
    format!("##begin_quote## {text} ##end_quote##")
}

fn docs(responses: &[&str]) -> Vec<Document> {
    responses
        .iter()
        .enumerate()
        .map(|(i, response)| {
            Document::new(format!("doc-{i}"), quote(&format!("fact {i}")))
                .with_inference("m1", quote(&format!("{response} {i}")))
        })
        .collect()
}

fn evaluator(store: Arc<dyn DocumentStore>, judge: Arc<MockJudge>) -> Evaluator {
    Evaluator::new(store, judge)
}

#[tokio::test]
async fn end_to_end_near_identical_quotes() {
    let store = Arc::new(MemoryStore::with_documents([
        Document::new("cats", GT).with_inference("m1", SYS)
    ]));
    let judge = MockJudge::new(1.0, 1.0);
    let summary = evaluator(store.clone(), judge)
        .run_evaluation(&RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.models_evaluated, vec!["m1"]);
    assert_eq!(summary.documents_considered, 1);

    let record = *store.get("cats").unwrap().unwrap().score("m1").unwrap();
    assert_eq!(record.recall, 1.0);
    assert_eq!(record.precision, 1.0);
    assert_eq!(record.f1, 1.0);
    assert_eq!(record.format_score, 1.0);
    assert_eq!(format_score(GT), 1.0);
    assert!(record.bm25 > 0.0 && record.bm25 <= 1.0);
    assert_eq!(record.bm25, bm25_score(GT, SYS));
}

#[tokio::test]
async fn rerun_without_force_scores_nothing() {
    let store = Arc::new(MemoryStore::with_documents([
        Document::new("cats", GT).with_inference("m1", SYS)
    ]));
    let judge = MockJudge::new(1.0, 1.0);
    let evaluator = evaluator(store.clone(), judge.clone());

    evaluator.run_evaluation(&RunOptions::default()).await.unwrap();
    let first = *store.get("cats").unwrap().unwrap().score("m1").unwrap();

    judge.set_verdict(0.5, 0.5);
    let second = evaluator.run_evaluation(&RunOptions::default()).await.unwrap();
    let report = second.report("m1").unwrap();
    assert_eq!(report.selected, 0);
    assert_eq!(report.scored, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(judge.calls(), 1);
    assert_eq!(
        store.get("cats").unwrap().unwrap().score("m1"),
        Some(&first)
    );
}

#[tokio::test]
async fn force_overwrites_single_field() {
    let store = Arc::new(MemoryStore::with_documents([Document::new("cats", GT)
        .with_inference("m1", SYS)
        .with_inference("m2", SYS)]));
    let judge = MockJudge::new(1.0, 1.0);
    let evaluator = evaluator(store.clone(), judge.clone());
    evaluator.run_evaluation(&RunOptions::default()).await.unwrap();

    judge.set_verdict(0.5, 0.5);
    let summary = evaluator
        .run_evaluation(&RunOptions::default().with_models(["m1"]).with_force(true))
        .await
        .unwrap();
    assert_eq!(summary.report("m1").unwrap().scored, 1);

    let doc = store.get("cats").unwrap().unwrap();
    assert_eq!(doc.scores.len(), 2);
    assert_eq!(
        doc.score("m1"),
        Some(&ScoreRecord::new(0.5, 0.5, bm25_score(GT, SYS), 1.0))
    );
    assert_eq!(doc.score("m2").unwrap().recall, 1.0);
    assert_eq!(doc.inferences.len(), 2);
    assert_eq!(doc.ground_truth_quotes, GT);
}

#[tokio::test]
async fn one_judge_failure_does_not_abort_batch() {
    let documents = docs(&["ok", "ok", "FAIL", "ok", "ok"]);
    let store = Arc::new(MemoryStore::with_documents(documents));
    let judge = MockJudge::new(1.0, 1.0);

    let summary = evaluator(store.clone(), judge)
        .run_evaluation(&RunOptions::default().with_max_workers(3))
        .await
        .unwrap();
    let report = summary.report("m1").unwrap();

    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.errored, 1);
    assert_eq!(report.scored, 4);
    assert_eq!(report.persisted, 4);
    assert!(report.outcomes[2].is_error());
    assert!(report.outcomes[2].record.is_none());
    assert!(store.get("doc-2").unwrap().unwrap().scores.is_empty());
    assert_eq!(report.stats.count, 4);
}

#[tokio::test]
async fn panicking_sample_becomes_error_record() {
    let store = Arc::new(MemoryStore::with_documents(docs(&["ok", "PANIC", "ok"])));
    let judge = MockJudge::new(1.0, 1.0);

    for workers in [1, 3] {
        let summary = evaluator(store.clone(), judge.clone())
            .run_evaluation(
                &RunOptions::default()
                    .with_max_workers(workers)
                    .with_force(true),
            )
            .await
            .unwrap();
        let report = summary.report("m1").unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.errored, 1);
        assert!(report.outcomes[1].is_error());
        assert!(report.outcomes[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("task failed"));
    }
}

#[tokio::test]
async fn outcomes_follow_submission_order() {
    let documents = docs(&["slow", "fast", "slow", "fast", "slow", "fast"]);
    let expected: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
    let store = Arc::new(MemoryStore::with_documents(documents));

    let summary = evaluator(store, MockJudge::new(1.0, 1.0))
        .run_evaluation(&RunOptions::default().with_max_workers(4))
        .await
        .unwrap();
    let ids: Vec<String> = summary
        .report("m1")
        .unwrap()
        .outcomes
        .iter()
        .map(|o| o.id.clone())
        .collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn sequential_and_parallel_runs_match() {
    let documents = docs(&["alpha", "slow beta", "FAIL", "gamma delta", "slow"]);
    let sequential = Arc::new(MemoryStore::with_documents(documents.clone()));
    let parallel = Arc::new(MemoryStore::with_documents(documents));

    let seq_summary = evaluator(sequential.clone(), MockJudge::new(0.75, 0.5))
        .run_evaluation(&RunOptions::default().with_max_workers(1))
        .await
        .unwrap();
    let par_summary = evaluator(parallel.clone(), MockJudge::new(0.75, 0.5))
        .run_evaluation(&RunOptions::default().with_max_workers(8))
        .await
        .unwrap();

    let strip = |summary: &quote_eval::runner::EvaluationSummary| {
        summary.reports[0]
            .outcomes
            .iter()
            .map(|o| (o.id.clone(), o.status, o.record, o.persistence))
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(&seq_summary), strip(&par_summary));
    assert_eq!(seq_summary.reports[0].stats, par_summary.reports[0].stats);
    assert_eq!(
        sequential.find(&DocumentFilter::default()).unwrap(),
        parallel.find(&DocumentFilter::default()).unwrap()
    );
}

#[tokio::test]
async fn empty_system_response_still_judged() {
    let store = Arc::new(MemoryStore::new());
    let judge = MockJudge::new(0.0, 0.0);
    let evaluator = evaluator(store, judge.clone());

    let record = evaluator
        .evaluate_single(&Sample::new("x", GT, ""), false)
        .await
        .unwrap();
    assert_eq!(judge.calls(), 1);
    assert_eq!(record.bm25, 0.0);
    assert_eq!(record.format_score, 0.0);
    assert_eq!(record.f1, 0.0);
}

#[tokio::test]
async fn contradictory_verdict_is_repaired() {
    let gt = format!("{}\n{}", quote("one"), quote("two"));
    let sys = format!("{} {} {}", quote("one"), quote("x"), quote("y"));
    let store = Arc::new(MemoryStore::with_documents([
        Document::new("d", gt).with_inference("m1", sys)
    ]));

    evaluator(store.clone(), MockJudge::new(0.5, 0.0))
        .run_evaluation(&RunOptions::default())
        .await
        .unwrap();

    let record = *store.get("d").unwrap().unwrap().score("m1").unwrap();
    assert_eq!(record.recall, 0.5);
    assert_eq!(record.precision, 0.3333);
    assert!(record.f1 > 0.0);
}

#[tokio::test]
async fn persistence_mismatch_is_reported_per_sample() {
    let inner = MemoryStore::with_documents(docs(&["a", "b", "c"]));
    let store = Arc::new(VanishingStore {
        inner,
        vanished: "doc-1".to_string(),
    });

    let summary = evaluator(store.clone(), MockJudge::new(1.0, 1.0))
        .run_evaluation(&RunOptions::default())
        .await
        .unwrap();
    let report = summary.report("m1").unwrap();

    assert_eq!(report.scored, 3);
    assert_eq!(report.errored, 0);
    assert_eq!(report.persisted, 2);
    assert_eq!(report.mismatched, 1);
    assert!(report.outcomes[1].is_mismatched());
    assert!(store.get("doc-1").unwrap().unwrap().scores.is_empty());
}

#[tokio::test]
async fn failed_score_write_is_counted() {
    let inner = MemoryStore::with_documents(docs(&["a", "b", "c"]));
    let store = Arc::new(BrokenWriteStore {
        inner,
        broken: "doc-2".to_string(),
    });

    let summary = evaluator(store.clone(), MockJudge::new(1.0, 1.0))
        .run_evaluation(&RunOptions::default())
        .await
        .unwrap();
    let report = summary.report("m1").unwrap();

    assert_eq!(report.scored, 3);
    assert_eq!(report.errored, 0);
    assert_eq!(report.persisted, 2);
    assert_eq!(report.mismatched, 0);
    assert_eq!(report.persist_failed, 1);
    assert!(report.outcomes[2].is_persist_failed());
    assert!(report.outcomes[2]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("persistence failed"));
    assert!(store.get("doc-2").unwrap().unwrap().scores.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_bounds_concurrent_judge_calls() {
    let responses = vec!["r"; 20];
    for workers in [1, 3] {
        let store = Arc::new(MemoryStore::with_documents(docs(&responses)));
        let judge = Arc::new(ConcurrencyJudge::default());

        let summary = Evaluator::new(store, judge.clone())
            .run_evaluation(&RunOptions::default().with_max_workers(workers))
            .await
            .unwrap();

        assert_eq!(summary.report("m1").unwrap().scored, 20);
        assert!(judge.peak() <= workers, "workers={} peak={}", workers, judge.peak());
        if workers == 1 {
            assert_eq!(judge.peak(), 1);
        } else {
            assert!(judge.peak() > 1, "no parallelism with {} workers", workers);
        }
    }
}

#[tokio::test]
async fn unreachable_store_fails_the_batch() {
    let err = evaluator(Arc::new(UnreachableStore), MockJudge::new(1.0, 1.0))
        .run_evaluation(&RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::Store(StoreError::Connection(_))));
}

#[tokio::test]
async fn model_list_and_document_filter() {
    let store = Arc::new(MemoryStore::with_documents([
        Document::new("a", GT)
            .with_inference("m1", SYS)
            .with_inference("m2", SYS),
        Document::new("b", GT).with_inference("m2", SYS),
        Document::new("no-gt", "").with_inference("m1", SYS),
        Document::new("no-inference", GT),
    ]));
    let judge = MockJudge::new(1.0, 1.0);
    let evaluator = evaluator(store.clone(), judge.clone());

    let summary = evaluator
        .run_evaluation(&RunOptions::default().with_models(["m2", "ghost"]))
        .await
        .unwrap();
    assert_eq!(summary.documents_considered, 2);
    assert_eq!(summary.models_evaluated, vec!["m2"]);
    assert_eq!(summary.report("m2").unwrap().scored, 2);
    assert!(store.get("a").unwrap().unwrap().score("m1").is_none());

    let summary = evaluator
        .run_evaluation(&RunOptions::default().with_document("a"))
        .await
        .unwrap();
    assert_eq!(summary.documents_considered, 1);
    assert_eq!(summary.models_evaluated, vec!["m1", "m2"]);
    assert_eq!(summary.report("m1").unwrap().scored, 1);
    assert_eq!(summary.report("m2").unwrap().skipped, 1);
    assert_eq!(judge.calls(), 3);
}

#[tokio::test]
async fn no_matching_documents_is_a_no_op() {
    let store = Arc::new(MemoryStore::with_documents([Document::new("a", GT)]));
    let judge = MockJudge::new(1.0, 1.0);
    let summary = evaluator(store, judge.clone())
        .run_evaluation(&RunOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.documents_considered, 0);
    assert!(summary.models_evaluated.is_empty());
    assert!(summary.reports.is_empty());
    assert_eq!(judge.calls(), 0);
}

#[tokio::test]
async fn single_document_echoes_prompts() {
    let store = Arc::new(MemoryStore::with_documents(docs(&["a", "b"])));
    let progress = Arc::new(RecordingProgress::default());
    let evaluator = evaluator(store, MockJudge::new(1.0, 1.0)).with_progress(progress.clone());

    evaluator
        .run_evaluation(&RunOptions::default().with_document("doc-1"))
        .await
        .unwrap();
    let prompts = progress.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("doc-1: "));
    assert_eq!(progress.completed.load(Ordering::SeqCst), 1);

    evaluator
        .run_evaluation(&RunOptions::default().with_force(true))
        .await
        .unwrap();
    assert_eq!(progress.prompts.lock().unwrap().len(), 1);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn manual_scores_bypass_the_judge() {
    let store = Arc::new(MemoryStore::with_documents([
        Document::new("cats", GT).with_inference("m1", SYS)
    ]));
    let judge = MockJudge::new(1.0, 1.0);
    let evaluator = evaluator(store.clone(), judge.clone());

    assert!(evaluator
        .apply_manual_score("cats", "m1", 1.0 / 3.0, 0.5)
        .await
        .unwrap());
    assert!(!evaluator.apply_manual_score("ghost", "m1", 1.0, 1.0).await.unwrap());
    assert!(!evaluator.apply_manual_score("cats", "m9", 1.0, 1.0).await.unwrap());
    assert_eq!(judge.calls(), 0);

    let record = *store.get("cats").unwrap().unwrap().score("m1").unwrap();
    assert_eq!(record.recall, 0.3333);
    assert_eq!(record.precision, 0.5);
    assert_eq!(record.f1, 0.4);
    assert_eq!(record.bm25, bm25_score(GT, SYS));
    assert_eq!(record.format_score, 1.0);

    let updated = evaluator
        .apply_manual_scores(&[
            ManualScore::new("cats", "m1", 1.0, 1.0),
            ManualScore::new("ghost", "m1", 1.0, 1.0),
            ManualScore::new("", "m1", 1.0, 1.0),
        ])
        .await
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(
        store.get("cats").unwrap().unwrap().score("m1").unwrap().f1,
        1.0
    );
}

#[tokio::test]
async fn aggregate_after_runs() {
    let store = Arc::new(MemoryStore::with_documents(docs(&["a", "b", "FAIL"])));
    let evaluator = evaluator(store, MockJudge::new(1.0, 0.5));

    assert!(evaluator.get_aggregate(None).await.unwrap().is_empty());
    evaluator.run_evaluation(&RunOptions::default()).await.unwrap();

    let aggregates = evaluator.get_aggregate(None).await.unwrap();
    let stats = aggregates["m1"];
    assert_eq!(stats.count, 2);
    assert_eq!(stats.avg_recall, 1.0);
    assert_eq!(stats.avg_precision, 0.5);
    assert_eq!(stats.avg_f1, 0.6667);
    assert_eq!(stats.avg_format_score, 1.0);

    assert!(evaluator.get_aggregate(Some("other")).await.unwrap().is_empty());
}

#[tokio::test]
async fn sqlite_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval.sqlite");

    {
        let store = SqliteStore::open(&path).unwrap();
        for document in docs(&["a", "FAIL", "c"]) {
            store.insert(document).unwrap();
        }
        let store: Arc<dyn DocumentStore> = Arc::new(store);
        let summary = evaluator(store, MockJudge::new(1.0, 1.0))
            .run_evaluation(&RunOptions::default().with_max_workers(2))
            .await
            .unwrap();
        let report = summary.report("m1").unwrap();
        assert_eq!(report.persisted, 2);
        assert_eq!(report.errored, 1);
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.find(&DocumentFilter::scored()).unwrap().len(), 2);
    assert!(reopened.get("doc-1").unwrap().unwrap().scores.is_empty());

    let aggregates = quote_eval::analysis::get_aggregate(&reopened, Some("m1")).unwrap();
    assert_eq!(aggregates["m1"].count, 2);
}
