//! Batch evaluation of competing models against stored ground truth

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::analysis::{bm25_score, reconcile, AggregateStats, ScoreRecord};
use crate::judge::{JudgeError, QuoteJudge};
use crate::quotes::format_score;
use crate::samples::{ManualScore, Sample, SampleOutcome};
use crate::store::{Document, DocumentFilter, DocumentStore, StoreError, StoreResult};

/// Batch-level failures. Per-sample failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Store task failed: {0}")]
    Join(String),
}

/// Options of one batch run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Models to score; `None` scores every model present in the selected documents
    pub models: Option<Vec<String>>,
    /// Restrict the run to a single document
    pub document_id: Option<String>,
    /// Recompute and overwrite existing scores
    pub force: bool,
    /// Worker pool size; `<= 1` runs samples strictly in order
    pub max_workers: usize,
    /// Echo judge prompts; defaults to on when a single document is targeted
    pub verbose: Option<bool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            models: None,
            document_id: None,
            force: false,
            max_workers: 5,
            verbose: None,
        }
    }
}

impl RunOptions {
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_document(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    fn echo_prompts(&self) -> bool {
        self.verbose.unwrap_or(self.document_id.is_some())
    }
}

/// Outcome of scoring one model
#[derive(Debug, Clone, Serialize)]
pub struct ModelRunReport {
    pub model: String,
    pub selected: usize,
    pub scored: usize,
    /// Already scored, or carrying an empty response
    pub skipped: usize,
    pub errored: usize,
    pub persisted: usize,
    pub mismatched: usize,
    /// Scored, but the score write failed
    pub persist_failed: usize,
    /// Means over the samples scored in this run
    pub stats: AggregateStats,
    /// In selection order
    pub outcomes: Vec<SampleOutcome>,
}

/// Result of a batch run
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationSummary {
    pub models_evaluated: Vec<String>,
    pub documents_considered: usize,
    pub reports: Vec<ModelRunReport>,
}

impl EvaluationSummary {
    pub fn report(&self, model: &str) -> Option<&ModelRunReport> {
        self.reports.iter().find(|r| r.model == model)
    }
}

/// Run a store operation on the blocking pool
async fn with_store<T, F>(store: &Arc<dyn DocumentStore>, op: F) -> Result<T, EvalError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DocumentStore) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| EvalError::Join(e.to_string()))?
        .map_err(EvalError::from)
}

/// Scores competing models' quote responses and persists the results
pub struct Evaluator {
    store: Arc<dyn DocumentStore>,
    judge: Arc<dyn QuoteJudge>,
    progress: Arc<dyn ProgressCallback>,
}

impl Evaluator {
    pub fn new(store: Arc<dyn DocumentStore>, judge: Arc<dyn QuoteJudge>) -> Self {
        Self {
            store,
            judge,
            progress: Arc::new(NoOpProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Score every selected (document, model) pair lacking a score, or all of
    /// them when `force` is set
    pub async fn run_evaluation(
        &self,
        options: &RunOptions,
    ) -> Result<EvaluationSummary, EvalError> {
        let mut filter = DocumentFilter::evaluable();
        if let Some(id) = &options.document_id {
            tracing::info!("Filtering to single document: {}", id);
            filter = filter.with_id(id.clone());
        }

        let documents = with_store(&self.store, move |store| store.find(&filter)).await?;
        tracing::info!(
            "Loaded {} documents from {} store",
            documents.len(),
            self.store.name()
        );

        let mut summary = EvaluationSummary {
            documents_considered: documents.len(),
            ..EvaluationSummary::default()
        };
        if documents.is_empty() {
            return Ok(summary);
        }

        summary.models_evaluated = resolve_models(&documents, options.models.as_deref());
        tracing::info!("Models to evaluate: {:?}", summary.models_evaluated);

        let verbose = options.echo_prompts();
        for model in &summary.models_evaluated {
            let report = self
                .evaluate_model(
                    model,
                    &documents,
                    options.force,
                    options.max_workers,
                    verbose,
                )
                .await;
            summary.reports.push(report);
        }

        Ok(summary)
    }

    async fn evaluate_model(
        &self,
        model: &str,
        documents: &[Document],
        force: bool,
        max_workers: usize,
        verbose: bool,
    ) -> ModelRunReport {
        tracing::info!("Evaluating {}", model);
        let (samples, skipped) = select_samples(documents, model, force);
        let selected = samples.len();

        let outcomes = if samples.is_empty() {
            tracing::info!("No samples to evaluate for {} (all already scored)", model);
            Vec::new()
        } else {
            tracing::info!(
                "Evaluating {} samples with {} workers",
                selected,
                max_workers.max(1)
            );
            self.evaluate_samples(model, samples, max_workers, verbose).await
        };

        let stats = AggregateStats::from_records(outcomes.iter().filter_map(|o| o.record.as_ref()));
        let report = ModelRunReport {
            model: model.to_string(),
            selected,
            scored: outcomes.iter().filter(|o| !o.is_error()).count(),
            skipped,
            errored: outcomes.iter().filter(|o| o.is_error()).count(),
            persisted: outcomes
                .iter()
                .filter(|o| o.persistence.is_some_and(|p| p.matched))
                .count(),
            mismatched: outcomes.iter().filter(|o| o.is_mismatched()).count(),
            persist_failed: outcomes.iter().filter(|o| o.is_persist_failed()).count(),
            stats,
            outcomes,
        };

        tracing::info!(
            "{}: R={:.4} P={:.4} F1={:.4} BM25={:.4} FMT={:.4} (scored {}, skipped {}, errored {})",
            model,
            report.stats.avg_recall,
            report.stats.avg_precision,
            report.stats.avg_f1,
            report.stats.avg_bm25,
            report.stats.avg_format_score,
            report.scored,
            report.skipped,
            report.errored
        );
        report
    }

    /// Evaluate and persist samples on a bounded worker pool. Outcomes come
    /// back in input order whatever the completion order.
    pub async fn evaluate_samples(
        &self,
        model: &str,
        samples: Vec<Sample>,
        max_workers: usize,
        verbose: bool,
    ) -> Vec<SampleOutcome> {
        let total = samples.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let mut outcomes = Vec::with_capacity(total);

        if max_workers <= 1 {
            for sample in samples {
                let id = sample.id.clone();
                let handle = self.spawn_sample(model, sample, verbose, None, &completed, total);
                outcomes.push(join_sample(handle, id, model).await);
            }
            return outcomes;
        }

        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut handles = Vec::with_capacity(total);
        for sample in samples {
            let id = sample.id.clone();
            let handle = self.spawn_sample(
                model,
                sample,
                verbose,
                Some(Arc::clone(&semaphore)),
                &completed,
                total,
            );
            handles.push((id, handle));
        }

        for (id, handle) in handles {
            outcomes.push(join_sample(handle, id, model).await);
        }
        outcomes
    }

    fn spawn_sample(
        &self,
        model: &str,
        sample: Sample,
        verbose: bool,
        semaphore: Option<Arc<Semaphore>>,
        completed: &Arc<AtomicUsize>,
        total: usize,
    ) -> JoinHandle<SampleOutcome> {
        let evaluator = self.clone_for_task();
        let model = model.to_string();
        let completed = Arc::clone(completed);

        tokio::spawn(async move {
            // The semaphore is never closed
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let outcome = evaluator.evaluate_and_persist(&model, sample, verbose).await;
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            evaluator.progress.on_progress(done, total);
            outcome
        })
    }

    /// Judge, reconcile and score one sample. Lexical and format scores
    /// cannot fail; any judge failure is returned as is.
    pub async fn evaluate_single(
        &self,
        sample: &Sample,
        verbose: bool,
    ) -> Result<ScoreRecord, JudgeError> {
        if verbose {
            let (system, user) = self
                .judge
                .render_prompt(&sample.ground_truth, &sample.system_response);
            self.progress.on_prompt(&sample.id, &system, &user);
        }

        let verdict = self
            .judge
            .judge(&sample.ground_truth, &sample.system_response)
            .await?;
        let verdict = reconcile(verdict, &sample.ground_truth, &sample.system_response);

        Ok(ScoreRecord::new(
            verdict.recall,
            verdict.precision,
            bm25_score(&sample.ground_truth, &sample.system_response),
            format_score(&sample.system_response),
        ))
    }

    async fn evaluate_and_persist(
        &self,
        model: &str,
        sample: Sample,
        verbose: bool,
    ) -> SampleOutcome {
        self.progress.on_sample_start(&sample.id, model);

        let mut outcome = match self.evaluate_single(&sample, verbose).await {
            Ok(record) => SampleOutcome::scored(sample.id.clone(), model.to_string(), record),
            Err(e) => {
                tracing::error!("Judge failed for {} on {}: {}", sample.id, model, e);
                SampleOutcome::failure(sample.id.clone(), model.to_string(), e.to_string())
            }
        };

        if let Some(record) = outcome.record {
            let id = sample.id.clone();
            let field = model.to_string();
            let write = with_store(&self.store, move |store| store.set_score(&id, &field, &record));
            match write.await {
                Ok(update) if update.matched => {
                    tracing::debug!(
                        "Saved {} {} [R:{} P:{} F1:{:.3} BM25:{} FMT:{}]",
                        sample.id,
                        model,
                        record.recall,
                        record.precision,
                        record.f1,
                        record.bm25,
                        record.format_score
                    );
                    outcome.persistence = Some(update);
                }
                Ok(update) => {
                    tracing::warn!(
                        "Score update for {} on {} matched no document",
                        sample.id,
                        model
                    );
                    outcome.persistence = Some(update);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to persist score for {} on {}: {}",
                        sample.id,
                        model,
                        e
                    );
                    outcome.error_message = Some(format!("persistence failed: {}", e));
                }
            }
        }

        self.progress.on_sample_complete(&sample.id, model, !outcome.is_error());
        outcome
    }

    /// Per-model means over every stored score record
    pub async fn get_aggregate(
        &self,
        model: Option<&str>,
    ) -> Result<BTreeMap<String, AggregateStats>, EvalError> {
        let model = model.map(str::to_string);
        with_store(&self.store, move |store| {
            crate::analysis::get_aggregate(store, model.as_deref())
        })
        .await
    }

    /// Persist a human-assigned recall/precision, see [`apply_manual_score`]
    pub async fn apply_manual_score(
        &self,
        id: &str,
        model: &str,
        recall: f64,
        precision: f64,
    ) -> Result<bool, EvalError> {
        let id = id.to_string();
        let model = model.to_string();
        with_store(&self.store, move |store| {
            apply_manual_score(store, &id, &model, recall, precision)
        })
        .await
    }

    /// Apply a batch of manual scores, returning how many documents were updated
    pub async fn apply_manual_scores(&self, scores: &[ManualScore]) -> Result<usize, EvalError> {
        let scores = scores.to_vec();
        with_store(&self.store, move |store| apply_manual_scores(store, &scores)).await
    }

    /// Clone the evaluator for spawning tasks
    fn clone_for_task(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            judge: Arc::clone(&self.judge),
            progress: Arc::clone(&self.progress),
        }
    }
}

/// Persist a human-assigned recall/precision, recomputing the lexical,
/// format and F1 scores from the stored texts. Returns `false` when the
/// document or its response for `model` does not exist.
pub fn apply_manual_score(
    store: &dyn DocumentStore,
    id: &str,
    model: &str,
    recall: f64,
    precision: f64,
) -> StoreResult<bool> {
    if id.is_empty() || model.is_empty() {
        return Ok(false);
    }
    let Some(document) = store.get(id)? else {
        return Ok(false);
    };
    let Some(response) = document.inference(model) else {
        return Ok(false);
    };

    let record = ScoreRecord::rounded(
        recall,
        precision,
        bm25_score(&document.ground_truth_quotes, response),
        format_score(response),
    );
    let update = store.set_score(id, model, &record)?;
    if update.matched {
        tracing::info!(
            "Manual update {} {} [R:{} P:{} F1:{:.3} BM25:{} FMT:{}]",
            id,
            model,
            record.recall,
            record.precision,
            record.f1,
            record.bm25,
            record.format_score
        );
    }
    Ok(update.matched)
}

/// Batch form of [`apply_manual_score`]
pub fn apply_manual_scores(
    store: &dyn DocumentStore,
    scores: &[ManualScore],
) -> StoreResult<usize> {
    let mut updated = 0;
    for score in scores {
        if apply_manual_score(
            store,
            &score.id,
            &score.model,
            score.recall,
            score.precision,
        )? {
            updated += 1;
        }
    }
    tracing::info!("Updated {} documents with manual scores", updated);
    Ok(updated)
}

async fn join_sample(handle: JoinHandle<SampleOutcome>, id: String, model: &str) -> SampleOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Sample task for {} on {} failed: {}", id, model, e);
            SampleOutcome::failure(id, model.to_string(), format!("task failed: {}", e))
        }
    }
}

/// Sorted models present in `documents`, or the requested ones that are
fn resolve_models(documents: &[Document], requested: Option<&[String]>) -> Vec<String> {
    let present: BTreeSet<&str> = documents
        .iter()
        .flat_map(|d| d.inferences.keys().map(String::as_str))
        .collect();

    match requested {
        Some(requested) if !requested.is_empty() => requested
            .iter()
            .filter(|model| {
                let known = present.contains(model.as_str());
                if !known {
                    tracing::warn!("Skipping {}: no stored responses", model);
                }
                known
            })
            .cloned()
            .collect(),
        _ => present.into_iter().map(str::to_string).collect(),
    }
}

/// Samples to score for `model` and the number of documents skipped
pub fn select_samples(documents: &[Document], model: &str, force: bool) -> (Vec<Sample>, usize) {
    let mut samples = Vec::new();
    let mut skipped = 0;

    for document in documents {
        if !force && document.score(model).is_some() {
            skipped += 1;
            continue;
        }
        match Sample::from_document(document, model) {
            Some(sample) => samples.push(sample),
            None if document.inferences.contains_key(model) => skipped += 1,
            None => {}
        }
    }

    tracing::debug!(
        "Selected {} samples for {} ({} skipped)",
        samples.len(),
        model,
        skipped
    );
    (samples, skipped)
}

/// Progress callback for tracking evaluation
pub trait ProgressCallback: Send + Sync {
    fn on_sample_start(&self, sample_id: &str, model: &str);
    fn on_sample_complete(&self, sample_id: &str, model: &str, success: bool);
    fn on_progress(&self, completed: usize, total: usize);

    /// Prompts about to be sent for a sample, when echoing is enabled.
    /// Printed to stdout unless overridden.
    fn on_prompt(&self, sample_id: &str, system: &str, user: &str) {
        println!("{}", format_prompt_echo(sample_id, system, user));
    }
}

/// Console rendering of the prompts sent for one sample
pub fn format_prompt_echo(sample_id: &str, system: &str, user: &str) -> String {
    format!("--- Prompt for {} ---\n{}\n\n{}\n", sample_id, system, user)
}

/// Default callback: no progress output, prompts still echo when requested
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_sample_start(&self, _sample_id: &str, _model: &str) {}
    fn on_sample_complete(&self, _sample_id: &str, _model: &str, _success: bool) {}
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Console progress callback
pub struct ConsoleProgress;

impl ProgressCallback for ConsoleProgress {
    fn on_sample_start(&self, sample_id: &str, model: &str) {
        println!("  Starting {} on {}...", sample_id, model);
    }

    fn on_sample_complete(&self, sample_id: &str, model: &str, success: bool) {
        let status = if success { "OK" } else { "FAILED" };
        println!("  {} {} on {}", status, sample_id, model);
    }

    fn on_progress(&self, completed: usize, total: usize) {
        println!("Progress: {}/{} samples complete", completed, total);
    }
}
