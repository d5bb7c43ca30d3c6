use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::documents::{DocumentLookup, DocumentReference, TextExtractor};
use crate::evaluation::prompts::{
    build_prompt, build_summary_prompt, DocumentKind, CV_RESULT_KEYS, CV_RESULT_SCHEMA,
    REPORT_RESULT_KEYS, REPORT_RESULT_SCHEMA, SUMMARY_RESULT_KEYS,
};
use crate::evaluation::record::EvaluationRecord;
use crate::evaluation::store::RecordStore;
use crate::evaluation::strategy::EvaluationStrategy;
use crate::evaluation::{EvaluationError, EvaluationJob, EvaluationRequest, Stage};
use crate::llm_client::LlmCaller;
use crate::queue::JobHandler;

/// How a delivered job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// A terminal record already existed; nothing was re-run.
    AlreadyTerminal,
}

/// Drives one evaluation job from delivery to a terminal record.
pub struct EvaluationWorker {
    documents: Arc<dyn DocumentLookup>,
    extractor: Arc<dyn TextExtractor>,
    strategy: Arc<dyn EvaluationStrategy>,
    llm: Arc<dyn LlmCaller>,
    records: Arc<dyn RecordStore>,
}

impl EvaluationWorker {
    pub fn new(
        documents: Arc<dyn DocumentLookup>,
        extractor: Arc<dyn TextExtractor>,
        strategy: Arc<dyn EvaluationStrategy>,
        llm: Arc<dyn LlmCaller>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            documents,
            extractor,
            strategy,
            llm,
            records,
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Job lifecycle
    // ────────────────────────────────────────────────────────────────────────

    /// Processes one delivery.
    ///
    /// Anticipated failures end as a `failed` record and return `Ok`. Only
    /// record-store faults are returned as `Err`, so the queue retries them.
    ///
    /// The record is read before the index guard: a terminal record is never
    /// overwritten, and recording the guard failure needs the store anyway.
    pub async fn process(&self, job: &EvaluationJob) -> anyhow::Result<JobOutcome> {
        let existing = self
            .records
            .find(&job.id)
            .await
            .with_context(|| format!("failed to read evaluation record for job {}", job.id))?;

        let mut record = match existing {
            Some(record) if record.status.is_terminal() => {
                info!(
                    job_id = %job.id,
                    status = %record.status,
                    "Job already has a terminal record; skipping redelivery"
                );
                return Ok(JobOutcome::AlreadyTerminal);
            }
            Some(record) => {
                warn!(
                    job_id = %job.id,
                    status = %record.status,
                    "Job was interrupted before finishing; restarting"
                );
                record
            }
            None => EvaluationRecord::new(&job.id),
        };

        if let Some(reason) = self.strategy.unavailable_reason() {
            let err = EvaluationError::IndexUnavailable(reason);
            error!(job_id = %job.id, strategy = self.strategy.name(), "{err}");
            record.fail(err.to_string())?;
            self.persist(&record).await?;
            return Ok(JobOutcome::Failed);
        }

        record.start()?;
        self.persist(&record).await?;
        info!(
            job_id = %job.id,
            cv_id = job.request.cv_id,
            report_id = job.request.report_id,
            job_title = %job.request.job_title,
            strategy = self.strategy.name(),
            "Evaluation started"
        );

        match self.run_pipeline(&job.request).await {
            Ok(result) => {
                record.complete(result)?;
                self.persist(&record).await?;
                info!(job_id = %job.id, "Evaluation completed");
                Ok(JobOutcome::Completed)
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Evaluation failed");
                record.fail(err.to_string())?;
                self.persist(&record).await?;
                Ok(JobOutcome::Failed)
            }
        }
    }

    async fn persist(&self, record: &EvaluationRecord) -> anyhow::Result<()> {
        self.records.save(record).await.with_context(|| {
            format!(
                "failed to write {} record for job {}",
                record.status, record.job_id
            )
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ────────────────────────────────────────────────────────────────────────

    /// Steps:
    /// 1. resolve both document ids
    /// 2. extract both texts ∥ fetch rubric context for both prompts
    /// 3. CV call → report call → summary call, strictly in order
    /// 4. shallow-merge the three JSON objects
    async fn run_pipeline(&self, request: &EvaluationRequest) -> Result<Value, EvaluationError> {
        // Step 1: Resolve documents
        let (cv_doc, report_doc) = tokio::try_join!(
            self.documents.resolve(request.cv_id),
            self.documents.resolve(request.report_id),
        )?;

        // Step 2: Extraction and retrieval share no inputs beyond the job title
        let (cv_text, report_text, contexts) = tokio::try_join!(
            self.extract(&cv_doc),
            self.extract(&report_doc),
            self.strategy.rubric_contexts(&request.job_title),
        )?;

        // Step 3: Sequential model calls
        let cv_prompt = build_prompt(
            DocumentKind::Cv,
            &cv_text,
            &contexts.cv,
            &request.job_title,
            CV_RESULT_SCHEMA,
        );
        let cv_result = self.evaluate(Stage::Cv, &cv_prompt, CV_RESULT_KEYS).await?;

        let report_prompt = build_prompt(
            DocumentKind::ProjectReport,
            &report_text,
            &contexts.report,
            &request.job_title,
            REPORT_RESULT_SCHEMA,
        );
        let report_result = self
            .evaluate(Stage::Report, &report_prompt, REPORT_RESULT_KEYS)
            .await?;

        let summary_prompt = build_summary_prompt(&cv_result, &report_result, &request.job_title);
        let summary_result = self
            .evaluate(Stage::Summary, &summary_prompt, SUMMARY_RESULT_KEYS)
            .await?;

        // Step 4: Merge
        merge_results([
            (Stage::Cv, cv_result),
            (Stage::Report, report_result),
            (Stage::Summary, summary_result),
        ])
    }

    async fn extract(&self, document: &DocumentReference) -> Result<String, EvaluationError> {
        let text = self.extractor.extract(&document.storage_path).await?;
        if text.trim().is_empty() {
            warn!(
                document_id = document.id,
                name = %document.original_name,
                "Document has no text layer"
            );
        }
        Ok(text)
    }

    async fn evaluate(
        &self,
        stage: Stage,
        prompt: &str,
        required_keys: &[&str],
    ) -> Result<Map<String, Value>, EvaluationError> {
        info!(stage = %stage, "Calling LLM");
        let raw = self
            .llm
            .call(prompt)
            .await
            .map_err(|source| EvaluationError::Llm { stage, source })?;
        parse_result(stage, &raw, required_keys)
    }
}

#[async_trait]
impl JobHandler for EvaluationWorker {
    async fn handle(&self, job: &EvaluationJob) -> anyhow::Result<()> {
        self.process(job).await.map(|_| ())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Response handling
// ────────────────────────────────────────────────────────────────────────────

/// Parses a raw model reply into a JSON object holding every required key.
fn parse_result(
    stage: Stage,
    raw: &str,
    required_keys: &[&str],
) -> Result<Map<String, Value>, EvaluationError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|source| EvaluationError::Parse { stage, source })?;

    let Value::Object(object) = value else {
        return Err(EvaluationError::MalformedResult {
            stage,
            message: "expected a JSON object".to_string(),
        });
    };

    let missing: Vec<&str> = required_keys
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(EvaluationError::MalformedResult {
            stage,
            message: format!("missing keys: {}", missing.join(", ")),
        });
    }

    Ok(object)
}

/// Shallow merge; a key produced by two stages is rejected rather than overwritten.
fn merge_results<const N: usize>(
    parts: [(Stage, Map<String, Value>); N],
) -> Result<Value, EvaluationError> {
    let mut merged = Map::new();
    for (stage, part) in parts {
        for (key, value) in part {
            if merged.contains_key(&key) {
                return Err(EvaluationError::MalformedResult {
                    stage,
                    message: format!("key '{key}' duplicates an earlier result"),
                });
            }
            merged.insert(key, value);
        }
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::fakes::{
        FakeExtractor, FakeIndex, MemoryDocuments, MemoryRecordStore, ScriptedLlm, CV_RESPONSE,
        REPORT_RESPONSE,
    };
    use crate::evaluation::record::EvaluationStatus;
    use crate::evaluation::strategy::{DirectStrategy, RagStrategy};
    use crate::llm_client::LlmError;
    use crate::retrieval::{ContextIndex, EMPTY_CONTEXT_PLACEHOLDER};
    use serde_json::json;

    struct Harness {
        extractor: Arc<FakeExtractor>,
        llm: Arc<ScriptedLlm>,
        records: Arc<MemoryRecordStore>,
        worker: EvaluationWorker,
    }

    fn harness_with(
        extractor: FakeExtractor,
        strategy: Arc<dyn EvaluationStrategy>,
        llm: ScriptedLlm,
    ) -> Harness {
        let documents = MemoryDocuments::new()
            .with(1, "uploads/cv.pdf")
            .with(2, "uploads/report.pdf");
        let extractor = Arc::new(extractor);
        let llm = Arc::new(llm);
        let records = Arc::new(MemoryRecordStore::new());
        let worker = EvaluationWorker::new(
            Arc::new(documents),
            extractor.clone(),
            strategy,
            llm.clone(),
            records.clone(),
        );
        Harness {
            extractor,
            llm,
            records,
            worker,
        }
    }

    fn default_extractor() -> FakeExtractor {
        FakeExtractor::new()
            .with("uploads/cv.pdf", "Five years of Rust and Postgres.")
            .with("uploads/report.pdf", "Built a queue-backed evaluation service.")
    }

    fn rag_strategy() -> Arc<dyn EvaluationStrategy> {
        let index: Arc<dyn ContextIndex> = Arc::new(FakeIndex::with_passages(&[(
            "Rubric: backend skills weigh 40%",
            0.91,
        )]));
        Arc::new(RagStrategy::new(Some(index), 3))
    }

    fn harness(llm: ScriptedLlm) -> Harness {
        harness_with(default_extractor(), rag_strategy(), llm)
    }

    fn job(id: &str, cv_id: i32, report_id: i32) -> EvaluationJob {
        EvaluationJob {
            id: id.to_string(),
            request: EvaluationRequest {
                cv_id,
                report_id,
                job_title: "Backend Engineer".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_healthy_job_completes_with_all_merged_keys() {
        let h = harness(ScriptedLlm::healthy());

        let outcome = h.worker.process(&job("job-1", 1, 2)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Completed);
        let record = h.records.get("job-1").unwrap();
        assert_eq!(record.status, EvaluationStatus::Completed);
        let result = record.result.unwrap();
        for key in [
            "cv_match_rate",
            "cv_feedback",
            "project_score",
            "project_feedback",
            "overall_summary",
        ] {
            assert!(result.get(key).is_some(), "missing {key}");
        }
        assert_eq!(
            h.records.status_history("job-1"),
            vec![EvaluationStatus::Processing, EvaluationStatus::Completed]
        );
        assert_eq!(h.llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_prompts_carry_context_and_previous_results() {
        let h = harness(ScriptedLlm::healthy());
        h.worker.process(&job("job-2", 1, 2)).await.unwrap();

        let prompts = h.llm.prompts();
        assert!(prompts[0].contains("Five years of Rust and Postgres."));
        assert!(prompts[0].contains("Rubric: backend skills weigh 40%"));
        assert!(prompts[1].contains("Built a queue-backed evaluation service."));
        assert!(prompts[2].contains(r#""cv_match_rate":0.82"#));
        assert!(prompts[2].contains(r#""project_score":4.5"#));
    }

    #[tokio::test]
    async fn test_unknown_cv_id_fails_without_llm_calls() {
        let h = harness(ScriptedLlm::healthy());

        let outcome = h.worker.process(&job("job-3", 99, 2)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Failed);
        let record = h.records.get("job-3").unwrap();
        assert_eq!(record.status, EvaluationStatus::Failed);
        assert!(record.error_message().unwrap().contains("99"));
        assert_eq!(h.llm.calls(), 0);
        assert_eq!(h.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_index_fails_fast_without_extraction() {
        let strategy: Arc<dyn EvaluationStrategy> = Arc::new(RagStrategy::new(None, 3));
        let h = harness_with(default_extractor(), strategy, ScriptedLlm::healthy());

        for id in ["job-4a", "job-4b"] {
            let outcome = h.worker.process(&job(id, 1, 2)).await.unwrap();
            assert_eq!(outcome, JobOutcome::Failed);
            let record = h.records.get(id).unwrap();
            assert!(record.error_message().unwrap().contains("index unavailable"));
            assert_eq!(h.records.status_history(id), vec![EvaluationStatus::Failed]);
        }
        assert_eq!(h.extractor.calls(), 0);
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_index_leaves_completed_record_untouched() {
        let strategy: Arc<dyn EvaluationStrategy> = Arc::new(RagStrategy::new(None, 3));
        let h = harness_with(default_extractor(), strategy, ScriptedLlm::healthy());
        let mut done = EvaluationRecord::new("job-4c");
        done.start().unwrap();
        done.complete(json!({ "overall_summary": "Good fit." })).unwrap();
        h.records.insert(done.clone());

        let outcome = h.worker.process(&job("job-4c", 1, 2)).await.unwrap();

        assert_eq!(outcome, JobOutcome::AlreadyTerminal);
        assert_eq!(h.records.get("job-4c").unwrap(), done);
        assert!(h.records.status_history("job-4c").is_empty());
    }

    #[tokio::test]
    async fn test_long_document_is_truncated_in_prompt() {
        let long_cv = format!("{}{}", "a".repeat(4000), "Ω".repeat(1000));
        let extractor = FakeExtractor::new()
            .with("uploads/cv.pdf", long_cv)
            .with("uploads/report.pdf", "report");
        let h = harness_with(extractor, rag_strategy(), ScriptedLlm::healthy());

        h.worker.process(&job("job-5", 1, 2)).await.unwrap();

        let cv_prompt = &h.llm.prompts()[0];
        assert!(cv_prompt.contains(&"a".repeat(4000)));
        assert!(!cv_prompt.contains('Ω'));
    }

    #[tokio::test]
    async fn test_cv_timeout_fails_before_report_call() {
        let llm = ScriptedLlm::new(vec![
            Err(LlmError::Timeout { secs: 60 }),
            Ok(REPORT_RESPONSE.to_string()),
        ]);
        let h = harness(llm);

        let outcome = h.worker.process(&job("job-6", 1, 2)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Failed);
        let record = h.records.get("job-6").unwrap();
        assert!(record.error_message().unwrap().contains("timeout"));
        assert_eq!(h.llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_after_completion_is_a_no_op() {
        let h = harness(ScriptedLlm::healthy());
        let delivered = job("job-7", 1, 2);

        assert_eq!(h.worker.process(&delivered).await.unwrap(), JobOutcome::Completed);
        let first = h.records.get("job-7").unwrap();
        assert_eq!(
            h.worker.process(&delivered).await.unwrap(),
            JobOutcome::AlreadyTerminal
        );

        assert_eq!(h.records.record_count(), 1);
        assert_eq!(h.records.get("job-7").unwrap(), first);
        assert_eq!(h.llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_record_left_processing_is_rerun() {
        let h = harness(ScriptedLlm::healthy());
        let mut stale = EvaluationRecord::new("job-8");
        stale.start().unwrap();
        h.records.insert(stale);

        let outcome = h.worker.process(&job("job-8", 1, 2)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(h.records.record_count(), 1);
        assert_eq!(h.records.get("job-8").unwrap().status, EvaluationStatus::Completed);
    }

    #[tokio::test]
    async fn test_non_json_reply_fails_the_job() {
        let h = harness(ScriptedLlm::replying(&["Sure! Here is the evaluation."]));

        h.worker.process(&job("job-9", 1, 2)).await.unwrap();

        let record = h.records.get("job-9").unwrap();
        assert_eq!(record.status, EvaluationStatus::Failed);
        assert!(record
            .error_message()
            .unwrap()
            .starts_with("CV evaluation returned invalid JSON"));
    }

    #[tokio::test]
    async fn test_reply_missing_schema_key_is_malformed() {
        let h = harness(ScriptedLlm::replying(&[
            CV_RESPONSE,
            r#"{"project_score": 3.0}"#,
        ]));

        h.worker.process(&job("job-10", 1, 2)).await.unwrap();

        let message = h.records.get("job-10").unwrap().error_message().unwrap().to_string();
        assert!(message.contains("Project report evaluation"));
        assert!(message.contains("project_feedback"));
    }

    #[tokio::test]
    async fn test_duplicate_key_across_replies_is_malformed() {
        let h = harness(ScriptedLlm::replying(&[
            CV_RESPONSE,
            REPORT_RESPONSE,
            r#"{"overall_summary": "ok", "cv_match_rate": 0.1}"#,
        ]));

        h.worker.process(&job("job-11", 1, 2)).await.unwrap();

        let message = h.records.get("job-11").unwrap().error_message().unwrap().to_string();
        assert!(message.contains("cv_match_rate"));
        assert!(message.starts_with("Overall summary"));
    }

    #[tokio::test]
    async fn test_empty_retrieval_degrades_to_placeholder() {
        let index: Arc<dyn ContextIndex> = Arc::new(FakeIndex::with_passages(&[]));
        let strategy: Arc<dyn EvaluationStrategy> = Arc::new(RagStrategy::new(Some(index), 3));
        let h = harness_with(default_extractor(), strategy, ScriptedLlm::healthy());

        let outcome = h.worker.process(&job("job-12", 1, 2)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Completed);
        assert!(h.llm.prompts()[0].contains(EMPTY_CONTEXT_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_extraction_failure_names_the_path() {
        let extractor = FakeExtractor::new().with("uploads/cv.pdf", "cv text");
        let h = harness_with(extractor, rag_strategy(), ScriptedLlm::healthy());

        h.worker.process(&job("job-13", 1, 2)).await.unwrap();

        let record = h.records.get("job-13").unwrap();
        assert!(record.error_message().unwrap().contains("uploads/report.pdf"));
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_store_write_failure_escapes_to_queue() {
        let h = harness(ScriptedLlm::healthy());
        h.records.set_fail_writes(true);

        let err = h.worker.process(&job("job-14", 1, 2)).await.unwrap_err();

        assert!(format!("{err:#}").contains("job-14"));
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_direct_strategy_never_retrieves() {
        let h = harness_with(
            default_extractor(),
            Arc::new(DirectStrategy),
            ScriptedLlm::healthy(),
        );

        let outcome = h.worker.process(&job("job-15", 1, 2)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Completed);
        assert!(h.llm.prompts()[0].contains("No reference documents were retrieved"));
    }

    #[tokio::test]
    async fn test_handler_maps_recorded_failure_to_ok() {
        let h = harness(ScriptedLlm::new(vec![Err(LlmError::MissingApiKey)]));
        let result = JobHandler::handle(&h.worker, &job("job-16", 1, 2)).await;
        assert!(result.is_ok());
        assert_eq!(
            h.records.get("job-16").unwrap().status,
            EvaluationStatus::Failed
        );
    }

    #[test]
    fn test_parse_result_rejects_non_object() {
        let err = parse_result(Stage::Cv, "[1, 2]", CV_RESULT_KEYS).unwrap_err();
        assert!(matches!(err, EvaluationError::MalformedResult { .. }));
    }

    #[test]
    fn test_merge_keeps_every_key() {
        let a = json!({ "x": 1 }).as_object().unwrap().clone();
        let b = json!({ "y": 2 }).as_object().unwrap().clone();
        let merged = merge_results([(Stage::Cv, a), (Stage::Report, b)]).unwrap();
        assert_eq!(merged, json!({ "x": 1, "y": 2 }));
    }
}
