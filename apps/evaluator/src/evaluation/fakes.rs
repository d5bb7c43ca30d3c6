//! In-memory fakes for the evaluation seams (testing only).
//!
//! Each fake records how it was used so tests can assert on call counts and
//! on the exact prompts and queries that reached it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::documents::{
    DocumentError, DocumentId, DocumentLookup, DocumentReference, ExtractionError, TextExtractor,
};
use crate::evaluation::record::{EvaluationRecord, EvaluationStatus};
use crate::evaluation::store::{RecordStore, StoreError};
use crate::evaluation::EvaluationRequest;
use crate::llm_client::{LlmCaller, LlmError};
use crate::queue::{JobEnqueuer, QueueError};
use crate::retrieval::{ContextIndex, RetrievalError, RetrievedContext, RetrievedPassage};

pub const CV_RESPONSE: &str = r#"{"cv_match_rate": 0.82, "cv_feedback": "Strong backend experience."}"#;
pub const REPORT_RESPONSE: &str =
    r#"{"project_score": 4.5, "project_feedback": "Solid chaining and error handling."}"#;
pub const SUMMARY_RESPONSE: &str =
    r#"{"overall_summary": "Good fit; would benefit from deeper RAG experience."}"#;

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, EvaluationRecord>>,
    writes: Mutex<Vec<EvaluationRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: EvaluationRecord) {
        let mut records = self.records.lock().unwrap();
        records.insert(record.job_id.clone(), record);
    }

    pub fn get(&self, job_id: &str) -> Option<EvaluationRecord> {
        self.records.lock().unwrap().get(job_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Statuses written for `job_id`, in write order.
    pub fn status_history(&self, job_id: &str) -> Vec<EvaluationStatus> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_id == job_id)
            .map(|r| r.status)
            .collect()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find(&self, job_id: &str) -> Result<Option<EvaluationRecord>, StoreError> {
        Ok(self.get(job_id))
    }

    async fn save(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.writes.lock().unwrap().push(record.clone());
        self.insert(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryDocuments
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryDocuments {
    documents: HashMap<DocumentId, DocumentReference>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: DocumentId, storage_path: &str) -> Self {
        self.documents.insert(
            id,
            DocumentReference {
                id,
                original_name: format!("document-{id}.pdf"),
                storage_path: storage_path.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl DocumentLookup for MemoryDocuments {
    async fn resolve(&self, id: DocumentId) -> Result<DocumentReference, DocumentError> {
        self.documents
            .get(&id)
            .cloned()
            .ok_or(DocumentError::NotFound { id })
    }
}

// ---------------------------------------------------------------------------
// FakeExtractor
// ---------------------------------------------------------------------------

/// Returns canned text per path; unknown paths fail like a corrupt PDF.
#[derive(Debug, Default)]
pub struct FakeExtractor {
    texts: HashMap<String, String>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, text: impl Into<String>) -> Self {
        self.texts.insert(path.to_string(), text.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, path: &str) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts
            .get(path)
            .cloned()
            .ok_or_else(|| ExtractionError::Parse {
                path: path.to_string(),
                message: "invalid PDF header".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// FakeIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeIndex {
    passages: Vec<RetrievedPassage>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeIndex {
    pub fn with_passages(passages: &[(&str, f32)]) -> Self {
        Self {
            passages: passages
                .iter()
                .map(|(text, score)| RetrievedPassage {
                    text: text.to_string(),
                    score: *score,
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextIndex for FakeIndex {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievedContext, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(RetrievalError::Embedding(
                "embedding endpoint unreachable".to_string(),
            ));
        }
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedLlm
// ---------------------------------------------------------------------------

/// Replies from a fixed script, one entry per call, and logs every prompt.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::default(),
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    /// The three well-formed replies of a healthy run.
    pub fn healthy() -> Self {
        Self::replying(&[CV_RESPONSE, REPORT_RESPONSE, SUMMARY_RESPONSE])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmCaller for ScriptedLlm {
    async fn call(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::NoResponse("script exhausted".to_string())))
    }
}

// ---------------------------------------------------------------------------
// FakeEnqueuer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeEnqueuer {
    submitted: Mutex<Vec<EvaluationRequest>>,
    unavailable: bool,
}

impl FakeEnqueuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<EvaluationRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobEnqueuer for FakeEnqueuer {
    async fn enqueue(&self, request: EvaluationRequest) -> Result<String, QueueError> {
        if self.unavailable {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request);
        Ok(format!("job-{}", submitted.len()))
    }
}
