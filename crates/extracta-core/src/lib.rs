//! Client core for batch document extraction: the authoritative document
//! table, the batch run state machine, and the HTTP calls to the extraction
//! service.
//!
//! The presentation layer observes this crate through snapshots delivered
//! over an event channel; it never mutates documents directly. All table
//! writes happen on the single task driving a run, so no locking is needed.

use std::sync::Arc;

use thiserror::Error;

pub mod api;
pub mod coordinator;

pub use coordinator::{BatchCoordinator, CoordinatorEvent, RunPhase};
pub use extracta_dataset::Schema;
pub use extracta_protocol::ResultMetadata;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("extraction service returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("a batch run is already in progress")]
    RunInProgress,
    #[error("no configured documents to submit")]
    EmptyBatch,
}

/// Stable identity of a document for its lifetime. Never reused, even across
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u64);

/// Lifecycle of a document within one run. Transitions are monotonic:
/// Pending → Processing → {Completed | Error}, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl DocumentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing...",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Extracted data attached to a completed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutput {
    pub data: serde_json::Map<String, serde_json::Value>,
    pub metadata: ResultMetadata,
}

/// One uploaded document and everything known about it.
///
/// File bytes are behind an `Arc` so that snapshot clones sent to observers
/// stay cheap.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub file_name: String,
    pub contents: Arc<[u8]>,
    /// Empty string = unconfigured.
    pub label: String,
    pub schema: Schema,
    pub status: DocumentStatus,
    pub result: Option<ExtractionOutput>,
    pub error: Option<String>,
}

impl Document {
    /// Whether the document carries both a label and at least one schema
    /// field, making it eligible for submission.
    pub fn is_configured(&self) -> bool {
        !self.label.is_empty() && !self.schema.is_empty()
    }
}

/// Client configuration, resolved by binaries as CLI flags > env > defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the extraction service, without a trailing slash.
    pub base_url: String,
    /// Wall-clock bound on a whole batch run.
    pub batch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            batch_timeout_secs: 60,
        }
    }
}

/// Serialize a schema as the JSON object text the service expects in
/// multipart fields.
pub(crate) fn schema_json(schema: &Schema) -> String {
    serde_json::Value::Object(
        schema
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
    .to_string()
}
