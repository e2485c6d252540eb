//! Serde shapes for the event payloads carried by the framed stream.
//!
//! Three event names are recognized: `result` (one per submitted document),
//! `complete` (an arbitrary JSON summary, parsed as a plain
//! [`serde_json::Value`] by the caller) and `error` ([`ErrorEvent`]).

use serde::{Deserialize, Serialize};

/// Per-document outcome from a batch run.
///
/// `index` is the document's position in the submitted batch. The wire
/// protocol carries no document identifier, so correlation is purely
/// positional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResultEvent {
    pub index: usize,
    pub filename: String,
    pub label: String,
    pub success: bool,
    /// Extracted field values, keyed by schema field name.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Failure results may omit metadata entirely.
    #[serde(default)]
    pub metadata: ResultMetadata,
}

/// How the extraction was performed and how long it took, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub time: f64,
}

/// Payload of a stream-level `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
}
