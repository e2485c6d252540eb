//! Configuration datasets: user-supplied `label` / `extraction_schema` /
//! `pdf_path` triples used to pre-fill document configuration from uploaded
//! file names.
//!
//! Loading is all-or-nothing: a single invalid element rejects the entire
//! array, and because loading returns a `Result` the caller's previously
//! active dataset is never disturbed by a failed attempt.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod matcher;
pub mod templates;

pub use templates::{Template, default_templates, template_by_label};

/// Field-name → description mapping describing what to extract from a
/// document. Insertion order is irrelevant.
pub type Schema = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("failed to read dataset file: {0}")]
    Io(#[from] std::io::Error),
    #[error("dataset is not a valid JSON array of entries: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dataset entry {index} has an empty `{field}`")]
    EmptyField { index: usize, field: &'static str },
}

/// One recorded configuration: which label and schema apply to the file at
/// `path` (a relative or absolute path, or a bare file name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub label: String,
    #[serde(rename = "extraction_schema")]
    pub schema: Schema,
    #[serde(rename = "pdf_path")]
    pub path: String,
}

/// An ordered sequence of dataset entries. Replaced wholesale on each
/// successful load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    entries: Vec<DatasetEntry>,
}

impl Dataset {
    /// Parse and validate a dataset from JSON text.
    ///
    /// Every element must carry a non-empty `label`, a non-empty
    /// `extraction_schema` and a non-empty `pdf_path`; the first violation
    /// rejects the whole load.
    pub fn from_json_str(json: &str) -> Result<Self, DatasetError> {
        let entries: Vec<DatasetEntry> = serde_json::from_str(json)?;
        for (index, entry) in entries.iter().enumerate() {
            if entry.label.is_empty() {
                return Err(DatasetError::EmptyField { index, field: "label" });
            }
            if entry.schema.is_empty() {
                return Err(DatasetError::EmptyField {
                    index,
                    field: "extraction_schema",
                });
            }
            if entry.path.is_empty() {
                return Err(DatasetError::EmptyField {
                    index,
                    field: "pdf_path",
                });
            }
        }
        Ok(Self { entries })
    }

    /// Load a dataset from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
