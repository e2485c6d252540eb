//! Filename → dataset entry matching.
//!
//! Two rules, applied in order, scanning the dataset in its original order
//! and returning the first hit:
//!
//! 1. Exact: the entry's recorded path equals the uploaded file name
//!    case-insensitively, or ends with `/` + name or `\` + name (entries may
//!    be recorded as bare names, relative paths or absolute paths, on either
//!    path convention).
//! 2. Base-name fallback: strip a trailing `.pdf` (case-insensitive) from
//!    both the file name and the entry path's final segment, then compare
//!    case-insensitively.

use crate::{Dataset, DatasetEntry};

/// Find the best dataset entry for an uploaded file name, or `None`.
pub fn find_match<'a>(dataset: &'a Dataset, file_name: &str) -> Option<&'a DatasetEntry> {
    let wanted = file_name.to_lowercase();

    // Rule 1: exact path or path-suffix match.
    let exact = dataset.entries().iter().find(|entry| {
        let path = entry.path.to_lowercase();
        path == wanted
            || path.ends_with(&format!("/{wanted}"))
            || path.ends_with(&format!("\\{wanted}"))
    });
    if exact.is_some() {
        return exact;
    }

    // Rule 2: base-name fallback.
    let base = strip_pdf_suffix(&wanted);
    dataset.entries().iter().find(|entry| {
        let path = entry.path.to_lowercase();
        let last = path.rsplit(['/', '\\']).next().unwrap_or(&path);
        strip_pdf_suffix(last) == base
    })
}

/// Count how many of the given file names have a dataset match.
pub fn matched_count<'a>(dataset: &Dataset, file_names: impl Iterator<Item = &'a str>) -> usize {
    file_names
        .filter(|name| find_match(dataset, name).is_some())
        .count()
}

/// File names with no dataset match, in input order.
pub fn unmatched<'a>(
    dataset: &Dataset,
    file_names: impl Iterator<Item = &'a str>,
) -> Vec<&'a str> {
    file_names
        .filter(|name| find_match(dataset, name).is_none())
        .collect()
}

fn strip_pdf_suffix(name: &str) -> &str {
    name.strip_suffix(".pdf").unwrap_or(name)
}
