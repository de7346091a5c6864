//! Structured payloads carried inside artifact blobs
//!
//! The orchestrator treats blobs as opaque, with two exceptions: the document
//! package (whose manifest is recorded at seal time) and the review report
//! (whose verdict drives the merge decision).

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One document listed in a package manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Document name within the package
    pub name: String,
    /// Hash of the document text
    pub hash: ContentHash,
    /// Size in bytes
    pub size: usize,
}

/// Collected input documents, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPackage {
    /// Document name to content
    pub documents: BTreeMap<String, String>,
}

impl DocumentPackage {
    /// Empty package
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document
    #[must_use]
    pub fn with_document(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.documents.insert(name.into(), content.into());
        self
    }

    /// Manifest of contained documents in name order
    #[must_use]
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.documents
            .iter()
            .map(|(name, content)| ManifestEntry {
                name: name.clone(),
                hash: ContentHash::compute(content.as_bytes()),
                size: content.len(),
            })
            .collect()
    }

    /// Concatenated text of every document
    #[must_use]
    pub fn corpus(&self) -> String {
        self.documents.values().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// Encode as an artifact blob
    ///
    /// # Errors
    /// Returns [`PayloadError`] if serialization fails.
    pub fn to_blob(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode from an artifact blob
    ///
    /// # Errors
    /// Returns [`PayloadError`] if the blob is not a package.
    pub fn from_blob(blob: &[u8]) -> Result<Self, PayloadError> {
        Ok(serde_json::from_slice(blob)?)
    }
}

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Integrate the bundle
    Approve,
    /// Run another development generation
    RequestChanges,
}

/// Reviewer output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// Decision
    pub verdict: Verdict,
    /// Free-form findings
    #[serde(default)]
    pub findings: Vec<String>,
}

impl ReviewReport {
    /// Report with no findings
    #[must_use]
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            findings: Vec::new(),
        }
    }

    /// Add a finding
    #[must_use]
    pub fn with_finding(mut self, finding: impl Into<String>) -> Self {
        self.findings.push(finding.into());
        self
    }

    /// Encode as an artifact blob
    ///
    /// # Errors
    /// Returns [`PayloadError`] if serialization fails.
    pub fn to_blob(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode from an artifact blob
    ///
    /// # Errors
    /// Returns [`PayloadError`] if the blob is not a report.
    pub fn from_blob(blob: &[u8]) -> Result<Self, PayloadError> {
        Ok(serde_json::from_slice(blob)?)
    }
}

/// Payload encode/decode failure
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// JSON error
    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn manifest_lists_documents_in_order() {
        let package = DocumentPackage::new()
            .with_document("statute.md", "income limit 1200")
            .with_document("guidance.md", "rate 0.35");
        let names: Vec<_> = package.manifest().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["guidance.md".to_string(), "statute.md".to_string()]);
        assert_eq!(package.manifest()[1].size, "income limit 1200".len());
    }

    #[test]
    fn package_blob_decodes() {
        let package = DocumentPackage::new().with_document("a.md", "alpha");
        let decoded = DocumentPackage::from_blob(&package.to_blob().unwrap()).unwrap();
        assert_eq!(decoded, package);
        assert!(DocumentPackage::from_blob(b"not json").is_err());
    }

    #[test]
    fn review_report_defaults_findings() {
        let report = ReviewReport::from_blob(br#"{"verdict":"request_changes"}"#).unwrap();
        assert_eq!(report.verdict, Verdict::RequestChanges);
        assert!(report.findings.is_empty());
    }
}
