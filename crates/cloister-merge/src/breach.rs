//! Isolation-breach heuristic
//!
//! Independently written tests and implementation should only agree on what
//! both could derive from the shared documents. When a test suite references
//! many values that the implementation declares and that appear nowhere in
//! the document package, one side probably saw the other. The check is
//! advisory: it attaches a [`BreachWarning`] to the bundle and never blocks.

use cloister_artifact::{Artifact, ArtifactId, DocumentPackage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

/// Heuristic thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreachHeuristicConfig {
    /// Disable the check entirely
    pub enabled: bool,
    /// Minimum underivable shared tokens before flagging
    pub min_matches: usize,
    /// Minimum share of the test suite's underivable tokens that the
    /// implementation declares
    pub overlap_ratio: f64,
}

impl Default for BreachHeuristicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_matches: 3,
            overlap_ratio: 0.6,
        }
    }
}

/// Suspected information flow between isolated producers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachWarning {
    /// Tokens referenced by tests, declared by the implementation, absent
    /// from the documents
    pub matched: Vec<String>,
    /// `matched` over the test suite's underivable tokens
    pub ratio: f64,
    /// Test suite artifacts inspected
    pub test_artifacts: Vec<ArtifactId>,
    /// Implementation artifacts inspected
    pub implementation_artifacts: Vec<ArtifactId>,
}

impl fmt::Display for BreachWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "suspected breach: {} underivable tokens shared ({:.0}%): {}",
            self.matched.len(),
            self.ratio * 100.0,
            self.matched.join(", ")
        )
    }
}

/// Compares test references against implementation declarations
#[derive(Debug, Clone, Default)]
pub struct BreachDetector {
    config: BreachHeuristicConfig,
}

impl BreachDetector {
    /// Create new detector
    #[must_use]
    pub fn new(config: BreachHeuristicConfig) -> Self {
        Self { config }
    }

    /// Thresholds in force
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BreachHeuristicConfig {
        &self.config
    }

    /// Inspect one generation's outputs
    #[must_use]
    pub fn inspect(
        &self,
        tests: &[&Artifact],
        implementations: &[&Artifact],
        documents: Option<&DocumentPackage>,
    ) -> Option<BreachWarning> {
        if !self.config.enabled || tests.is_empty() || implementations.is_empty() {
            return None;
        }

        let derivable = documents.map(|d| referenced(&d.corpus())).unwrap_or_default();
        let referenced_by_tests: BTreeSet<String> = tests
            .iter()
            .flat_map(|a| referenced(&a.text()))
            .filter(|t| !derivable.contains(t))
            .collect();
        if referenced_by_tests.is_empty() {
            return None;
        }
        let declared_by_impl: BTreeSet<String> = implementations
            .iter()
            .flat_map(|a| declared(&a.text()))
            .collect();

        let matched: Vec<String> = referenced_by_tests
            .intersection(&declared_by_impl)
            .cloned()
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let ratio = matched.len() as f64 / referenced_by_tests.len() as f64;

        (matched.len() >= self.config.min_matches && ratio >= self.config.overlap_ratio).then(|| {
            BreachWarning {
                matched,
                ratio,
                test_artifacts: tests.iter().map(|a| a.id()).collect(),
                implementation_artifacts: implementations.iter().map(|a| a.id()).collect(),
            }
        })
    }
}

const STOPWORDS: &[&str] = &[
    "and", "assert", "case", "cases", "def", "else", "expect", "expected", "false", "fn", "for",
    "input", "let", "none", "not", "null", "output", "pub", "return", "self", "test", "tests",
    "the", "true", "with",
];

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[A-Za-z_][A-Za-z0-9_]*|-?\d+(?:\.\d+)?|"[^"\n]{1,64}""#)
        .expect("valid token regex (verified by tests)")
});

static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:(?:pub\s+)?(?:let|const|static|fn|def)\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*[:=(]\s*([^\n#]*)",
    )
    .expect("valid declaration regex (verified by tests)")
});

fn keep(token: &str) -> bool {
    let word = token.trim_matches('"');
    if word.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '-') {
        // small integers are too common to mean anything
        return word.trim_start_matches('-').len() >= 2;
    }
    word.len() >= 3 && !STOPWORDS.contains(&word.to_ascii_lowercase().as_str())
}

/// Identifiers and literals a text refers to
fn referenced(text: &str) -> BTreeSet<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|t| keep(t))
        .collect()
}

/// Names a text declares plus the literal values assigned to them
fn declared(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for caps in DECLARATION_RE.captures_iter(text) {
        if let Some(name) = caps.get(1) {
            if keep(name.as_str()) {
                out.insert(name.as_str().to_string());
            }
        }
        if let Some(value) = caps.get(2) {
            out.extend(referenced(value.as_str()));
        }
    }
    out
}
