//! Logical paths inside a workspace
//!
//! A [`LogicalPath`] is a relative, `/`-separated path such as
//! `implementation/rules/liheap.param`. Paths never escape their workspace:
//! absolute paths, `.` and `..` segments are rejected at parse time, so a
//! parsed path can be joined onto a workspace root without further checks.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Relative path addressing a file inside a workspace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalPath(Vec<String>);

impl LogicalPath {
    /// Build from already-validated segments
    ///
    /// # Errors
    /// Returns [`PathError`] if any segment is empty, `.`, `..` or contains a
    /// separator.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(|s| validate_segment(s.into()))
            .collect::<Result<Vec<_>, _>>()?;
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(segments))
    }

    /// Path segments from root to leaf
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// First segment, which names the top-level region
    #[inline]
    #[must_use]
    pub fn first(&self) -> &str {
        // Construction guarantees at least one segment.
        &self.0[0]
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a segment
    ///
    /// # Errors
    /// Returns [`PathError`] if the segment is invalid.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, PathError> {
        let mut segments = self.0.clone();
        segments.push(validate_segment(segment.into())?);
        Ok(Self(segments))
    }

    /// `a/b` is a prefix of `a/b` and `a/b/c`, not of `a/bc`
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Two paths overlap when one contains the other
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// Resolve against a filesystem root
    #[must_use]
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in &self.0 {
            path.push(segment);
        }
        path
    }

    /// Slash-joined form used for glob matching and display
    #[must_use]
    pub fn as_string(&self) -> String {
        self.0.join("/")
    }
}

fn validate_segment(segment: String) -> Result<String, PathError> {
    if segment.is_empty() {
        Err(PathError::EmptySegment)
    } else if segment == "." || segment == ".." {
        Err(PathError::Traversal(segment))
    } else if segment.contains(['/', '\\', '\0']) {
        Err(PathError::InvalidSegment(segment))
    } else {
        Ok(segment)
    }
}

impl Display for LogicalPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl FromStr for LogicalPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        if s.starts_with('/') || s.starts_with('\\') {
            return Err(PathError::Absolute(s.to_string()));
        }
        Self::from_segments(s.split('/'))
    }
}

impl TryFrom<&str> for LogicalPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl serde::Serialize for LogicalPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> serde::Deserialize<'de> for LogicalPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reasons a string is not a valid [`LogicalPath`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// No segments at all
    #[error("path is empty")]
    Empty,

    /// `a//b`
    #[error("path contains empty segment")]
    EmptySegment,

    /// Leading `/`
    #[error("absolute path not allowed: {0}")]
    Absolute(String),

    /// `.` or `..`
    #[error("path traversal segment not allowed: {0}")]
    Traversal(String),

    /// Separator or NUL inside a segment
    #[error("invalid segment: {0}")]
    InvalidSegment(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> LogicalPath {
        s.parse().unwrap()
    }

    #[test]
    fn parses_relative_paths() {
        let path = p("implementation/rules/liheap.param");
        assert_eq!(path.segments(), &["implementation", "rules", "liheap.param"]);
        assert_eq!(path.first(), "implementation");
        assert_eq!(path.to_string(), "implementation/rules/liheap.param");
    }

    #[test]
    fn rejects_escapes() {
        assert!(matches!("../x".parse::<LogicalPath>(), Err(PathError::Traversal(_))));
        assert!(matches!("a/./b".parse::<LogicalPath>(), Err(PathError::Traversal(_))));
        assert!(matches!("/etc/passwd".parse::<LogicalPath>(), Err(PathError::Absolute(_))));
        assert!(matches!("a//b".parse::<LogicalPath>(), Err(PathError::EmptySegment)));
        assert!(matches!("".parse::<LogicalPath>(), Err(PathError::Empty)));
        assert!(matches!("a\\b".parse::<LogicalPath>(), Err(PathError::InvalidSegment(_))));
    }

    #[test]
    fn prefix_is_segment_aware() {
        assert!(p("a/b").is_prefix_of(&p("a/b/c")));
        assert!(p("a/b").is_prefix_of(&p("a/b")));
        assert!(!p("a/b").is_prefix_of(&p("a/bc")));
        assert!(p("a/b/c").overlaps(&p("a/b")));
        assert!(!p("a/x").overlaps(&p("a/b")));
    }

    #[test]
    fn child_validates_segment() {
        assert_eq!(p("tests").child("case.yaml").unwrap(), p("tests/case.yaml"));
        assert!(p("tests").child("..").is_err());
    }

    #[test]
    fn fs_path_stays_under_root() {
        let root = Path::new("/tmp/ws");
        assert_eq!(p("a/b").to_fs_path(root), PathBuf::from("/tmp/ws/a/b"));
    }

    proptest::proptest! {
        #[test]
        fn parsed_paths_never_escape_root(s in "[a-z./]{1,24}") {
            if let Ok(path) = s.parse::<LogicalPath>() {
                let root = Path::new("/ws");
                let resolved = path.to_fs_path(root);
                proptest::prop_assert!(resolved.starts_with(root));
                proptest::prop_assert!(path.segments().iter().all(|seg| seg != ".." && seg != "."));
            }
        }
    }

    #[test]
    fn serde_round_trips_as_string() {
        let json = serde_json::to_string(&p("review/report.json")).unwrap();
        assert_eq!(json, "\"review/report.json\"");
        assert!(serde_json::from_str::<LogicalPath>("\"../x\"").is_err());
    }
}
