//! Request and file types shared by every stage of a scan.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// A validated request to count one term across one data directory.
///
/// The term is trimmed on construction. Tokens are trimmed before comparison,
/// so a term that is empty after trimming could never match and is rejected
/// here, before any file is opened or any event is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    term: String,
    directory: PathBuf,
}

impl ScanRequest {
    /// Validates and builds a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `term` is empty or only
    /// whitespace, or if it contains the token delimiter.
    pub fn new(term: impl AsRef<str>, directory: impl Into<PathBuf>) -> Result<Self> {
        let term = term.as_ref().trim();
        if term.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "term must not be empty".to_string(),
            });
        }
        if term.as_bytes().contains(&crate::DELIMITER) {
            return Err(Error::InvalidRequest {
                reason: "term must be a single token".to_string(),
            });
        }

        Ok(Self {
            term: term.to_string(),
            directory: directory.into(),
        })
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// One enumerated data file.
///
/// `index` is the numeric suffix parsed from the file name and is the primary
/// sort key of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileHandle {
    pub index: u64,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_blank_terms() {
        for term in ["", "   ", "\t\n"] {
            let err = ScanRequest::new(term, "data").unwrap_err();
            assert!(matches!(err, Error::InvalidRequest { .. }), "{term:?}");
        }
    }

    #[test]
    fn rejects_terms_containing_the_delimiter() {
        let err = ScanRequest::new("apple,banana", "data").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn trims_the_term() {
        let request = ScanRequest::new("  banana ", "data").unwrap();
        assert_eq!(request.term(), "banana");
        assert_eq!(request.directory(), Path::new("data"));
    }

    #[test]
    fn handles_sort_by_index_then_path() {
        let mut files = vec![
            FileHandle {
                index: 10,
                path: PathBuf::from("F10.txt"),
            },
            FileHandle {
                index: 2,
                path: PathBuf::from("F2.txt"),
            },
            FileHandle {
                index: 1,
                path: PathBuf::from("F1.txt"),
            },
            FileHandle {
                index: 1,
                path: PathBuf::from("F01.txt"),
            },
        ];
        files.sort();
        let names: Vec<_> = files.iter().map(|f| f.path.to_str().unwrap()).collect();
        assert_eq!(names, ["F01.txt", "F1.txt", "F2.txt", "F10.txt"]);
    }
}
