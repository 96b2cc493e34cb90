//! Data file discovery.
//!
//! Data files are named `<prefix><index>.<extension>` (e.g. `F12.txt`). An
//! enumeration is a snapshot of the directory at the time it was listed,
//! ordered by the numeric index so that `F2` comes before `F10`.

use crate::{Error, FileHandle, Result};
use std::path::Path;

/// Naming pattern of data files in the scan directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    prefix: String,
    extension: String,
}

impl Default for FilePattern {
    fn default() -> Self {
        Self::new("F", "txt")
    }
}

impl FilePattern {
    /// Builds a pattern. A leading `.` on the extension is ignored.
    pub fn new(prefix: impl Into<String>, extension: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.as_ref().trim_start_matches('.').to_string(),
        }
    }

    /// Returns the numeric index of `file_name`, or `None` if the name does
    /// not follow the pattern.
    ///
    /// The index must be a non-empty run of ASCII digits that fits a `u64`.
    pub fn index_of(&self, file_name: &str) -> Option<u64> {
        let digits = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

/// Lists the data files in `directory` that match `pattern`, sorted by
/// numeric index (ties broken by path).
///
/// Directories and other non-file entries are skipped, as are names that are
/// not valid UTF-8.
///
/// # Errors
///
/// Returns [`Error::DirectoryNotFound`] if the directory is missing or cannot
/// be read.
pub async fn enumerate_files(directory: &Path, pattern: &FilePattern) -> Result<Vec<FileHandle>> {
    let not_found = |source| Error::DirectoryNotFound {
        path: directory.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(directory).await.map_err(not_found)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(not_found)? {
        let file_name = entry.file_name();
        let Some(index) = file_name.to_str().and_then(|name| pattern.index_of(name)) else {
            continue;
        };

        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() => files.push(FileHandle {
                index,
                path: entry.path(),
            }),
            Ok(_) => {}
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Skipping {:?}: {}", entry.path(), _e);
            }
        }
    }

    files.sort();

    #[cfg(feature = "tracing")]
    tracing::debug!("Enumerated {} data files in {:?}", files.len(), directory);

    Ok(files)
}
