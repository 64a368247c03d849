//! Checks run on a file before anything is sent to the backend.

use std::path::{Path, PathBuf};

use common::helpers::extension_of;
use thiserror::Error;
use tokio::fs::metadata;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["pdf", "docx", "txt"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Unsupported file type: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Empty file")]
    EmptyFile,

    #[error("Cannot read file: {0}")]
    Unreadable(String),
}

/// A file that passed validation, with the metadata the pipeline needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub file_type: String,
}

#[derive(Clone, Debug)]
pub struct FileValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_FILE_SIZE,
            DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        )
    }
}

impl FileValidator {
    pub fn new(max_file_size: u64, allowed_extensions: Vec<String>) -> Self {
        Self {
            max_file_size,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn validate_name(&self, name: &str) -> Result<String, ValidationError> {
        let extension =
            extension_of(name).ok_or_else(|| ValidationError::InvalidFilename(name.to_string()))?;
        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                allowed: self.allowed_extensions.clone(),
            });
        }
        Ok(extension)
    }

    pub fn validate_size(&self, size: u64) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }
        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    pub async fn validate(&self, path: &Path) -> Result<ValidFile, ValidationError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ValidationError::InvalidFilename(path.display().to_string()))?
            .to_string();
        let file_type = self.validate_name(&name)?;
        let meta = metadata(path)
            .await
            .map_err(|e| ValidationError::Unreadable(e.to_string()))?;
        if !meta.is_file() {
            return Err(ValidationError::Unreadable(format!("{} is not a file", path.display())));
        }
        self.validate_size(meta.len())?;
        Ok(ValidFile {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            file_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        let v = FileValidator::default();
        assert_eq!(v.validate_name("Thesis.PDF"), Ok("pdf".to_string()));
        assert!(matches!(
            v.validate_name("photo.png"),
            Err(ValidationError::InvalidExtension { .. })
        ));
        assert!(matches!(
            v.validate_name("Makefile"),
            Err(ValidationError::InvalidFilename(_))
        ));
    }

    #[test]
    fn sizes() {
        let v = FileValidator::new(100, vec!["txt".into()]);
        assert_eq!(v.validate_size(0), Err(ValidationError::EmptyFile));
        assert_eq!(v.validate_size(100), Ok(()));
        assert_eq!(
            v.validate_size(101),
            Err(ValidationError::FileTooLarge { size: 101, max: 100 })
        );
    }

    #[tokio::test]
    async fn validates_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("notes.txt");
        std::fs::write(&good, "some text").unwrap();
        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "").unwrap();

        let v = FileValidator::default();
        let ok = v.validate(&good).await.unwrap();
        assert_eq!(ok.name, "notes.txt");
        assert_eq!(ok.size, 9);
        assert_eq!(ok.file_type, "txt");
        assert_eq!(v.validate(&empty).await, Err(ValidationError::EmptyFile));
        assert!(matches!(
            v.validate(&dir.path().join("missing.txt")).await,
            Err(ValidationError::Unreadable(_))
        ));
    }
}
