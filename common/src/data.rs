use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// The record exists and its bytes are being sent to storage.
    Uploading,
    /// The bytes are stored and the backend is extracting and indexing them.
    Processing,
    /// The document is indexed and can be asked about. Terminal.
    Completed,
    /// Something went wrong; see the error message. Terminal.
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Position in the pipeline. Both terminal states share the last rank.
    fn rank(&self) -> u8 {
        match self {
            Self::Uploading => 0,
            Self::Processing => 1,
            Self::Completed | Self::Error => 2,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend's authoritative view of a document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /** Storage path of the uploaded bytes; unset until the upload stage finishes */
    #[serde(default)]
    pub file_path: Option<String>,
    pub file_type: String,
    pub file_size: u64,
    pub status: DocumentStatus,
    /** Absent means "no error" */
    #[serde(default)]
    pub error_message: Option<String>,
    /** Milliseconds since the epoch */
    pub created_at: u64,
    pub updated_at: u64,
}

pub const UNKNOWN_ERROR: &str = "Unknown error";

/// One file's journey through the upload pipeline, as tracked by the client.
///
/// The fields that make up the state machine are private so the invariants
/// hold everywhere: the document id is assigned once, progress never goes
/// down while uploading, and a terminal entry never changes status again.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    /** Client-assigned id, unrelated to the backend document id */
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    status: DocumentStatus,
    progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /** Where the bytes come from. Not persisted, so a recovered entry has none */
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl UploadEntry {
    pub fn new(id: String, file_name: String, file_size: u64, source: Option<PathBuf>) -> Self {
        Self {
            id,
            file_name,
            file_size,
            document_id: None,
            status: DocumentStatus::Uploading,
            progress: 0,
            error: None,
            source,
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_in_flight(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Records the backend id. Returns false if one was already assigned.
    pub fn set_document_id(&mut self, id: String) -> bool {
        if self.document_id.is_some() {
            return false;
        }
        self.document_id = Some(id);
        true
    }

    /// Raises upload progress. Decreases, and reports outside `uploading`, are ignored.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.status != DocumentStatus::Uploading || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    /// Moves the entry forward through the pipeline.
    ///
    /// Returns false when nothing changed: the entry is terminal, `status` is
    /// behind the current one, or it is the current one.
    pub fn transition(&mut self, status: DocumentStatus, error: Option<String>) -> bool {
        if self.status.is_terminal() || status.rank() < self.status.rank() || status == self.status {
            return false;
        }
        self.status = status;
        match status {
            DocumentStatus::Completed => {
                self.progress = 100;
                self.error = None;
            }
            DocumentStatus::Error => {
                self.error = Some(error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()));
            }
            DocumentStatus::Processing => {
                self.progress = 100;
                self.error = None;
            }
            DocumentStatus::Uploading => self.error = None,
        }
        true
    }

    /// Replaces the cached status with the backend's. Used when a session is
    /// recovered, where the record is authoritative whatever the cache says.
    pub fn adopt_record(&mut self, record: &DocumentRecord) {
        self.status = record.status;
        self.error = match record.status {
            DocumentStatus::Error => Some(
                record
                    .error_message
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            ),
            _ => None,
        };
        if record.status == DocumentStatus::Completed {
            self.progress = 100;
        }
    }

    /// Forces an entry that can no longer make progress into `error`.
    pub fn abandon(&mut self, reason: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = DocumentStatus::Error;
        self.error = Some(reason.to_string());
        true
    }
}

/// The persisted envelope around a tab's entries.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub session_id: String,
    pub user_id: String,
    pub files: Vec<UploadEntry>,
    /** Last write, in milliseconds since the epoch */
    pub timestamp: u64,
}

impl UploadSession {
    pub fn has_in_flight(&self) -> bool {
        self.files.iter().any(UploadEntry::is_in_flight)
    }

    pub fn is_expired(&self, now: u64, max_age_ms: u64) -> bool {
        now.saturating_sub(self.timestamp) > max_age_ms
    }
}
