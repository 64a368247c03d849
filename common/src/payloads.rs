use std::collections::BTreeMap;

use crate::data::{DocumentRecord, DocumentStatus};
use serde::{Deserialize, Serialize};

/// Header carrying the lowercase hex SHA-256 of an uploaded body.
pub const CONTENT_HASH_HEADER: &str = "x-content-sha256";

// Response payloads

/// Envelope around every response body.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentRecord>,
    pub total_count: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredObject {
    pub path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProcessDocumentResponse {
    pub document_id: String,
    pub status: DocumentStatus,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeleteDocumentResponse {
    pub deleted_document_id: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeletedDocument {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FailedDeletion {
    pub id: String,
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BulkDeleteResponse {
    pub deleted_documents: Vec<DeletedDocument>,
    pub failed_documents: Vec<FailedDeletion>,
}

/// Per-user summary of stored documents.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DocumentStats {
    pub total_documents: usize,
    pub status_breakdown: BTreeMap<String, usize>,
    pub total_size_bytes: u64,
    /** Rounded to two decimals */
    pub total_size_mb: f64,
    pub file_type_breakdown: BTreeMap<String, usize>,
    pub completed_documents: usize,
    pub processing_documents: usize,
    pub error_documents: usize,
}

impl DocumentStats {
    pub fn from_records(records: &[DocumentRecord]) -> Self {
        let mut status_breakdown = BTreeMap::new();
        let mut file_type_breakdown = BTreeMap::new();
        for record in records {
            *status_breakdown.entry(record.status.as_str().to_string()).or_insert(0) += 1;
            *file_type_breakdown.entry(record.file_type.clone()).or_insert(0) += 1;
        }
        let total_size_bytes: u64 = records.iter().map(|r| r.file_size).sum();
        let count = |s: DocumentStatus| status_breakdown.get(s.as_str()).copied().unwrap_or(0);
        Self {
            total_documents: records.len(),
            total_size_bytes,
            total_size_mb: (total_size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            completed_documents: count(DocumentStatus::Completed),
            processing_documents: count(DocumentStatus::Processing),
            error_documents: count(DocumentStatus::Error),
            status_breakdown,
            file_type_breakdown,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub documents: usize,
}

// Request payloads

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreateDocumentPayload {
    pub user_id: String,
    pub name: String,
    pub file_type: String,
    pub file_size: u64,
}

/// Partial update; unset fields are left alone.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UpdateDocumentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DocumentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl UpdateDocumentPayload {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(DocumentStatus::Error),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProcessDocumentPayload {
    pub file_path: String,
    pub document_id: String,
    pub user_id: String,
}
