use common::{
    data::{DocumentRecord, DocumentStatus},
    helpers::now_millis,
    payloads::{CreateDocumentPayload, UpdateDocumentPayload},
};
use tokio::sync::RwLock;

/// The document metadata table. Rows are kept in insertion order.
#[derive(Default)]
pub struct DocumentTable {
    rows: RwLock<Vec<DocumentRecord>>,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, payload: CreateDocumentPayload) -> DocumentRecord {
        let now = now_millis();
        let record = DocumentRecord {
            id: uuidv7::create(),
            user_id: payload.user_id,
            name: payload.name,
            file_path: None,
            file_type: payload.file_type.to_ascii_lowercase(),
            file_size: payload.file_size,
            status: DocumentStatus::Uploading,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.write().await.push(record.clone());
        record
    }

    pub async fn get(&self, id: &str) -> Option<DocumentRecord> {
        self.rows.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// The user's documents, newest first.
    pub async fn list(&self, user_id: &str) -> Vec<DocumentRecord> {
        self.rows
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Applies a partial update. Moving to any status but `error` clears the
    /// error message.
    pub async fn update(&self, id: &str, update: UpdateDocumentPayload) -> Option<DocumentRecord> {
        let mut rows = self.rows.write().await;
        let row = rows.iter_mut().find(|r| r.id == id)?;
        if let Some(status) = update.status {
            row.status = status;
            row.error_message = match status {
                DocumentStatus::Error => update.error_message,
                _ => None,
            };
        }
        if let Some(path) = update.file_path {
            row.file_path = Some(path);
        }
        row.updated_at = now_millis();
        Some(row.clone())
    }

    pub async fn set_status(&self, id: &str, status: DocumentStatus, error: Option<String>) -> Option<DocumentRecord> {
        self.update(
            id,
            UpdateDocumentPayload {
                status: Some(status),
                error_message: error,
                file_path: None,
            },
        )
        .await
    }

    pub async fn delete(&self, id: &str) -> Option<DocumentRecord> {
        let mut rows = self.rows.write().await;
        let pos = rows.iter().position(|r| r.id == id)?;
        Some(rows.remove(pos))
    }

    /// Removes and returns every document created before `cutoff`.
    pub async fn remove_created_before(&self, cutoff: u64) -> Vec<DocumentRecord> {
        let mut rows = self.rows.write().await;
        let (old, keep): (Vec<_>, Vec<_>) = rows.drain(..).partition(|r| r.created_at < cutoff);
        *rows = keep;
        old
    }

    pub async fn count(&self) -> usize {
        self.rows.read().await.len()
    }
}
