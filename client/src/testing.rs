//! Test doubles shared by the unit tests.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use common::{
    data::{DocumentRecord, DocumentStatus},
    helpers::now_millis,
    payloads::UpdateDocumentPayload,
};
use tokio::sync::Notify;

use crate::{
    api::{DocumentBackend, ProcessOutcome, ProgressSink},
    driver::{EntryChange, EntrySink},
    error::{ClientError, ClientResult},
};

/// In-memory backend with switches for every failure the pipeline handles.
#[derive(Default)]
pub struct MockBackend {
    records: Mutex<Vec<DocumentRecord>>,
    next_id: AtomicUsize,
    fail_create: Mutex<HashSet<String>>,
    upload_error: Mutex<Option<String>>,
    process_error: Mutex<Option<Option<String>>>,
    process_gate: Mutex<Option<Arc<Notify>>>,
    updates_fail: AtomicBool,
    upload_panics: AtomicBool,
    list_fails: AtomicBool,
    list_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DocumentRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn record(&self, id: &str) -> Option<DocumentRecord> {
        self.records().into_iter().find(|r| r.id == id)
    }

    pub fn insert_record(&self, id: &str, user_id: &str, status: DocumentStatus, error: Option<&str>) {
        let now = now_millis();
        self.records.lock().unwrap().push(DocumentRecord {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name: format!("{id}.pdf"),
            file_path: None,
            file_type: "pdf".to_string(),
            file_size: 1,
            status,
            error_message: error.map(str::to_string),
            created_at: now,
            updated_at: now,
        });
    }

    pub fn set_status(&self, id: &str, status: DocumentStatus, error: Option<&str>) {
        let mut records = self.records.lock().unwrap();
        if let Some(r) = records.iter_mut().find(|r| r.id == id) {
            r.status = status;
            r.error_message = error.map(str::to_string);
        }
    }

    pub fn fail_create_for(&self, file_name: &str) {
        self.fail_create.lock().unwrap().insert(file_name.to_string());
    }

    pub fn fail_upload_with(&self, message: &str) {
        *self.upload_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_processing_with(&self, message: Option<String>) {
        *self.process_error.lock().unwrap() = Some(message);
    }

    /// Makes `upload_bytes` panic, as a bug in the transport would.
    pub fn panic_on_upload(&self) {
        self.upload_panics.store(true, Ordering::SeqCst);
    }

    pub fn fail_updates(&self) {
        self.updates_fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.list_fails.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Makes processing wait until the returned handle is notified.
    pub fn hold_processing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.process_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl DocumentBackend for MockBackend {
    async fn create_document(
        &self,
        owner_id: &str,
        file_name: &str,
        file_type: &str,
        file_size: u64,
    ) -> ClientResult<DocumentRecord> {
        if self.fail_create.lock().unwrap().contains(file_name) {
            return Err(ClientError::BadStatusCode {
                code: 500,
                body: "internal server error".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = now_millis();
        let record = DocumentRecord {
            id: format!("doc-{n}"),
            user_id: owner_id.to_string(),
            name: file_name.to_string(),
            file_path: None,
            file_type: file_type.to_string(),
            file_size,
            status: DocumentStatus::Uploading,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update_document(
        &self,
        id: &str,
        update: UpdateDocumentPayload,
    ) -> ClientResult<DocumentRecord> {
        if self.updates_fail.load(Ordering::SeqCst) {
            return Err(ClientError::ReqwestError("connection reset".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ClientError::Api("Document not found".to_string()))?;
        if let Some(status) = update.status {
            record.status = status;
            record.error_message = update.error_message;
        }
        if let Some(path) = update.file_path {
            record.file_path = Some(path);
        }
        Ok(record.clone())
    }

    async fn upload_bytes(
        &self,
        source: &Path,
        owner_id: &str,
        file_name: &str,
        progress: ProgressSink,
    ) -> ClientResult<String> {
        if self.upload_panics.load(Ordering::SeqCst) {
            panic!("upload of {file_name} blew up");
        }
        let upload_error = self.upload_error.lock().unwrap().clone();
        if let Some(message) = upload_error {
            return Err(ClientError::Api(message));
        }
        let data = std::fs::read(source)?;
        let mut sent = 0u64;
        for chunk in data.chunks(1024) {
            sent += chunk.len() as u64;
            progress(sent);
            tokio::task::yield_now().await;
        }
        Ok(format!("{owner_id}/{file_name}"))
    }

    async fn process_document(
        &self,
        document_id: &str,
        _storage_path: &str,
        _owner_id: &str,
    ) -> ClientResult<ProcessOutcome> {
        let gate = self.process_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = self.process_error.lock().unwrap().clone();
        match failure {
            Some(error) => {
                self.set_status(document_id, DocumentStatus::Error, error.as_deref());
                Ok(ProcessOutcome {
                    success: false,
                    error,
                })
            }
            None => {
                self.set_status(document_id, DocumentStatus::Completed, None);
                Ok(ProcessOutcome {
                    success: true,
                    error: None,
                })
            }
        }
    }

    async fn list_documents(&self, owner_id: &str) -> ClientResult<Vec<DocumentRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(ClientError::ReqwestError("connection refused".to_string()));
        }
        let mut records: Vec<_> = self
            .records()
            .into_iter()
            .filter(|r| r.user_id == owner_id)
            .collect();
        records.reverse();
        Ok(records)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    changes: Mutex<Vec<(String, EntryChange)>>,
}

impl RecordingSink {
    pub fn changes_for(&self, entry_id: &str) -> Vec<EntryChange> {
        self.changes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == entry_id)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl EntrySink for RecordingSink {
    async fn apply(&self, entry_id: &str, change: EntryChange) {
        self.changes
            .lock()
            .unwrap()
            .push((entry_id.to_string(), change));
    }
}
