//! Runs one file through create record -> upload bytes -> process.

use std::sync::Arc;

use async_trait::async_trait;
use common::{data::DocumentStatus, payloads::UpdateDocumentPayload};
use log::{debug, warn};
use tokio::{select, sync::watch};

use crate::{
    api::{DocumentBackend, ProgressSink},
    error::{ClientError, ClientResult},
    validate::ValidFile,
};

pub const PROCESSING_FAILED: &str = "Document processing failed";

/// A single mutation of a tracked entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryChange {
    DocumentId(String),
    Progress(u8),
    Status(DocumentStatus, Option<String>),
}

/// Receives the driver's state changes. The controller implements this to
/// update its entry list and persist the session after each change.
#[async_trait]
pub trait EntrySink: Send + Sync {
    async fn apply(&self, entry_id: &str, change: EntryChange);
}

#[derive(Clone, Debug)]
pub struct UploadJob {
    pub entry_id: String,
    pub file: ValidFile,
}

pub struct UploadDriver<B: ?Sized> {
    backend: Arc<B>,
    owner_id: String,
}

impl<B: DocumentBackend + ?Sized> UploadDriver<B> {
    pub fn new(backend: Arc<B>, owner_id: String) -> Self {
        Self { backend, owner_id }
    }

    /// Drives the job to a terminal state and returns it. Never fails: every
    /// error ends up on the entry, and on the record when one exists.
    pub async fn run<S: EntrySink + ?Sized>(&self, job: &UploadJob, sink: &S) -> DocumentStatus {
        let id = job.entry_id.as_str();
        let record = self
            .backend
            .create_document(&self.owner_id, &job.file.name, &job.file.file_type, job.file.size)
            .await;
        let document_id = match record {
            Ok(record) => record.id,
            Err(e) => {
                debug!("entry {id}: could not create record: {e}");
                self.fail(id, None, e.to_string(), sink).await;
                return DocumentStatus::Error;
            }
        };
        debug!("entry {id}: record {document_id} created");
        sink.apply(id, EntryChange::DocumentId(document_id.clone())).await;

        match self.stages(job, &document_id, sink).await {
            Ok(status) => status,
            Err(e) => {
                self.fail(id, Some(&document_id), e.to_string(), sink).await;
                DocumentStatus::Error
            }
        }
    }

    async fn stages<S: EntrySink + ?Sized>(
        &self,
        job: &UploadJob,
        document_id: &str,
        sink: &S,
    ) -> ClientResult<DocumentStatus> {
        let id = job.entry_id.as_str();
        let path = self.upload_with_progress(job, sink).await?;
        sink.apply(id, EntryChange::Progress(100)).await;

        self.backend
            .update_document(
                document_id,
                UpdateDocumentPayload {
                    status: Some(DocumentStatus::Processing),
                    file_path: Some(path.clone()),
                    ..Default::default()
                },
            )
            .await?;
        sink.apply(id, EntryChange::Status(DocumentStatus::Processing, None))
            .await;
        debug!("entry {id}: stored at {path}, processing");

        let outcome = self
            .backend
            .process_document(document_id, &path, &self.owner_id)
            .await?;
        if !outcome.success {
            return Err(ClientError::Api(
                outcome.error.unwrap_or_else(|| PROCESSING_FAILED.to_string()),
            ));
        }

        if let Err(e) = self
            .backend
            .update_document(document_id, UpdateDocumentPayload::status(DocumentStatus::Completed))
            .await
        {
            warn!("entry {id}: processed, but marking record {document_id} completed failed: {e}");
        }
        sink.apply(id, EntryChange::Status(DocumentStatus::Completed, None))
            .await;
        debug!("entry {id}: completed");
        Ok(DocumentStatus::Completed)
    }

    /// Uploads the bytes, forwarding percentages to the sink as they rise.
    /// Stays below 100 until the backend confirms the object is stored.
    async fn upload_with_progress<S: EntrySink + ?Sized>(
        &self,
        job: &UploadJob,
        sink: &S,
    ) -> ClientResult<String> {
        let (sender, mut receiver) = watch::channel(0u64);
        let progress: ProgressSink = Arc::new(move |sent| {
            sender.send_replace(sent);
        });
        let upload = self
            .backend
            .upload_bytes(&job.file.path, &self.owner_id, &job.file.name, progress);
        tokio::pin!(upload);

        let total = job.file.size.max(1);
        let mut last = 0u8;
        loop {
            select! {
                res = &mut upload => return res,
                Ok(()) = receiver.changed() => {
                    let sent = *receiver.borrow_and_update();
                    let pct = (sent.saturating_mul(100) / total).min(99) as u8;
                    if pct > last {
                        last = pct;
                        sink.apply(&job.entry_id, EntryChange::Progress(pct)).await;
                    }
                }
            }
        }
    }

    async fn fail<S: EntrySink + ?Sized>(
        &self,
        entry_id: &str,
        document_id: Option<&str>,
        message: String,
        sink: &S,
    ) {
        if let Some(document_id) = document_id {
            if let Err(e) = self
                .backend
                .update_document(document_id, UpdateDocumentPayload::error(message.clone()))
                .await
            {
                warn!("entry {entry_id}: could not mark record {document_id} as failed: {e}");
            }
        }
        sink.apply(entry_id, EntryChange::Status(DocumentStatus::Error, Some(message)))
            .await;
    }
}
