//! Adopting a persisted session after a restart.

use common::data::{DocumentRecord, UploadEntry, UploadSession};
use log::{debug, info, warn};

use crate::{
    api::DocumentBackend,
    store::{KeyValueStore, SessionStore},
};

pub const INTERRUPTED: &str = "Upload was interrupted before the document was created";

/// A session that was adopted on mount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recovery {
    pub session_id: String,
    pub entries: Vec<UploadEntry>,
    /// False when the document list could not be fetched and only local state was used.
    pub authoritative: bool,
}

impl Recovery {
    pub fn resume_polling(&self) -> bool {
        self.entries.iter().any(UploadEntry::is_in_flight)
    }
}

/// Why a persisted session was not adopted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discarded {
    NoSession,
    Expired,
    OtherUser,
}

/// Reconciles persisted entries against the backend's records, or against
/// nothing when `records` is `None`.
///
/// An entry whose document is listed takes the record's status and error.
/// An entry whose document is missing keeps what it had. An entry that never
/// got a document id cannot be resumed, so if it was still in flight it is
/// turned into an error.
pub fn reconcile_session(files: &[UploadEntry], records: Option<&[DocumentRecord]>) -> Vec<UploadEntry> {
    files
        .iter()
        .cloned()
        .map(|mut entry| {
            match entry.document_id().map(str::to_string) {
                Some(document_id) => {
                    let record = records.and_then(|rs| rs.iter().find(|r| r.id == document_id));
                    if let Some(record) = record {
                        entry.adopt_record(record);
                    }
                }
                None => {
                    entry.abandon(INTERRUPTED);
                }
            }
            entry
        })
        .collect()
}

/// Decides whether the stored session belongs to `user_id` and is recent enough.
pub fn check_session<S: KeyValueStore>(
    store: &SessionStore<S>,
    user_id: &str,
    now: u64,
    max_age_ms: u64,
) -> Result<UploadSession, Discarded> {
    let session = store.load().ok_or(Discarded::NoSession)?;
    if session.user_id != user_id {
        return Err(Discarded::OtherUser);
    }
    if session.is_expired(now, max_age_ms) {
        return Err(Discarded::Expired);
    }
    Ok(session)
}

pub async fn recover<B, S>(
    store: &SessionStore<S>,
    backend: &B,
    user_id: &str,
    now: u64,
    max_age_ms: u64,
) -> Result<Recovery, Discarded>
where
    B: DocumentBackend + ?Sized,
    S: KeyValueStore,
{
    let session = match check_session(store, user_id, now, max_age_ms) {
        Ok(session) => session,
        Err(reason) => {
            if reason == Discarded::Expired {
                store.clear();
            }
            debug!("not recovering upload session: {reason:?}");
            return Err(reason);
        }
    };

    let records = match backend.list_documents(user_id).await {
        Ok(records) => Some(records),
        Err(e) => {
            warn!("could not fetch documents, recovering from local state only: {e}");
            None
        }
    };
    let entries = reconcile_session(&session.files, records.as_deref());
    info!(
        "recovered upload session {} with {} entries",
        session.session_id,
        entries.len()
    );
    Ok(Recovery {
        session_id: session.session_id,
        entries,
        authoritative: records.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryStore, testing::MockBackend};
    use common::data::DocumentStatus;

    const MAX_AGE: u64 = 30 * 60 * 1000;

    fn entry(id: &str, doc: Option<&str>, status: DocumentStatus, progress: u8) -> UploadEntry {
        let mut e = UploadEntry::new(id.into(), format!("{id}.pdf"), 100, None);
        e.set_progress(progress);
        if let Some(doc) = doc {
            e.set_document_id(doc.into());
        }
        e.transition(status, Some("local failure".into()));
        e
    }

    fn stored(files: Vec<UploadEntry>, user: &str, timestamp: u64) -> SessionStore<MemoryStore> {
        let store = SessionStore::new(MemoryStore::new());
        store.save(&UploadSession {
            session_id: "s1".into(),
            user_id: user.into(),
            files,
            timestamp,
        });
        store
    }

    #[tokio::test]
    async fn backend_state_wins_for_listed_documents() {
        let backend = MockBackend::new();
        backend.insert_record("d1", "u1", DocumentStatus::Completed, None);
        backend.insert_record("d2", "u1", DocumentStatus::Error, Some("No valid chunks could be created from the document"));
        let store = stored(
            vec![
                entry("a", Some("d1"), DocumentStatus::Processing, 0),
                entry("b", Some("d2"), DocumentStatus::Processing, 0),
                entry("c", Some("gone"), DocumentStatus::Uploading, 40),
                entry("d", None, DocumentStatus::Error, 0),
            ],
            "u1",
            1_000,
        );

        let recovery = recover(&store, &backend, "u1", 2_000, MAX_AGE).await.unwrap();
        assert!(recovery.authoritative);
        let e = &recovery.entries;
        assert_eq!(e[0].status(), DocumentStatus::Completed);
        assert_eq!(e[0].progress(), 100);
        assert_eq!(e[1].status(), DocumentStatus::Error);
        assert_eq!(e[1].error(), Some("No valid chunks could be created from the document"));
        assert_eq!(e[2].status(), DocumentStatus::Uploading);
        assert_eq!(e[2].progress(), 40);
        assert_eq!(e[3].status(), DocumentStatus::Error);
        assert!(recovery.resume_polling());
    }

    #[tokio::test]
    async fn entries_without_document_id_cannot_resume() {
        let backend = MockBackend::new();
        let store = stored(vec![entry("a", None, DocumentStatus::Uploading, 10)], "u1", 1_000);
        let recovery = recover(&store, &backend, "u1", 1_000, MAX_AGE).await.unwrap();
        assert_eq!(recovery.entries[0].status(), DocumentStatus::Error);
        assert_eq!(recovery.entries[0].error(), Some(INTERRUPTED));
        assert_eq!(recovery.entries[0].document_id(), None);
        assert!(!recovery.resume_polling());
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_local_state() {
        let backend = MockBackend::new();
        backend.insert_record("d1", "u1", DocumentStatus::Completed, None);
        backend.fail_lists(true);
        let store = stored(vec![entry("a", Some("d1"), DocumentStatus::Processing, 0)], "u1", 1_000);
        let recovery = recover(&store, &backend, "u1", 1_000, MAX_AGE).await.unwrap();
        assert!(!recovery.authoritative);
        assert_eq!(recovery.entries[0].status(), DocumentStatus::Processing);
        assert!(recovery.resume_polling());
    }

    #[tokio::test]
    async fn expired_sessions_are_discarded() {
        let backend = MockBackend::new();
        let store = stored(vec![entry("a", Some("d1"), DocumentStatus::Processing, 0)], "u1", 1_000);
        let result = recover(&store, &backend, "u1", 1_000 + MAX_AGE + 1, MAX_AGE).await;
        assert_eq!(result, Err(Discarded::Expired));
        assert_eq!(backend.list_calls(), 0);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn other_users_sessions_are_not_adopted() {
        let backend = MockBackend::new();
        let store = stored(vec![entry("a", Some("d1"), DocumentStatus::Processing, 0)], "alice", 1_000);
        let result = recover(&store, &backend, "bob", 1_000, MAX_AGE).await;
        assert_eq!(result, Err(Discarded::OtherUser));
        assert_eq!(backend.list_calls(), 0);
        assert!(store.load().is_some());
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let now = 0;
        let records = vec![DocumentRecord {
            id: "d1".into(),
            user_id: "u1".into(),
            name: "a.pdf".into(),
            file_path: None,
            file_type: "pdf".into(),
            file_size: 1,
            status: DocumentStatus::Error,
            error_message: None,
            created_at: now,
            updated_at: now,
        }];
        let files = vec![
            entry("a", Some("d1"), DocumentStatus::Processing, 0),
            entry("b", Some("d9"), DocumentStatus::Processing, 0),
            entry("c", None, DocumentStatus::Uploading, 5),
        ];
        let once = reconcile_session(&files, Some(&records));
        let twice = reconcile_session(&once, Some(&records));
        assert_eq!(once, twice);
        assert_eq!(once[0].error(), Some(common::data::UNKNOWN_ERROR));
    }
}
