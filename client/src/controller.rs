//! The composition root: owns the entry list and wires every component.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    data::{DocumentRecord, DocumentStatus, UploadEntry, UploadSession, UNKNOWN_ERROR},
    helpers::now_millis,
    payloads::UpdateDocumentPayload,
};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::{
    api::DocumentBackend,
    driver::{EntryChange, EntrySink, UploadDriver, UploadJob},
    poller::{reconcile_entries, PollTarget, PollerHandle, StatusPoller, DEFAULT_POLL_INTERVAL},
    reconcile::recover,
    store::{KeyValueStore, SessionStore, DEFAULT_SESSION_MAX_AGE_MS},
    validate::{FileValidator, ValidationError},
};

#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub poll_interval: Duration,
    pub session_max_age: Duration,
    pub validator: FileValidator,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            session_max_age: Duration::from_millis(DEFAULT_SESSION_MAX_AGE_MS),
            validator: FileValidator::default(),
        }
    }
}

/// What a renderer needs to draw the page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: Vec<UploadEntry>,
    pub recovery_notice: bool,
}

impl Snapshot {
    pub fn has_in_flight(&self) -> bool {
        self.entries.iter().any(UploadEntry::is_in_flight)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionRefused {
    #[error("no entry with id {0}")]
    UnknownEntry(String),
    #[error("entry {0} is still in flight")]
    EntryInFlight(String),
    #[error("uploads are still in flight")]
    UploadsInFlight,
}

/// A file turned away before any network call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejected {
    pub path: PathBuf,
    pub reason: ValidationError,
}

struct State {
    session_id: String,
    entries: Vec<UploadEntry>,
    mounted: bool,
    /// Set once this controller adopted the stored session or added files.
    /// Until then the stored session belongs to someone else and is left alone.
    owns_session: bool,
    recovery_notice: bool,
    poller: Option<PollerHandle>,
}

struct Shared<B, S> {
    backend: Arc<B>,
    store: SessionStore<S>,
    user_id: String,
    config: UploadConfig,
    state: Mutex<State>,
    events: watch::Sender<Snapshot>,
}

pub struct UploadController<B, S> {
    shared: Arc<Shared<B, S>>,
}

impl<B, S> Clone for UploadController<B, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<B, S> UploadController<B, S>
where
    B: DocumentBackend + 'static,
    S: KeyValueStore + 'static,
{
    pub fn new(backend: Arc<B>, store: S, user_id: String, config: UploadConfig) -> Self {
        let (events, _) = watch::channel(Snapshot::default());
        Self {
            shared: Arc::new(Shared {
                backend,
                store: SessionStore::new(store),
                user_id,
                config,
                state: Mutex::new(State {
                    session_id: uuidv7::create(),
                    entries: Vec::new(),
                    mounted: false,
                    owns_session: false,
                    recovery_notice: false,
                    poller: None,
                }),
                events,
            }),
        }
    }

    pub fn store(&self) -> &SessionStore<S> {
        &self.shared.store
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.events.subscribe()
    }

    pub async fn snapshot(&self) -> Snapshot {
        let st = self.shared.state.lock().await;
        self.shared.snapshot_of(&st)
    }

    /// Runs recovery once. Returns true if a previous session was adopted.
    pub async fn mount(&self) -> bool {
        let shared = &self.shared;
        {
            let mut st = shared.state.lock().await;
            if st.mounted {
                return false;
            }
            st.mounted = true;
        }

        let max_age = shared.config.session_max_age.as_millis() as u64;
        let recovery = match recover(
            &shared.store,
            shared.backend.as_ref(),
            &shared.user_id,
            now_millis(),
            max_age,
        )
        .await
        {
            Ok(recovery) => recovery,
            Err(_) => return false,
        };

        let resume = recovery.resume_polling();
        {
            let mut st = shared.state.lock().await;
            st.session_id = recovery.session_id;
            // Anything added while recovery was fetching stays after the recovered entries.
            let added = std::mem::take(&mut st.entries);
            st.entries = recovery.entries;
            st.entries.extend(added);
            st.recovery_notice = true;
            st.owns_session = true;
            shared.commit(&st);
        }
        if resume {
            self.ensure_polling().await;
        }
        true
    }

    /// Validates the files and starts a pipeline for each one that passes.
    /// Returns the new entry ids and the files that were turned away.
    pub async fn add_files(&self, paths: Vec<PathBuf>) -> (Vec<String>, Vec<Rejected>) {
        let shared = &self.shared;
        let mut jobs = Vec::new();
        let mut rejected = Vec::new();
        for path in paths {
            match shared.config.validator.validate(&path).await {
                Ok(file) => jobs.push(UploadJob {
                    entry_id: uuidv7::create(),
                    file,
                }),
                Err(reason) => {
                    info!("rejected {}: {reason}", path.display());
                    rejected.push(Rejected { path, reason });
                }
            }
        }
        if jobs.is_empty() {
            return (Vec::new(), rejected);
        }

        {
            let mut st = shared.state.lock().await;
            st.owns_session = true;
            for job in &jobs {
                st.entries.push(UploadEntry::new(
                    job.entry_id.clone(),
                    job.file.name.clone(),
                    job.file.size,
                    Some(job.file.path.clone()),
                ));
            }
            shared.commit(&st);
        }

        let ids = jobs.iter().map(|j| j.entry_id.clone()).collect();
        for job in jobs {
            self.spawn_upload(job);
        }
        self.ensure_polling().await;
        (ids, rejected)
    }

    fn spawn_upload(&self, job: UploadJob) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let entry_id = job.entry_id.clone();
            let inner = shared.clone();
            let pipeline = tokio::spawn(async move {
                let driver = UploadDriver::new(inner.backend.clone(), inner.user_id.clone());
                driver.run(&job, inner.as_ref()).await
            });
            match pipeline.await {
                Ok(status) => debug!("entry {entry_id} finished as {status}"),
                Err(e) => {
                    warn!("upload pipeline for {entry_id} died: {e}");
                    shared.fail_unexpectedly(&entry_id).await;
                }
            }
        });
    }

    async fn ensure_polling(&self) {
        let mut st = self.shared.state.lock().await;
        if st.poller.is_some() {
            return;
        }
        let poller = StatusPoller::new(
            self.shared.backend.clone(),
            self.shared.user_id.clone(),
            self.shared.config.poll_interval,
        );
        st.poller = Some(poller.spawn(self.shared.clone()));
        debug!("status poller started");
    }

    pub async fn is_polling(&self) -> bool {
        self.shared.state.lock().await.poller.is_some()
    }

    pub async fn dismiss_recovery_notice(&self) {
        let mut st = self.shared.state.lock().await;
        if st.recovery_notice {
            st.recovery_notice = false;
            self.shared.publish(&st);
        }
    }

    /// Drops completed entries. Refused while anything is in flight.
    pub async fn clear_completed(&self) -> Result<usize, ActionRefused> {
        let mut st = self.shared.state.lock().await;
        if st.entries.iter().any(UploadEntry::is_in_flight) {
            return Err(ActionRefused::UploadsInFlight);
        }
        let before = st.entries.len();
        st.entries.retain(|e| e.status() != DocumentStatus::Completed);
        let removed = before - st.entries.len();
        if removed > 0 {
            self.shared.commit(&st);
        }
        Ok(removed)
    }

    /// Forgets every entry and deletes the persisted session. Pipelines that
    /// are still running carry on but are no longer tracked.
    pub async fn clear_all(&self) {
        let mut st = self.shared.state.lock().await;
        if let Some(poller) = st.poller.take() {
            poller.cancel();
        }
        st.entries.clear();
        st.recovery_notice = false;
        self.shared.store.clear();
        self.shared.publish(&st);
    }

    pub async fn remove_entry(&self, entry_id: &str) -> Result<(), ActionRefused> {
        let mut st = self.shared.state.lock().await;
        let pos = st
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| ActionRefused::UnknownEntry(entry_id.to_string()))?;
        if st.entries[pos].is_in_flight() {
            return Err(ActionRefused::EntryInFlight(entry_id.to_string()));
        }
        st.entries.remove(pos);
        self.shared.commit(&st);
        Ok(())
    }

    /// True while leaving would lose track of an in-flight upload.
    pub async fn should_block_exit(&self) -> bool {
        self.shared
            .state
            .lock()
            .await
            .entries
            .iter()
            .any(UploadEntry::is_in_flight)
    }

    /// Writes the session now, for when the process may be torn down.
    pub async fn persist_now(&self) {
        let st = self.shared.state.lock().await;
        self.shared.persist(&st);
    }

    /// Persists and stops polling.
    pub async fn teardown(&self) {
        let mut st = self.shared.state.lock().await;
        self.shared.persist(&st);
        if let Some(poller) = st.poller.take() {
            poller.cancel();
        }
    }

    /// Resolves once no entry is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        if !self.should_block_exit().await {
            return;
        }
        let _ = rx.wait_for(|s| !s.has_in_flight()).await;
    }
}

impl<B, S> Shared<B, S>
where
    B: DocumentBackend,
    S: KeyValueStore,
{
    fn snapshot_of(&self, st: &State) -> Snapshot {
        Snapshot {
            entries: st.entries.clone(),
            recovery_notice: st.recovery_notice,
        }
    }

    fn publish(&self, st: &State) {
        self.events.send_replace(self.snapshot_of(st));
    }

    /// Writes run inline under the state lock so they land in mutation order.
    /// They are small synchronous writes to a local file.
    fn persist(&self, st: &State) {
        if !st.owns_session {
            return;
        }
        if st.entries.is_empty() {
            self.store.clear();
            return;
        }
        self.store.save(&UploadSession {
            session_id: st.session_id.clone(),
            user_id: self.user_id.clone(),
            files: st.entries.clone(),
            timestamp: now_millis(),
        });
    }

    /// Persists the full session and notifies subscribers.
    fn commit(&self, st: &State) {
        self.persist(st);
        self.publish(st);
    }

    async fn fail_unexpectedly(&self, entry_id: &str) {
        let document_id = {
            let mut st = self.state.lock().await;
            let Some(entry) = st.entries.iter_mut().find(|e| e.id == entry_id) else {
                return;
            };
            if !entry.transition(DocumentStatus::Error, Some(UNKNOWN_ERROR.to_string())) {
                return;
            }
            let document_id = entry.document_id().map(str::to_string);
            self.commit(&st);
            document_id
        };
        if let Some(document_id) = document_id {
            if let Err(e) = self
                .backend
                .update_document(&document_id, UpdateDocumentPayload::error(UNKNOWN_ERROR))
                .await
            {
                warn!("could not mark record {document_id} as failed: {e}");
            }
        }
    }
}

#[async_trait]
impl<B, S> EntrySink for Shared<B, S>
where
    B: DocumentBackend,
    S: KeyValueStore,
{
    async fn apply(&self, entry_id: &str, change: EntryChange) {
        let mut st = self.state.lock().await;
        let Some(entry) = st.entries.iter_mut().find(|e| e.id == entry_id) else {
            debug!("entry {entry_id} is no longer tracked; dropping {change:?}");
            return;
        };
        let changed = match change {
            EntryChange::DocumentId(id) => entry.set_document_id(id),
            EntryChange::Progress(p) => entry.set_progress(p),
            EntryChange::Status(status, error) => entry.transition(status, error),
        };
        if changed {
            self.commit(&st);
        }
    }
}

#[async_trait]
impl<B, S> PollTarget for Shared<B, S>
where
    B: DocumentBackend,
    S: KeyValueStore,
{
    async fn apply_records(&self, records: &[DocumentRecord]) {
        let mut st = self.state.lock().await;
        if reconcile_entries(&mut st.entries, records) {
            self.commit(&st);
        }
    }

    async fn finish_if_idle(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.entries.iter().any(UploadEntry::is_in_flight) {
            return false;
        }
        st.poller = None;
        self.store.set_in_flight(false);
        debug!("status poller stopped, nothing in flight");
        true
    }
}
