//! Fixed-interval status polling for documents still being processed.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::data::{DocumentRecord, UploadEntry};
use log::debug;
use tokio::{
    select,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::api::DocumentBackend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What the poller keeps up to date.
#[async_trait]
pub trait PollTarget: Send + Sync {
    /// Folds fresh records into the tracked entries.
    async fn apply_records(&self, records: &[DocumentRecord]);

    /// Returns true, and marks polling as stopped, if nothing is in flight.
    /// Both must happen atomically so a file added concurrently either keeps
    /// this poller alive or starts a new one.
    async fn finish_if_idle(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollExit {
    /// Every tracked entry reached a terminal state.
    Idle,
    Cancelled,
}

/// Brings in-flight entries up to date with their records. Only forward
/// moves are taken, so an entry being driven locally is never set back.
pub fn reconcile_entries(entries: &mut [UploadEntry], records: &[DocumentRecord]) -> bool {
    let mut changed = false;
    for entry in entries.iter_mut().filter(|e| e.is_in_flight()) {
        let Some(document_id) = entry.document_id() else {
            continue;
        };
        if let Some(record) = records.iter().find(|r| r.id == document_id) {
            changed |= entry.transition(record.status, record.error_message.clone());
        }
    }
    changed
}

pub struct StatusPoller<B: ?Sized> {
    backend: Arc<B>,
    owner_id: String,
    period: Duration,
}

impl<B: DocumentBackend + ?Sized + 'static> StatusPoller<B> {
    pub fn new(backend: Arc<B>, owner_id: String, period: Duration) -> Self {
        Self {
            backend,
            owner_id,
            period,
        }
    }

    /// Polls until nothing is in flight or `token` is cancelled. Ticks run
    /// one after another; a tick that overruns the period swallows the
    /// ticks it missed instead of bunching them up.
    pub async fn run<T: PollTarget + ?Sized>(&self, target: &T, token: CancellationToken) -> PollExit {
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            select! {
                biased;
                _ = token.cancelled() => return PollExit::Cancelled,
                _ = timer.tick() => {}
            }
            if target.finish_if_idle().await {
                return PollExit::Idle;
            }
            let fetched = select! {
                biased;
                _ = token.cancelled() => return PollExit::Cancelled,
                r = self.backend.list_documents(&self.owner_id) => r,
            };
            match fetched {
                Ok(records) => target.apply_records(&records).await,
                Err(e) => debug!("status poll failed, retrying next tick: {e}"),
            }
            if target.finish_if_idle().await {
                return PollExit::Idle;
            }
        }
    }

    pub fn spawn<T: PollTarget + ?Sized + 'static>(self, target: Arc<T>) -> PollerHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move { self.run(&*target, child).await });
        PollerHandle { token, handle }
    }
}

pub struct PollerHandle {
    token: CancellationToken,
    handle: JoinHandle<PollExit>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Option<PollExit> {
        self.handle.await.ok()
    }
}
