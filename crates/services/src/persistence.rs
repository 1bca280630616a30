//! Write-behind persistence of session snapshots.
//!
//! Commands never wait on storage. Snapshots go through an unbounded channel
//! to a local worker that coalesces bursts inside the debounce window and
//! writes the newest snapshot per session to the durable store. Every write
//! attempt is mirrored to a remote worker that upserts the same snapshot and
//! retries failures with capped exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use exam_core::Clock;
use exam_core::model::{SessionId, SessionSnapshot};
use rand::Rng;
use storage::repository::SessionSnapshotRepository;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::remote::RemoteSessionSync;

const MAX_JITTER_MS: u64 = 250;

/// How urgently a snapshot should reach the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Coalesced with other saves inside the debounce window.
    Debounced,
    /// Written immediately, along with anything already pending.
    Forced,
}

/// Health of both persistence sinks, published on a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceStatus {
    /// Consecutive failed local writes.
    pub local_failures: u32,
    /// Set once `local_failures` reaches the warn threshold; cleared by the
    /// next successful local write.
    pub local_at_risk: bool,
    /// Sessions whose newest snapshot has not reached the remote yet.
    pub remote_pending: usize,
    /// Consecutive failed remote upserts.
    pub remote_failures: u32,
    pub last_local_save: Option<DateTime<Utc>>,
    pub last_remote_sync: Option<DateTime<Utc>>,
}

/// Destination for snapshots produced by the state machine.
///
/// Both calls are fire-and-forget and must not block.
pub trait SnapshotSink: Send + Sync {
    fn save(&self, snapshot: SessionSnapshot, mode: SaveMode);

    /// Drop pending writes for `id` and delete it from every store.
    fn discard(&self, id: SessionId);
}

enum LocalCommand {
    Save(SessionSnapshot, SaveMode),
    Discard(SessionId),
    Flush(oneshot::Sender<()>),
}

enum RemoteCommand {
    Upsert(SessionSnapshot),
    Discard(SessionId),
    Flush(oneshot::Sender<()>),
}

/// Handle to the persistence workers. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceOrchestrator {
    commands: mpsc::UnboundedSender<LocalCommand>,
    status: watch::Receiver<PersistenceStatus>,
}

impl PersistenceOrchestrator {
    /// Spawn the workers on the current tokio runtime.
    ///
    /// Remote sync is disabled when `remote` is `None`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(
        local: Arc<dyn SessionSnapshotRepository>,
        remote: Option<Arc<dyn RemoteSessionSync>>,
        clock: Clock,
        config: &EngineConfig,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(PersistenceStatus::default());
        let status_tx = Arc::new(status_tx);

        let remote_tx = remote.map(|remote| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = RemoteWorker {
                remote,
                status: Arc::clone(&status_tx),
                clock: clock.clone(),
                retry_base: config.retry_base,
                retry_max: config.retry_max,
                pending: HashMap::new(),
                consecutive_failures: 0,
            };
            tokio::spawn(worker.run(rx));
            tx
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = LocalWorker {
            store: local,
            remote: remote_tx,
            status: status_tx,
            clock,
            debounce: config.debounce,
            warn_threshold: config.local_warn_threshold.max(1),
            pending: HashMap::new(),
            deadline: None,
            consecutive_failures: 0,
        };
        tokio::spawn(worker.run(rx));
        info!(
            debounce_ms = u64::try_from(config.debounce.as_millis()).unwrap_or(u64::MAX),
            "persistence workers started"
        );

        Self {
            commands: tx,
            status: status_rx,
        }
    }

    #[must_use]
    pub fn status(&self) -> PersistenceStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PersistenceStatus> {
        self.status.clone()
    }

    /// Write everything pending and make one remote attempt per session,
    /// ignoring backoff. Returns once both workers have caught up.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(LocalCommand::Flush(ack)).is_err() {
            return;
        }
        let _ = done.await;
    }

    fn send(&self, command: LocalCommand) {
        if self.commands.send(command).is_err() {
            error!("persistence worker is gone; snapshot dropped");
        }
    }
}

impl SnapshotSink for PersistenceOrchestrator {
    fn save(&self, snapshot: SessionSnapshot, mode: SaveMode) {
        self.send(LocalCommand::Save(snapshot, mode));
    }

    fn discard(&self, id: SessionId) {
        self.send(LocalCommand::Discard(id));
    }
}

//
// ─── LOCAL WORKER ──────────────────────────────────────────────────────────────
//

struct LocalWorker {
    store: Arc<dyn SessionSnapshotRepository>,
    remote: Option<mpsc::UnboundedSender<RemoteCommand>>,
    status: Arc<watch::Sender<PersistenceStatus>>,
    clock: Clock,
    debounce: Duration,
    warn_threshold: u32,
    pending: HashMap<SessionId, SessionSnapshot>,
    deadline: Option<Instant>,
    consecutive_failures: u32,
}

impl LocalWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LocalCommand>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.write_pending().await;
                }
            }
        }
        self.write_pending().await;
        debug!("local persistence worker stopped");
    }

    async fn handle(&mut self, command: LocalCommand) {
        match command {
            LocalCommand::Save(snapshot, mode) => {
                self.pending.insert(snapshot.session_id, snapshot);
                match mode {
                    SaveMode::Forced => self.write_pending().await,
                    SaveMode::Debounced => {
                        let debounce = self.debounce;
                        self.deadline.get_or_insert_with(|| Instant::now() + debounce);
                    }
                }
            }
            LocalCommand::Discard(id) => {
                self.pending.remove(&id);
                if self.pending.is_empty() {
                    self.deadline = None;
                }
                match self.store.delete_snapshot(id).await {
                    Ok(removed) => debug!(session_id = %id, removed, "local snapshot discarded"),
                    Err(err) => warn!(session_id = %id, error = %err, "local discard failed"),
                }
                self.forward(RemoteCommand::Discard(id));
            }
            LocalCommand::Flush(ack) => {
                self.write_pending().await;
                match &self.remote {
                    Some(remote) => {
                        if let Err(mpsc::error::SendError(RemoteCommand::Flush(ack))) =
                            remote.send(RemoteCommand::Flush(ack))
                        {
                            let _ = ack.send(());
                        }
                    }
                    None => {
                        let _ = ack.send(());
                    }
                }
            }
        }
    }

    async fn write_pending(&mut self) {
        self.deadline = None;
        let mut failed = Vec::new();
        let batch: Vec<_> = self.pending.drain().collect();

        for (id, snapshot) in batch {
            match self.store.save_snapshot(&snapshot).await {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    let now = self.clock.now();
                    self.status.send_modify(|status| {
                        status.local_failures = 0;
                        status.local_at_risk = false;
                        status.last_local_save = Some(now);
                    });
                    debug!(session_id = %id, "snapshot written locally");
                    if let Some(remote) = &self.remote {
                        let _ = remote.send(RemoteCommand::Upsert(snapshot));
                    }
                }
                Err(err) => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    let failures = self.consecutive_failures;
                    let at_risk = failures >= self.warn_threshold;
                    self.status.send_modify(|status| {
                        status.local_failures = failures;
                        status.local_at_risk = at_risk;
                    });
                    if at_risk {
                        error!(session_id = %id, failures, error = %err, "local persistence at risk");
                    } else {
                        warn!(session_id = %id, failures, error = %err, "local write failed");
                    }
                    if let Some(remote) = &self.remote {
                        let _ = remote.send(RemoteCommand::Upsert(snapshot.clone()));
                    }
                    failed.push((id, snapshot));
                }
            }
        }

        if !failed.is_empty() {
            self.pending.extend(failed);
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    fn forward(&self, command: RemoteCommand) {
        if let Some(remote) = &self.remote {
            let _ = remote.send(command);
        }
    }
}

//
// ─── REMOTE WORKER ─────────────────────────────────────────────────────────────
//

struct PendingUpsert {
    snapshot: SessionSnapshot,
    failures: u32,
    next_attempt: Instant,
}

struct RemoteWorker {
    remote: Arc<dyn RemoteSessionSync>,
    status: Arc<watch::Sender<PersistenceStatus>>,
    clock: Clock,
    retry_base: Duration,
    retry_max: Duration,
    pending: HashMap<SessionId, PendingUpsert>,
    consecutive_failures: u32,
}

/// `base * 2^(failures - 1)`, capped at `max`.
fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent).min(max)
}

impl RemoteWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RemoteCommand>) {
        loop {
            let next = self.pending.values().map(|p| p.next_attempt).min();
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                () = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    self.attempt(false).await;
                }
            }
        }
        self.attempt(true).await;
        debug!("remote sync worker stopped");
    }

    async fn handle(&mut self, command: RemoteCommand) {
        match command {
            RemoteCommand::Upsert(snapshot) => {
                match self.pending.get_mut(&snapshot.session_id) {
                    // Keep the backoff schedule; only the payload is replaced.
                    Some(entry) => entry.snapshot = snapshot,
                    None => {
                        self.pending.insert(
                            snapshot.session_id,
                            PendingUpsert {
                                snapshot,
                                failures: 0,
                                next_attempt: Instant::now(),
                            },
                        );
                    }
                }
                self.attempt(false).await;
            }
            RemoteCommand::Discard(id) => {
                self.pending.remove(&id);
                self.publish_pending();
                if let Err(err) = self.remote.delete(id).await {
                    warn!(session_id = %id, error = %err, "remote discard failed");
                }
            }
            RemoteCommand::Flush(ack) => {
                self.attempt(true).await;
                let _ = ack.send(());
            }
        }
    }

    /// Try every due upsert, or every pending one when `ignore_backoff`.
    async fn attempt(&mut self, ignore_backoff: bool) {
        let now = Instant::now();
        let due: Vec<SessionId> = self
            .pending
            .iter()
            .filter(|(_, p)| ignore_backoff || p.next_attempt <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(entry) = self.pending.get(&id) else {
                continue;
            };
            let result = self.remote.upsert(&entry.snapshot).await;
            match result {
                Ok(()) => {
                    self.pending.remove(&id);
                    self.consecutive_failures = 0;
                    let synced_at = self.clock.now();
                    self.status.send_modify(|status| {
                        status.remote_failures = 0;
                        status.last_remote_sync = Some(synced_at);
                    });
                    debug!(session_id = %id, "snapshot synced to remote");
                }
                Err(err) => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    let consecutive = self.consecutive_failures;
                    let jitter = Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS));
                    if let Some(entry) = self.pending.get_mut(&id) {
                        entry.failures = entry.failures.saturating_add(1);
                        let delay = backoff_delay(self.retry_base, self.retry_max, entry.failures);
                        entry.next_attempt = Instant::now() + delay + jitter;
                        warn!(
                            session_id = %id,
                            attempt = entry.failures,
                            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "remote sync failed"
                        );
                    }
                    self.status
                        .send_modify(|status| status.remote_failures = consecutive);
                }
            }
        }
        self.publish_pending();
    }

    fn publish_pending(&self) {
        let pending = self.pending.len();
        self.status
            .send_modify(|status| status.remote_pending = pending);
    }
}
