//! The engine (§4.D, §9 "ambient globals become explicit dependencies"): the
//! single process-owned value holding the session table, the durable log
//! store, and the file-storage collaborator. Transport adapters are handed
//! an `Arc<Engine>` at construction and never reach for global state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::DrawbridgeConfig;
use crate::errors::DrawbridgeError;
use crate::files::{DisabledFileStore, FileStore};
use crate::model::FileMeta;
use crate::session::{broadcast, Session};
use crate::store::LogStore;

pub struct Engine {
    sessions: DashMap<String, Arc<Session>>,
    pub store: LogStore,
    pub file_store: Arc<dyn FileStore>,
    pub history_cap: usize,
    pub update_debounce: Duration,
    pub subscriber_queue_depth: usize,
    pub idle_evict: Duration,
    pub snapshot_interval: Duration,
}

impl Engine {
    pub fn new(data_dir: PathBuf, config: &DrawbridgeConfig, file_store: Arc<dyn FileStore>) -> Self {
        Self {
            sessions: DashMap::new(),
            store: LogStore::new(data_dir, config.history_cap),
            file_store,
            history_cap: config.history_cap,
            update_debounce: Duration::from_millis(config.update_debounce_ms),
            subscriber_queue_depth: config.subscriber_queue_depth,
            idle_evict: Duration::from_secs(config.idle_evict_secs),
            snapshot_interval: Duration::from_secs(config.snapshot_interval_secs),
        }
    }

    pub fn with_disabled_file_store(data_dir: PathBuf, config: &DrawbridgeConfig) -> Self {
        Self::new(data_dir, config, Arc::new(DisabledFileStore))
    }

    /// `getSession` (§4.D): return the in-memory session, lazily loading it
    /// from disk on first access.
    pub async fn get_session(&self, id: &str) -> Result<Arc<Session>, DrawbridgeError> {
        if let Some(session) = self.sessions.get(id) {
            return Ok(session.clone());
        }
        let snapshot = self.store.load_session(id).await?;
        let files = self.store.read_files_meta(id).await?;
        let session = Arc::new(Session::new(id.to_string(), snapshot, files));
        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert(session)
            .clone();
        Ok(session)
    }

    /// Snapshot of the sessions currently resident in memory, for
    /// `GET /api/sessions` and `GET /health`.
    pub async fn list_in_memory(&self) -> Vec<(String, usize, usize)> {
        let mut out = Vec::with_capacity(self.sessions.len());
        for entry in self.sessions.iter() {
            let state = entry.value().state.lock().await;
            out.push((entry.key().clone(), state.snapshot.elements.len(), state.subscribers.len()));
        }
        out
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove a session from memory without touching disk. Called by idle
    /// eviction once its subscriber set has stayed empty for `T_EVICT`.
    fn evict(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// Idle eviction (§4.D): schedule a check `T_EVICT` after a session's
    /// subscriber set became empty. If it is still empty when the check
    /// fires, flush a snapshot (if non-empty) and drop the session from
    /// memory.
    pub fn schedule_idle_eviction(self: &Arc<Self>, session: Arc<Session>) {
        let engine = self.clone();
        let delay = self.idle_evict;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = session.state.lock().await;
            if !state.subscribers.is_empty() {
                return;
            }
            if !state.snapshot.elements.is_empty() {
                if let Err(e) = engine.store.write_snapshot(&session.id, &state.snapshot).await {
                    log::error!(session = session.id.as_str(), err = e.to_string(); "idle-eviction snapshot flush failed");
                }
                engine.prune(&session.id).await;
                state.last_snapshot_at = Instant::now();
            }
            drop(state);
            engine.evict(&session.id);
            log::info!(session = session.id.as_str(); "evicted idle session from memory");
        });
    }

    async fn prune(&self, session_id: &str) {
        if let Err(e) = self.store.prune_to(session_id, self.history_cap).await {
            log::error!(session = session_id, err = e.to_string(); "failed to prune versioned snapshots");
        }
    }

    /// Periodic snapshot flush (§4.C snapshot policy): every `T_SNAP`, write
    /// a snapshot for every in-memory session whose elements are non-empty
    /// and whose last snapshot is stale.
    pub fn spawn_periodic_snapshot_flush(self: &Arc<Self>) {
        let engine = self.clone();
        let interval = self.snapshot_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                engine.flush_stale_snapshots(interval).await;
            }
        });
    }

    async fn flush_stale_snapshots(&self, interval: Duration) {
        for entry in self.sessions.iter() {
            let session = entry.value().clone();
            let mut state = session.state.lock().await;
            if state.snapshot.elements.is_empty() {
                continue;
            }
            if state.last_snapshot_at.elapsed() < interval {
                continue;
            }
            if let Err(e) = self.store.write_snapshot(&session.id, &state.snapshot).await {
                log::error!(session = session.id.as_str(), err = e.to_string(); "periodic snapshot flush failed");
                continue;
            }
            self.prune(&session.id).await;
            state.last_snapshot_at = Instant::now();
        }
    }

    /// Graceful shutdown (§4.D): flush every non-empty in-memory session.
    /// Best-effort — one session's failure never blocks another's.
    pub async fn shutdown_flush(&self) {
        for entry in self.sessions.iter() {
            let session = entry.value().clone();
            let state = session.state.lock().await;
            if state.snapshot.elements.is_empty() {
                continue;
            }
            if let Err(e) = self.store.write_snapshot(&session.id, &state.snapshot).await {
                log::error!(session = session.id.as_str(), err = e.to_string(); "shutdown snapshot flush failed");
                continue;
            }
            self.prune(&session.id).await;
        }
        log::info!("shutdown flush complete");
    }

    /// Invoke the file-storage collaborator and, on success, persist and
    /// broadcast the new file metadata. Not bound to an HTTP route in the
    /// core — see the file-upload interface boundary.
    pub async fn upload_file(
        &self,
        session_id: &str,
        file_bytes: &[u8],
        mime_type: &str,
    ) -> Result<FileMeta, DrawbridgeError> {
        let meta = self.file_store.upload(session_id, file_bytes, mime_type).await?;
        let session = self.get_session(session_id).await?;
        let mut state = session.state.lock().await;
        state.files.files.insert(meta.id.clone(), meta.clone());
        self.store.write_files_meta(session_id, &state.files).await?;
        broadcast(
            &state,
            crate::messages::ServerMessage::FileAdded { file: meta.clone() },
            None,
        );
        Ok(meta)
    }
}
