//! Durable log store: filesystem operations, nothing else.
//!
//! Every session is three files under `DATA_DIR`, named from its id:
//! `{id}.snapshot` (current compacted state), `{id}.snapshot-{millis}`
//! (versioned snapshots kept for time travel), and `{id}.log`
//! (newline-delimited operations applied since the current snapshot).
//! `{id}.files` holds files-meta, persisted independently of the log.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DrawbridgeError;
use crate::model::{FilesMeta, Operation, Snapshot};

/// Encode/decode one self-describing line of a log or snapshot file.
/// Implemented via `#[derive(LogLine)]` (see `drawbridge_macros`) for
/// `Operation` and `Snapshot`.
pub trait LogLine: Sized {
    fn to_line(&self) -> Result<String, serde_json::Error>;
    fn from_line(line: &str) -> Result<Self, serde_json::Error>;
}

/// Description of one versioned (or current) snapshot, as reported by
/// `GET /api/session/:id/versions`.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub timestamp: u128,
    pub element_count: usize,
    pub size: u64,
}

#[derive(Clone)]
pub struct LogStore {
    data_dir: PathBuf,
    history_cap: usize,
}

impl LogStore {
    pub fn new(data_dir: PathBuf, history_cap: usize) -> Self {
        Self { data_dir, history_cap }
    }

    fn current_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("{session_id}.snapshot"))
    }

    fn tmp_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("{session_id}.snapshot.tmp"))
    }

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("{session_id}.log"))
    }

    fn files_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("{session_id}.files"))
    }

    fn version_path(&self, session_id: &str, millis: u128) -> PathBuf {
        self.data_dir.join(format!("{session_id}.snapshot-{millis}"))
    }

    fn version_prefix(&self, session_id: &str) -> String {
        format!("{session_id}.snapshot-")
    }

    async fn ensure_data_dir(&self) -> Result<(), DrawbridgeError> {
        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|source| DrawbridgeError::IoError {
                session: String::new(),
                source,
            })
    }

    fn io_err(session_id: &str, source: std::io::Error) -> DrawbridgeError {
        DrawbridgeError::IoError {
            session: session_id.to_string(),
            source,
        }
    }

    /// Load a session from disk: decode the current snapshot if present,
    /// then replay every log line on top of it. Unreadable snapshot or log
    /// lines are logged and skipped, never aborting the load.
    pub async fn load_session(&self, session_id: &str) -> Result<Snapshot, DrawbridgeError> {
        let mut state = match fs::read_to_string(self.current_path(session_id)).await {
            Ok(text) => match Snapshot::from_line(&text) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::error!(session = session_id, err = e.to_string(); "corrupt current snapshot, starting empty");
                    Snapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(Self::io_err(session_id, e)),
        };

        match fs::read_to_string(self.log_path(session_id)).await {
            Ok(text) => {
                for (n, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Operation::from_line(line) {
                        Ok(op) => crate::model::apply(&mut state, &op),
                        Err(e) => {
                            log::error!(session = session_id, line = n, err = e.to_string(); "skipping corrupt log line");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => return Err(Self::io_err(session_id, e)),
        }

        Ok(state)
    }

    /// Append one operation to the log as a single line.
    pub async fn append_log(&self, session_id: &str, op: &Operation) -> Result<(), DrawbridgeError> {
        self.ensure_data_dir().await?;
        let line = op.to_line()?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(session_id))
            .await
            .map_err(|e| Self::io_err(session_id, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Self::io_err(session_id, e))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| Self::io_err(session_id, e))?;
        Ok(())
    }

    /// Rotate the existing current snapshot (if any) into a versioned file,
    /// write `state` as the new current snapshot atomically, and truncate
    /// the log. This is the general-purpose compaction entry point used by
    /// the periodic flush, idle eviction, shutdown flush, and `clear`.
    pub async fn write_snapshot(&self, session_id: &str, state: &Snapshot) -> Result<(), DrawbridgeError> {
        self.ensure_data_dir().await?;
        let current = self.current_path(session_id);
        if fs::try_exists(&current).await.unwrap_or(false) {
            let millis = now_millis();
            match fs::copy(&current, self.version_path(session_id, millis)).await {
                Ok(_) => self.prune_versioned_snapshots(session_id).await?,
                Err(e) => log::error!(session = session_id, err = e.to_string(); "failed to rotate current snapshot into history"),
            }
        }
        self.write_current(session_id, state).await?;
        self.truncate_log(session_id).await
    }

    /// Write `state` directly to a brand-new versioned snapshot file without
    /// touching the current snapshot. Used by `restore` to preserve the full
    /// live pre-restore state, which may be ahead of whatever is already
    /// compacted to disk.
    pub async fn write_version_snapshot(&self, session_id: &str, state: &Snapshot) -> Result<u128, DrawbridgeError> {
        self.ensure_data_dir().await?;
        let millis = now_millis();
        let line = state.to_line()?;
        fs::write(self.version_path(session_id, millis), line)
            .await
            .map_err(|e| Self::io_err(session_id, e))?;
        self.prune_versioned_snapshots(session_id).await?;
        Ok(millis)
    }

    async fn write_current(&self, session_id: &str, state: &Snapshot) -> Result<(), DrawbridgeError> {
        let line = state.to_line()?;
        let tmp = self.tmp_path(session_id);
        fs::write(&tmp, line)
            .await
            .map_err(|e| Self::io_err(session_id, e))?;
        fs::rename(&tmp, self.current_path(session_id))
            .await
            .map_err(|e| Self::io_err(session_id, e))
    }

    async fn truncate_log(&self, session_id: &str) -> Result<(), DrawbridgeError> {
        fs::write(self.log_path(session_id), b"")
            .await
            .map_err(|e| Self::io_err(session_id, e))
    }

    /// Remove the last line of the log, for `undo`. Fails if the log is
    /// empty or missing: the previous snapshot is unreachable by undo.
    pub async fn drop_last_log_line(&self, session_id: &str) -> Result<(), DrawbridgeError> {
        let text = match fs::read_to_string(self.log_path(session_id)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Self::io_err(session_id, e)),
        };
        let mut lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.pop().is_none() {
            return Err(DrawbridgeError::NothingToUndo(session_id.to_string()));
        }
        let mut rewritten = lines.join("\n");
        if !rewritten.is_empty() {
            rewritten.push('\n');
        }
        fs::write(self.log_path(session_id), rewritten)
            .await
            .map_err(|e| Self::io_err(session_id, e))
    }

    /// Whether `timestamp` names a restorable target: either a versioned
    /// snapshot file, or the current snapshot's own mtime (see
    /// `install_version`). Used to fail `restore` before it writes the
    /// pre-restore backup, so a missing target leaves no side effect.
    pub async fn version_exists(&self, session_id: &str, timestamp: u128) -> Result<bool, DrawbridgeError> {
        if fs::try_exists(self.version_path(session_id, timestamp)).await.unwrap_or(false) {
            return Ok(true);
        }
        Ok(matches!(
            self.current_snapshot_info(session_id).await?,
            Some(info) if info.timestamp == timestamp
        ))
    }

    /// Locate and install a versioned snapshot as the new current snapshot,
    /// truncating the log. The lookup also accepts the current snapshot's
    /// own mtime as a restorable target — see the Open Questions decision in
    /// DESIGN.md — even though that timestamp is not enumerated among the
    /// `versions` returned by `list_versioned_snapshots`.
    pub async fn install_version(&self, session_id: &str, timestamp: u128) -> Result<Snapshot, DrawbridgeError> {
        let versioned = self.version_path(session_id, timestamp);
        if fs::try_exists(&versioned).await.unwrap_or(false) {
            fs::rename(&versioned, self.current_path(session_id))
                .await
                .map_err(|e| Self::io_err(session_id, e))?;
        } else {
            match self.current_snapshot_info(session_id).await? {
                Some(info) if info.timestamp == timestamp => {
                    // Already current; nothing to move.
                }
                _ => {
                    return Err(DrawbridgeError::VersionNotFound {
                        session: session_id.to_string(),
                        timestamp,
                    })
                }
            }
        }
        self.truncate_log(session_id).await?;
        self.load_session(session_id).await
    }

    /// Describe the current snapshot (mtime, element count, size), if any.
    pub async fn current_snapshot_info(&self, session_id: &str) -> Result<Option<SnapshotInfo>, DrawbridgeError> {
        let path = self.current_path(session_id);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(session_id, e)),
        };
        let text = fs::read_to_string(&path).await.map_err(|e| Self::io_err(session_id, e))?;
        let element_count = Snapshot::from_line(&text).map(|s| s.elements.len()).unwrap_or(0);
        Ok(Some(SnapshotInfo {
            timestamp: mtime_millis(&meta),
            element_count,
            size: meta.len(),
        }))
    }

    /// Enumerate versioned snapshots, newest-first.
    pub async fn list_versioned_snapshots(&self, session_id: &str) -> Result<Vec<SnapshotInfo>, DrawbridgeError> {
        let prefix = self.version_prefix(session_id);
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(session_id, e)),
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::io_err(session_id, e))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(ts_str) = name.strip_prefix(&prefix) else { continue };
            let Ok(timestamp) = ts_str.parse::<u128>() else { continue };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let element_count = match fs::read_to_string(entry.path()).await {
                Ok(text) => Snapshot::from_line(&text).map(|s| s.elements.len()).unwrap_or(0),
                Err(_) => 0,
            };
            infos.push(SnapshotInfo {
                timestamp,
                element_count,
                size: meta.len(),
            });
        }
        infos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(infos)
    }

    /// Keep the newest `history_cap` versioned snapshots, delete the rest.
    pub async fn prune_versioned_snapshots(&self, session_id: &str) -> Result<(), DrawbridgeError> {
        self.prune_to(session_id, self.history_cap).await
    }

    pub async fn prune_to(&self, session_id: &str, history_cap: usize) -> Result<(), DrawbridgeError> {
        let infos = self.list_versioned_snapshots(session_id).await?;
        for stale in infos.into_iter().skip(history_cap) {
            let path = self.version_path(session_id, stale.timestamp);
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::error!(session = session_id, err = e.to_string(); "failed to prune versioned snapshot");
                }
            }
        }
        Ok(())
    }

    pub async fn write_files_meta(&self, session_id: &str, files: &FilesMeta) -> Result<(), DrawbridgeError> {
        self.ensure_data_dir().await?;
        let line = serde_json::to_string(files)?;
        let tmp = self.data_dir.join(format!("{session_id}.files.tmp"));
        fs::write(&tmp, line).await.map_err(|e| Self::io_err(session_id, e))?;
        fs::rename(&tmp, self.files_path(session_id))
            .await
            .map_err(|e| Self::io_err(session_id, e))
    }

    pub async fn read_files_meta(&self, session_id: &str) -> Result<FilesMeta, DrawbridgeError> {
        match fs::read_to_string(self.files_path(session_id)).await {
            Ok(text) => Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
                log::error!(session = session_id, err = e.to_string(); "corrupt files-meta, starting empty");
                FilesMeta::default()
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FilesMeta::default()),
            Err(e) => Err(Self::io_err(session_id, e)),
        }
    }

    /// Remove just the files-meta file, for `clear` (§4.C): the drawing is
    /// reset but the snapshot/log history is untouched.
    pub async fn delete_files_meta(&self, session_id: &str) -> Result<(), DrawbridgeError> {
        match fs::remove_file(self.files_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(session_id, e)),
        }
    }

    /// Remove every on-disk trace of a session: snapshot, log, files-meta.
    /// Versioned snapshots are left in place — pruning, not deletion, is what
    /// manages their lifecycle.
    pub async fn delete_session_files(&self, session_id: &str) -> Result<(), DrawbridgeError> {
        for path in [
            self.current_path(session_id),
            self.log_path(session_id),
            self.files_path(session_id),
        ] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::error!(session = session_id, err = e.to_string(); "failed to delete session file");
                }
            }
        }
        Ok(())
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn mtime_millis(meta: &std::fs::Metadata) -> u128 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_and_load_replays_log_over_empty_state() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf(), 50);
        store
            .append_log("s1", &Operation::Set { elements: vec![json!({"id": "a"})], app_state: None })
            .await
            .unwrap();
        store
            .append_log("s1", &Operation::Append { elements: vec![json!({"id": "b"})] })
            .await
            .unwrap();
        let state = store.load_session("s1").await.unwrap();
        assert_eq!(state.elements.len(), 2);
    }

    #[tokio::test]
    async fn write_snapshot_rotates_old_current_and_truncates_log() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf(), 50);
        let first = Snapshot { elements: vec![json!({"id": "a"})], app_state: None, viewport: None };
        store.write_snapshot("s1", &first).await.unwrap();
        assert!(store.list_versioned_snapshots("s1").await.unwrap().is_empty());

        store.append_log("s1", &Operation::Append { elements: vec![json!({"id": "b"})] }).await.unwrap();
        let second = Snapshot { elements: vec![json!({"id": "a"}), json!({"id": "b"})], app_state: None, viewport: None };
        store.write_snapshot("s1", &second).await.unwrap();

        let versions = store.list_versioned_snapshots("s1").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].element_count, 1);

        let reloaded = store.load_session("s1").await.unwrap();
        assert_eq!(reloaded.elements.len(), 2);
    }

    #[tokio::test]
    async fn drop_last_log_line_fails_when_log_empty() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf(), 50);
        let err = store.drop_last_log_line("s1").await.unwrap_err();
        assert!(matches!(err, DrawbridgeError::NothingToUndo(_)));
    }

    #[tokio::test]
    async fn history_cap_prunes_oldest_first() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf(), 50);
        for i in 0..5u32 {
            let state = Snapshot { elements: vec![json!({"n": i})], app_state: None, viewport: None };
            store.write_version_snapshot("s1", &state).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store.prune_to("s1", 2).await.unwrap();
        let versions = store.list_versioned_snapshots("s1").await.unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn restore_accepts_current_snapshot_mtime_as_a_target() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf(), 50);
        let state = Snapshot { elements: vec![json!({"id": "a"})], app_state: None, viewport: None };
        store.write_snapshot("s1", &state).await.unwrap();
        let info = store.current_snapshot_info("s1").await.unwrap().unwrap();
        let restored = store.install_version("s1", info.timestamp).await.unwrap();
        assert_eq!(restored.elements.len(), 1);
    }
}
