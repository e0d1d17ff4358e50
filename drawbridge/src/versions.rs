//! Version history (§4.F): listing and restoring prior snapshots.

use serde::Serialize;

use crate::engine::Engine;
use crate::errors::DrawbridgeError;
use crate::store::SnapshotInfo;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsResponse {
    pub current: Option<SnapshotInfo>,
    pub versions: Vec<SnapshotInfo>,
}

/// `listVersions(sessionId)`.
pub async fn list_versions(engine: &Engine, session_id: &str) -> Result<VersionsResponse, DrawbridgeError> {
    let current = engine.store.current_snapshot_info(session_id).await?;
    let versions = engine.store.list_versioned_snapshots(session_id).await?;
    Ok(VersionsResponse { current, versions })
}

/// `restoreVersion(sessionId, timestamp)`: thin wrapper over
/// `mutation::restore`, kept as its own module since it belongs
/// conceptually to version history rather than ordinary mutation.
pub async fn restore_version(engine: &Engine, session_id: &str, timestamp: u128) -> Result<usize, DrawbridgeError> {
    crate::mutation::restore(engine, session_id, timestamp).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrawbridgeConfig;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn list_versions_reports_current_and_history() {
        let dir = tempdir().unwrap();
        let engine = Engine::with_disabled_file_store(dir.path().to_path_buf(), &DrawbridgeConfig::default());
        crate::mutation::append_elements(&engine, "s6", vec![json!({"id": "a"})]).await.unwrap();

        let empty = list_versions(&engine, "s6").await.unwrap();
        assert!(empty.current.is_none());
        assert!(empty.versions.is_empty());

        let session = engine.get_session("s6").await.unwrap();
        {
            let state = session.state.lock().await;
            engine.store.write_snapshot("s6", &state.snapshot).await.unwrap();
        }

        let after = list_versions(&engine, "s6").await.unwrap();
        assert_eq!(after.current.unwrap().element_count, 1);
        assert!(after.versions.is_empty());
    }

    #[tokio::test]
    async fn restore_of_missing_timestamp_fails_without_touching_state() {
        let dir = tempdir().unwrap();
        let engine = Engine::with_disabled_file_store(dir.path().to_path_buf(), &DrawbridgeConfig::default());
        crate::mutation::append_elements(&engine, "s6", vec![json!({"id": "a"})]).await.unwrap();

        let err = restore_version(&engine, "s6", 1).await.unwrap_err();
        assert!(matches!(err, DrawbridgeError::VersionNotFound { .. }));

        let session = engine.get_session("s6").await.unwrap();
        let state = session.state.lock().await;
        assert_eq!(state.snapshot.elements.len(), 1);
    }
}
