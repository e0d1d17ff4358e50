//! The mutation engine (§4.C): the operations transport adapters call into.
//! Every accepted mutation runs the full {apply -> append log -> bump
//! version -> broadcast} sequence under the session's lock, and increments
//! `version` exactly once even when it performs more than one internal op.

use std::time::Instant;

use serde_json::Value;

use crate::engine::Engine;
use crate::errors::DrawbridgeError;
use crate::messages::ServerMessage;
use crate::model::{self, FilesMeta, Operation, Snapshot, Viewport};
use crate::session::broadcast;

pub struct MutationOutcome {
    pub element_count: usize,
    pub clients: usize,
}

/// `setElements(id, elements, appState?)`.
pub async fn set_elements(
    engine: &Engine,
    session_id: &str,
    elements: Vec<Value>,
    app_state: Option<Value>,
) -> Result<MutationOutcome, DrawbridgeError> {
    let session = engine.get_session(session_id).await?;
    let (draw_elements, viewports) = model::strip_viewport_elements(elements);
    let mut state = session.state.lock().await;

    let op = Operation::Set {
        elements: draw_elements,
        app_state,
    };
    model::apply(&mut state.snapshot, &op);
    engine.store.append_log(session_id, &op).await?;
    state.version += 1;
    broadcast(
        &state,
        ServerMessage::Elements {
            elements: state.snapshot.elements.clone(),
            app_state: state.snapshot.app_state.clone(),
            version: state.version,
            source: None,
        },
        None,
    );

    if let Some(viewport) = viewports.into_iter().last() {
        apply_viewport_no_bump(engine, session_id, &mut state, viewport).await?;
    }

    Ok(MutationOutcome {
        element_count: state.snapshot.elements.len(),
        clients: state.subscribers.len(),
    })
}

/// `appendElements(id, elements)`.
pub async fn append_elements(
    engine: &Engine,
    session_id: &str,
    elements: Vec<Value>,
) -> Result<MutationOutcome, DrawbridgeError> {
    let session = engine.get_session(session_id).await?;
    let (draw_elements, viewports) = model::strip_viewport_elements(elements);
    let mut state = session.state.lock().await;

    let mut mutated = false;
    if !draw_elements.is_empty() {
        let op = Operation::Append {
            elements: draw_elements.clone(),
        };
        model::apply(&mut state.snapshot, &op);
        engine.store.append_log(session_id, &op).await?;
        state.version += 1;
        mutated = true;
        broadcast(&state, ServerMessage::Append { elements: draw_elements }, None);
    }

    if let Some(viewport) = viewports.into_iter().last() {
        let op = Operation::Viewport { viewport };
        model::apply(&mut state.snapshot, &op);
        engine.store.append_log(session_id, &op).await?;
        if !mutated {
            state.version += 1;
        }
        broadcast(&state, ServerMessage::Viewport { viewport }, None);
    }

    Ok(MutationOutcome {
        element_count: state.snapshot.elements.len(),
        clients: state.subscribers.len(),
    })
}

/// `setViewport(id, rect)`, defaulting missing fields per §4.C.
pub async fn set_viewport(
    engine: &Engine,
    session_id: &str,
    viewport: Viewport,
) -> Result<Viewport, DrawbridgeError> {
    let session = engine.get_session(session_id).await?;
    let mut state = session.state.lock().await;
    apply_viewport_no_bump(engine, session_id, &mut state, viewport).await?;
    state.version += 1;
    Ok(viewport)
}

/// Apply a viewport operation and broadcast it without touching `version`.
/// A standalone `setViewport` call bumps `version` itself after calling this;
/// a viewport piggybacking on `setElements`/`appendElements` never does, per
/// the "version++ happens once, before the elements broadcast" rule.
async fn apply_viewport_no_bump(
    engine: &Engine,
    session_id: &str,
    state: &mut crate::session::SessionState,
    viewport: Viewport,
) -> Result<(), DrawbridgeError> {
    let op = Operation::Viewport { viewport };
    model::apply(&mut state.snapshot, &op);
    engine.store.append_log(session_id, &op).await?;
    broadcast(state, ServerMessage::Viewport { viewport }, None);
    Ok(())
}

/// `clear(id)`: preserve the overwritten state in version history before
/// resetting, then drop files-meta.
pub async fn clear(engine: &Engine, session_id: &str) -> Result<(), DrawbridgeError> {
    let session = engine.get_session(session_id).await?;
    let mut state = session.state.lock().await;

    if !state.snapshot.elements.is_empty() {
        engine.store.write_snapshot(session_id, &state.snapshot).await?;
        state.last_snapshot_at = Instant::now();
    }

    let op = Operation::Clear;
    model::apply(&mut state.snapshot, &op);
    engine.store.append_log(session_id, &op).await?;
    state.version += 1;
    state.files = FilesMeta::default();
    engine.store.delete_files_meta(session_id).await?;

    broadcast(&state, ServerMessage::Clear {}, None);
    Ok(())
}

/// `undo(id)`: drop the last log line and rebuild from `current snapshot +
/// remaining log`. Fails without touching state if the log is empty.
pub async fn undo(engine: &Engine, session_id: &str) -> Result<usize, DrawbridgeError> {
    let session = engine.get_session(session_id).await?;
    let mut state = session.state.lock().await;

    engine.store.drop_last_log_line(session_id).await?;
    let rebuilt: Snapshot = engine.store.load_session(session_id).await?;
    state.snapshot = rebuilt;
    state.version += 1;

    broadcast(
        &state,
        ServerMessage::Elements {
            elements: state.snapshot.elements.clone(),
            app_state: state.snapshot.app_state.clone(),
            version: state.version,
            source: None,
        },
        None,
    );
    Ok(state.snapshot.elements.len())
}

/// `restore(id, timestamp)`: preserve the live pre-restore state as a new
/// version, then install the requested versioned snapshot as current.
pub async fn restore(engine: &Engine, session_id: &str, timestamp: u128) -> Result<usize, DrawbridgeError> {
    let session = engine.get_session(session_id).await?;
    let mut state = session.state.lock().await;

    if !engine.store.version_exists(session_id, timestamp).await? {
        return Err(DrawbridgeError::VersionNotFound {
            session: session_id.to_string(),
            timestamp,
        });
    }

    engine
        .store
        .write_version_snapshot(session_id, &state.snapshot)
        .await?;
    let restored = engine.store.install_version(session_id, timestamp).await?;
    state.snapshot = restored;
    state.version += 1;
    state.last_snapshot_at = Instant::now();

    broadcast(
        &state,
        ServerMessage::Elements {
            elements: state.snapshot.elements.clone(),
            app_state: state.snapshot.app_state.clone(),
            version: state.version,
            source: Some("restore"),
        },
        None,
    );
    Ok(state.snapshot.elements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrawbridgeConfig;
    use serde_json::json;
    use tempfile::tempdir;

    fn test_engine(dir: &std::path::Path) -> Engine {
        Engine::with_disabled_file_store(dir.to_path_buf(), &DrawbridgeConfig::default())
    }

    #[tokio::test]
    async fn set_elements_strips_camera_update_into_viewport() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        let elements = vec![
            json!({"type": "cameraUpdate", "x": 0, "y": 0, "width": 400, "height": 300}),
            json!({"id": "r", "type": "rectangle"}),
        ];
        let outcome = set_elements(&engine, "s2", elements, None).await.unwrap();
        assert_eq!(outcome.element_count, 1);

        let session = engine.get_session("s2").await.unwrap();
        let state = session.state.lock().await;
        assert_eq!(state.version, 1);
        assert_eq!(state.snapshot.viewport, Some(Viewport { x: 0.0, y: 0.0, width: 400.0, height: 300.0 }));
    }

    #[tokio::test]
    async fn undo_fails_without_touching_state_when_log_empty() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.get_session("s5").await.unwrap();
        let err = undo(&engine, "s5").await.unwrap_err();
        assert!(matches!(err, DrawbridgeError::NothingToUndo(_)));
    }

    #[tokio::test]
    async fn undo_removes_the_most_recent_append() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        append_elements(&engine, "s5", vec![json!({"id": "a"})]).await.unwrap();
        append_elements(&engine, "s5", vec![json!({"id": "b"})]).await.unwrap();
        let count = undo(&engine, "s5").await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn clear_preserves_prior_state_in_history() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        append_elements(&engine, "s6", vec![json!({"id": "a"})]).await.unwrap();
        clear(&engine, "s6").await.unwrap();

        let versions = engine.store.list_versioned_snapshots("s6").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].element_count, 1);

        let session = engine.get_session("s6").await.unwrap();
        let state = session.state.lock().await;
        assert!(state.snapshot.elements.is_empty());
    }

    #[tokio::test]
    async fn restore_round_trips_to_a_prior_version() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        append_elements(&engine, "s1", vec![json!({"id": "a"})]).await.unwrap();

        let session = engine.get_session("s1").await.unwrap();
        let snapshot_at = {
            let state = session.state.lock().await;
            engine.store.write_snapshot("s1", &state.snapshot).await.unwrap();
            engine.store.current_snapshot_info("s1").await.unwrap().unwrap().timestamp
        };

        append_elements(&engine, "s1", vec![json!({"id": "b"})]).await.unwrap();
        let count = restore(&engine, "s1", snapshot_at).await.unwrap();
        assert_eq!(count, 1);

        let versions = engine.store.list_versioned_snapshots("s1").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].element_count, 2);
    }
}
