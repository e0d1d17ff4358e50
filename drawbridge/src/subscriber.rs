//! Subscriber fan-out (§4.E): connect/disconnect lifecycle, the initial
//! state push, and the debounced log-append for subscriber-originated
//! `update` messages.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::errors::DrawbridgeError;
use crate::messages::ServerMessage;
use crate::model::Operation;
use crate::session::{broadcast, send_to, Session, SubscriberId};

/// On connect: register the subscriber and push its initial state. Returns
/// the id to route future inbound messages and close events against.
pub async fn connect(
    session: &Arc<Session>,
    queue_depth: usize,
) -> (SubscriberId, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(queue_depth);
    let id = session.next_subscriber_id();

    let mut state = session.state.lock().await;
    state.subscribers.insert(id, tx.clone());

    send_to(
        &tx,
        ServerMessage::Elements {
            elements: state.snapshot.elements.clone(),
            app_state: state.snapshot.app_state.clone(),
            version: state.version,
            source: None,
        },
    );
    if let Some(viewport) = state.snapshot.viewport {
        send_to(&tx, ServerMessage::Viewport { viewport });
    }
    if !state.files.files.is_empty() {
        send_to(&tx, ServerMessage::FilesMeta { files: state.files.files.clone() });
    }

    (id, rx)
}

/// Inbound `update{elements, baseVersion?}` (§4.E step 3).
pub async fn handle_update(
    engine: &Arc<Engine>,
    session: &Arc<Session>,
    subscriber_id: SubscriberId,
    elements: Vec<Value>,
    base_version: Option<u64>,
) {
    let mut state = session.state.lock().await;

    if let Some(base) = base_version {
        if base < state.version {
            if let Some(sender) = state.subscribers.get(&subscriber_id) {
                log::debug!(session = session.id.as_str(), base_version = base, current_version = state.version; "rejecting stale subscriber update");
                send_to(
                    sender,
                    ServerMessage::Elements {
                        elements: state.snapshot.elements.clone(),
                        app_state: state.snapshot.app_state.clone(),
                        version: state.version,
                        source: Some("version-correction"),
                    },
                );
            }
            return;
        }
    }

    state.snapshot.elements = elements.clone();
    state.version += 1;
    state.update_generation += 1;
    let generation = state.update_generation;

    broadcast(
        &state,
        ServerMessage::Elements {
            elements,
            app_state: state.snapshot.app_state.clone(),
            version: state.version,
            source: None,
        },
        Some(subscriber_id),
    );

    drop(state);
    schedule_debounced_flush(engine.clone(), session.clone(), generation);
}

fn schedule_debounced_flush(engine: Arc<Engine>, session: Arc<Session>, generation: u64) {
    let delay = engine.update_debounce;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut state = session.state.lock().await;
        if state.update_generation != generation || state.flushed_generation == generation {
            return;
        }
        flush_pending_update(&engine, &session.id, &mut state).await;
    });
}

async fn flush_pending_update(engine: &Engine, session_id: &str, state: &mut crate::session::SessionState) {
    let op = Operation::Update {
        elements: state.snapshot.elements.clone(),
    };
    match engine.store.append_log(session_id, &op).await {
        Ok(()) => state.flushed_generation = state.update_generation,
        Err(e) => {
            log::error!(session = session_id, err = e.to_string(); "failed to flush debounced update, will retry on next mutation");
        }
    }
}

/// On close (§4.E step 4): flush any pending debounced append immediately,
/// remove the subscriber, and schedule idle eviction if the set is now
/// empty.
pub async fn disconnect(engine: &Arc<Engine>, session: &Arc<Session>, subscriber_id: SubscriberId) {
    let mut state = session.state.lock().await;
    state.subscribers.remove(&subscriber_id);

    if state.has_unflushed_update() {
        flush_pending_update(engine, &session.id, &mut state).await;
    }

    let now_empty = state.subscribers.is_empty();
    drop(state);

    if now_empty {
        engine.schedule_idle_eviction(session.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrawbridgeConfig;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn stale_update_is_rejected_without_broadcast() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(Engine::with_disabled_file_store(dir.path().to_path_buf(), &DrawbridgeConfig::default()));
        let session = engine.get_session("s4").await.unwrap();

        crate::mutation::append_elements(&engine, "s4", vec![json!({"id": "a"})]).await.unwrap();

        let (subscriber, mut rx) = connect(&session, 8).await;
        let _ = rx.try_recv();

        handle_update(&engine, &session, subscriber, vec![json!({"id": "x"})], Some(0)).await;

        let received = rx.try_recv().expect("correction message expected");
        match received {
            ServerMessage::Elements { source, version, .. } => {
                assert_eq!(source, Some("version-correction"));
                assert_eq!(version, 1);
            }
            _ => panic!("expected elements message"),
        }

        let state = session.state.lock().await;
        assert_eq!(state.snapshot.elements.len(), 1);
    }

    #[tokio::test]
    async fn accepted_update_is_not_echoed_to_originator() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(Engine::with_disabled_file_store(dir.path().to_path_buf(), &DrawbridgeConfig::default()));
        let session = engine.get_session("s3").await.unwrap();

        let (originator, mut originator_rx) = connect(&session, 8).await;
        let _ = originator_rx.try_recv();
        let (_other, mut other_rx) = connect(&session, 8).await;
        let _ = other_rx.try_recv();

        handle_update(&engine, &session, originator, vec![json!({"id": "y"})], None).await;

        assert!(originator_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn disconnect_flushes_pending_update_immediately() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(Engine::with_disabled_file_store(dir.path().to_path_buf(), &DrawbridgeConfig::default()));
        let session = engine.get_session("s7").await.unwrap();
        let (id, mut rx) = connect(&session, 8).await;
        let _ = rx.try_recv();

        handle_update(&engine, &session, id, vec![json!({"id": "z"})], None).await;
        disconnect(&engine, &session, id).await;

        let rebuilt = engine.store.load_session("s7").await.unwrap();
        assert_eq!(rebuilt.elements.len(), 1);
    }
}
