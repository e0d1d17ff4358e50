//! Bidirectional socket transport adapter (§4.G, §6): upgrade path
//! `GET /ws/:sessionId`. Trivial routing onto the subscriber fan-out in
//! `subscriber.rs` — no protocol logic lives here beyond frame decode/encode.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rocket::State;
use rocket_ws::{Message, WebSocket};

use crate::engine::Engine;
use crate::messages::ClientMessage;
use crate::subscriber;

#[get("/ws/<session_id>")]
pub fn connect(session_id: String, ws: WebSocket, engine: &State<Arc<Engine>>) -> rocket_ws::Channel<'static> {
    let engine = (*engine).clone();
    ws.channel(move |stream| {
        Box::pin(async move {
            let session = match engine.get_session(&session_id).await {
                Ok(session) => session,
                Err(e) => {
                    log::error!(session = session_id.as_str(), err = e.to_string(); "failed to load session for websocket connect");
                    return Ok(());
                }
            };

            let (mut sink, mut stream) = stream.split();
            let (subscriber_id, mut outbound) = subscriber::connect(&session, engine.subscriber_queue_depth).await;

            loop {
                tokio::select! {
                    message = outbound.recv() => {
                        let Some(message) = message else { break };
                        let Ok(frame) = message.to_frame() else { continue };
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    frame = stream.next() => {
                        let Some(frame) = frame else { break };
                        let Ok(frame) = frame else { break };
                        match frame {
                            Message::Text(text) => {
                                match serde_json::from_str::<ClientMessage>(&text) {
                                    Ok(ClientMessage::Update { elements, base_version }) => {
                                        subscriber::handle_update(&engine, &session, subscriber_id, elements, base_version).await;
                                    }
                                    Err(e) => {
                                        log::warn!(session = session_id.as_str(), err = e.to_string(); "dropping malformed client frame");
                                    }
                                }
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                }
            }

            subscriber::disconnect(&engine, &session, subscriber_id).await;
            Ok(())
        })
    })
}
