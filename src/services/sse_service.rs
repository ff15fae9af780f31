use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    services::{session_reader, sse_events},
    state::SharedState,
};

const HANDSHAKE_EVENT: &str = "handshake";

/// Subscribe to the session event stream.
pub fn subscribe(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    state.sse().subscribe()
}

/// Greet a freshly connected stream with the client's status, followed by the cached
/// snapshot when one exists.
pub async fn broadcast_handshake(state: &SharedState) {
    let identity = state.identity().await;
    let payload = Handshake {
        stream: "session".into(),
        message: "subscribed to session events".into(),
        degraded: state.is_degraded(),
        session_id: identity.as_ref().map(|identity| identity.session_id.clone()),
    };
    if let Ok(event) = ServerEvent::json(Some(HANDSHAKE_EVENT.to_string()), &payload) {
        state.sse().broadcast(event);
    }

    if let (Some(identity), Some(snapshot)) = (identity, state.snapshot().await) {
        let view = session_reader::view_of(state, &identity, &snapshot);
        sse_events::broadcast_snapshot(state, &view);
    }
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the client
/// disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // The next snapshot supersedes whatever was dropped.
                            debug!(skipped, "session SSE stream lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!("Session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Relay degraded-mode changes onto the session stream for as long as the state lives.
pub async fn forward_system_status(state: SharedState) {
    let mut watcher = state.degraded_watcher();
    while watcher.changed().await.is_ok() {
        let degraded = *watcher.borrow_and_update();
        sse_events::broadcast_system_status(&state, degraded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, state::AppState};

    #[tokio::test]
    async fn handshake_reports_degraded_client_without_session() {
        let state = AppState::new(EngineConfig::default());
        let mut receiver = subscribe(&state);

        broadcast_handshake(&state).await;

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(HANDSHAKE_EVENT));
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["degraded"], true);
        assert!(data.get("session_id").is_none());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn degraded_changes_are_forwarded() {
        let state = AppState::new(EngineConfig::default());
        let mut receiver = subscribe(&state);
        let forwarder = tokio::spawn(forward_system_status(state.clone()));
        tokio::task::yield_now().await;

        state.update_degraded(false);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(sse_events::EVENT_SYSTEM_STATUS));
        assert_eq!(event.data, r#"{"degraded":false}"#);
        forwarder.abort();
    }
}
