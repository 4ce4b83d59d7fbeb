//! Lease streams over WebSocket.
//!
//! `GET /lease` upgrades to a WebSocket that is one lease stream. Every text
//! or binary frame carries one [`LeaseFrame`]; a granted acquire or renew is
//! answered with `{}`. A refused request is answered with its error and the
//! socket is closed. Leases held by a socket are released when it closes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use ftl_runtime::lease::join_key;
use serde::{Deserialize, Serialize};

use crate::error::kind_code;
use crate::server::AppState;

/// One acquire or renew request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LeaseFrame {
    /// Key path.
    pub key: Vec<String>,
    /// Requested time to live in milliseconds.
    pub ttl_millis: u64,
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRefusal {
    /// Error code, e.g. `RESOURCE_EXHAUSTED`.
    pub code: String,
    /// Human-readable reason.
    pub message: String,
}

/// Reply to one [`LeaseFrame`]. Empty when the lease was granted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseReply {
    /// Set when the request was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LeaseRefusal>,
}

/// `GET /lease`.
pub async fn lease_stream(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

fn answer(session: &mut ftl_runtime::lease::LeaseSession, payload: &[u8]) -> LeaseReply {
    let outcome = serde_json::from_slice::<LeaseFrame>(payload)
        .map_err(|e| ftl_runtime::Error::invalid(format!("lease request: {e}")))
        .and_then(|frame| {
            session
                .acquire(&frame.key, Duration::from_millis(frame.ttl_millis))
                .inspect_err(|e| {
                    tracing::debug!(key = %join_key(&frame.key), error = %e, "lease refused");
                })
        });
    match outcome {
        Ok(()) => LeaseReply::default(),
        Err(err) => LeaseReply {
            error: Some(LeaseRefusal {
                code: kind_code(err.kind()).to_string(),
                message: err.to_string(),
            }),
        },
    }
}

async fn serve_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut session = state.leases.session();
    loop {
        let frame = tokio::select! {
            () = state.shutdown.cancelled() => break,
            frame = socket.recv() => frame,
        };
        let payload = match frame {
            Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(error)) => {
                tracing::debug!(%error, "lease socket failed");
                break;
            }
        };
        let reply = answer(&mut session, &payload);
        let refused = reply.error.is_some();
        let Ok(text) = serde_json::to_string(&reply) else {
            break;
        };
        if socket.send(Message::Text(text.into())).await.is_err() || refused {
            break;
        }
    }
    let held = session.keys().count();
    drop(session);
    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!(released = held, "lease socket closed");
}
