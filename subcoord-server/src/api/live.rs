use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use subcoord_core::entities::TransactionId;
use subcoord_core::hub::Observer;
use subcoord_core::intake::IntakeError;
use subcoord_sdk::objects::StatusSnapshot;
use subcoord_sdk::objects::ws::{WsClientMessage, WsCloseCode, WsServerMessage};

use crate::state::AppState;

/// `GET /live`: WebSocket status stream.
///
/// The client joins a transaction with a `join` message; the server
/// answers with the current snapshot and then pushes one snapshot per
/// committed transition. A new `join` replaces the previous one and
/// `leave` stops the stream without closing the socket.
pub(super) async fn live_status_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live_ws(socket, state))
}

/// Background task that drives a single WebSocket connection.
async fn handle_live_ws(mut socket: WebSocket, state: AppState) {
    let mut observer: Option<Observer> = None;

    loop {
        tokio::select! {
            update = next_update(&mut observer) => match update {
                Some(snapshot) => {
                    if send_json(&mut socket, &WsServerMessage::from(snapshot)).await.is_err() {
                        return;
                    }
                }
                // The hub went away; nothing more will arrive for this join.
                None => observer = None,
            },

            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<WsClientMessage>(text.as_str()) {
                        Ok(WsClientMessage::Join { transaction_id }) => {
                            // Unregister first so the old stream cannot interleave.
                            observer = None;
                            match join(&state, transaction_id).await {
                                Ok(joined) => {
                                    observer = Some(joined);
                                    None
                                }
                                Err(error) => Some(error),
                            }
                        }
                        Ok(WsClientMessage::Leave) => {
                            observer = None;
                            None
                        }
                        Err(_) => Some(WsServerMessage::Error {
                            code: WsCloseCode::BAD_MESSAGE,
                            reason: "invalid message".into(),
                        }),
                    };
                    if let Some(reply) = reply
                        && send_json(&mut socket, &reply).await.is_err()
                    {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn join(state: &AppState, transaction_id: String) -> Result<Observer, WsServerMessage> {
    let transaction_id = TransactionId::new(transaction_id);
    match state.intake().join(&transaction_id).await {
        Ok(observer) => {
            tracing::debug!(%transaction_id, "WS: joined");
            Ok(observer)
        }
        Err(IntakeError::UnknownTransaction(_)) => Err(WsServerMessage::Error {
            code: WsCloseCode::TRANSACTION_NOT_FOUND,
            reason: "transaction not found".into(),
        }),
        Err(e) => {
            tracing::error!(error = %e, %transaction_id, "WS: failed to join");
            Err(WsServerMessage::Error {
                code: WsCloseCode::INTERNAL_ERROR,
                reason: "internal error".into(),
            })
        }
    }
}

async fn next_update(observer: &mut Option<Observer>) -> Option<StatusSnapshot> {
    match observer {
        Some(observer) => observer.recv().await,
        None => std::future::pending().await,
    }
}

/// Serialize `value` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
