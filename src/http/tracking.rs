//! `/ws/tracking/{client_id}` — one session per connection, registered
//! under the path's `client_id` so the tracking consumer can fan out to
//! exactly the sessions that belong to that client.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tokio::sync::mpsc::unbounded_channel;

use super::AppState;

pub async fn ws_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(mut socket: WebSocket, client_id: String, state: AppState) {
    let (tx, mut rx) = unbounded_channel::<String>();
    state.hub.register(client_id.clone(), tx).await;

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Clients don't send anything meaningful; the channel
                    // exists purely for tracking push notifications.
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    state.hub.prune(&client_id).await;
}
