use crate::pubsub::protocol::{ClientMessage, ErrorMessage, Event};
use crate::pubsub::{Topic, TopicRouter};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state for the WebSocket handler
#[derive(Clone)]
pub struct WsAppState {
    pub router: Arc<TopicRouter>,
}

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsAppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create WebSocket router
pub fn create_ws_router(state: WsAppState) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

/// Handle WebSocket connection lifecycle.
///
/// The connection owns one delivery channel; `join`/`leave` messages manage
/// its topic membership and the select loop forwards published events.
/// Disconnect leaves every topic.
async fn handle_socket(mut socket: WebSocket, state: Arc<WsAppState>) {
    let (subscriber_id, sender, mut events) = TopicRouter::subscriber();
    info!(subscriber = %subscriber_id, "WebSocket connection established");

    loop {
        tokio::select! {
            // Incoming client messages
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(error) =
                            handle_client_message(&state, subscriber_id, &sender, &text)
                        {
                            let reply = serde_json::to_string(&error)
                                .unwrap_or_else(|_| r#"{"type":"error"}"#.to_string());
                            if socket.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(subscriber = %subscriber_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            error!(error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, pong messages
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            // Events published to this subscriber's topics
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = send_event(&mut socket, event).await {
                            error!(error = %e, "Failed to deliver event");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.router.leave_all(subscriber_id);
    info!(subscriber = %subscriber_id, "WebSocket connection closed");
}

/// Handle a join/leave message. Returns an error message to send back to
/// the client when the message is malformed.
fn handle_client_message(
    state: &WsAppState,
    subscriber_id: crate::pubsub::SubscriberId,
    sender: &crate::pubsub::EventSender,
    text: &str,
) -> Option<ErrorMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Malformed client message");
            return Some(ErrorMessage::new(format!("malformed message: {}", e)));
        }
    };

    match msg {
        ClientMessage::Join { topic } => match Topic::parse(&topic) {
            Some(topic) => {
                info!(subscriber = %subscriber_id, topic = %topic, "Client joined topic");
                state.router.join(topic, subscriber_id, sender.clone());
                None
            }
            None => Some(ErrorMessage::new(format!("unknown topic '{}'", topic))),
        },
        ClientMessage::Leave { topic } => match Topic::parse(&topic) {
            Some(topic) => {
                info!(subscriber = %subscriber_id, topic = %topic, "Client left topic");
                state.router.leave(&topic, subscriber_id);
                None
            }
            None => Some(ErrorMessage::new(format!("unknown topic '{}'", topic))),
        },
    }
}

async fn send_event(socket: &mut WebSocket, event: Event) -> anyhow::Result<()> {
    let json = serde_json::to_string(&event)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}
