use crate::agent::InsightAgent;
use crate::analytics::AnalyticsSignal;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::server::AppState;
use crate::session::ChatSession;
use crate::upload::ContextDocument;
use chrono::Utc;
use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, info, warn, error };
use std::fmt::Display;
use std::net::SocketAddr;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{ tungstenite::protocol::Message, WebSocketStream };

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

/// Serializes and sends one message. Returns `false` once the peer is unreachable.
async fn send_message<K>(peer: SocketAddr, tx: &mut K, msg: &ServerMessage) -> bool
    where K: Sink<Message> + Unpin, K::Error: Display
{
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to encode message for {}: {}", peer, e);
            return true;
        }
    };
    match tx.send(Message::Text(json)).await {
        Ok(()) => true,
        Err(e) => {
            error!("Error sending message to {}: {}", peer, e);
            false
        }
    }
}

async fn handle_client_message<K>(
    peer: SocketAddr,
    client_msg: ClientMessage,
    agent: &InsightAgent,
    session: &mut ChatSession,
    tx: &mut K
) -> bool
    where K: Sink<Message> + Unpin, K::Error: Display
{
    match client_msg {
        ClientMessage::Chat { content } => {
            let mut turn = match agent.submit(session, &content) {
                Ok(turn) => turn,
                Err(e) => {
                    warn!("Rejected chat message from {}: {}", peer, e);
                    return send_message(peer, tx, &ServerMessage::error(e.to_string())).await;
                }
            };

            if !send_message(peer, tx, &ServerMessage::Processing).await {
                return false;
            }

            while let Some(event) = turn.next().await {
                session.apply(&event);
                let msg = ServerMessage::from_turn_event(event, Utc::now().timestamp());
                if !send_message(peer, tx, &msg).await {
                    return false;
                }
            }
            true
        }
        ClientMessage::Upload { name, content } => {
            match ContextDocument::from_upload(&name, content.as_bytes()) {
                Ok(document) => {
                    info!("{} attached context document '{}'", peer, document.name);
                    let name = document.name.clone();
                    let message = session
                        .attach_document(agent.prompt_config(), document)
                        .content.clone();
                    send_message(peer, tx, &ServerMessage::DocumentLoaded { name, message }).await
                }
                Err(e) => {
                    warn!("Rejected upload from {}: {}", peer, e);
                    send_message(peer, tx, &ServerMessage::error(e.to_string())).await
                }
            }
        }
        ClientMessage::DiscardDocument => {
            if let Some(document) = session.discard_document() {
                info!("{} discarded context document '{}'", peer, document.name);
            }
            send_message(peer, tx, &ServerMessage::DocumentCleared).await
        }
        ClientMessage::SelectCredential { api_key } => {
            agent.credentials().request_credential(Some(api_key)).await;
            send_message(peer, tx, &ServerMessage::CredentialSelected).await
        }
    }
}

/// Serves one client. Each connection owns its own chat session and credential
/// selection; messages on a connection are handled in order, so a turn always
/// finishes before the next chat message is read. Analytics resets are pushed to
/// every open connection.
pub async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>, state: AppState)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket connection: {}", peer);

    let (mut tx, mut rx) = websocket.split();
    let agent = state.agent.for_connection();
    let mut signals = state.analytics.lock().await.subscribe();
    let mut signals_open = true;
    let mut session = agent.new_session();
    info!("Assigned session ID {} to {}", session.id(), peer);

    if let Some(greeting) = session.messages().first() {
        let hello = ServerMessage::Response {
            content: greeting.content.clone(),
            timestamp: greeting.created_at.timestamp(),
        };
        if !send_message(peer, &mut tx, &hello).await {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = rx.next() => {
                let Some(msg) = msg else {
                    break;
                };
                match msg {
                    Ok(message) => {
                        if message.len() > MAX_MESSAGE_SIZE {
                            warn!(
                                "Message from {} exceeds size limit ({} > {})",
                                peer,
                                message.len(),
                                MAX_MESSAGE_SIZE
                            );
                            send_message(peer, &mut tx, &ServerMessage::error("Message too large")).await;
                            break;
                        }

                        match message {
                            Message::Text(text) => {
                                let keep_open = match serde_json::from_str::<ClientMessage>(&text) {
                                    Ok(client_msg) =>
                                        handle_client_message(
                                            peer,
                                            client_msg,
                                            &agent,
                                            &mut session,
                                            &mut tx
                                        ).await,
                                    Err(e) => {
                                        error!("Failed to parse message from {}: {}", peer, e);
                                        let error_msg = ServerMessage::error(
                                            format!("Failed to parse message: {}", e)
                                        );
                                        send_message(peer, &mut tx, &error_msg).await
                                    }
                                };
                                if !keep_open {
                                    break;
                                }
                            }
                            Message::Close(_) => {
                                info!("Received close frame from {}", peer);
                                break;
                            }
                            Message::Ping(ping_data) => {
                                if tx.send(Message::Pong(ping_data)).await.is_err() {
                                    error!("Failed to send pong to {}", peer);
                                    break;
                                }
                            }
                            Message::Pong(_) => {}
                            Message::Binary(_) => {
                                warn!("Ignoring binary message from {}", peer);
                            }
                            Message::Frame(_) => {}
                        }
                    }
                    Err(e) => {
                        match e {
                            | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            | tokio_tungstenite::tungstenite::Error::Protocol(_)
                            | tokio_tungstenite::tungstenite::Error::Utf8 => {
                                info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                            }
                            tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                                io_err.kind() == std::io::ErrorKind::ConnectionReset
                            => {
                                info!("WebSocket connection reset by peer {}", peer);
                            }
                            _ => {
                                error!("Error receiving message from {}: {}", peer, e);
                            }
                        }
                        break;
                    }
                }
            }
            signal = signals.recv(), if signals_open => {
                match signal {
                    Ok(AnalyticsSignal::ReloadRequired) => {
                        if !send_message(peer, &mut tx, &ServerMessage::AnalyticsReset).await {
                            break;
                        }
                    }
                    Ok(AnalyticsSignal::Changed) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // A missed signal may have been a reset.
                        debug!("{} missed {} analytics signal(s)", peer, skipped);
                        if !send_message(peer, &mut tx, &ServerMessage::AnalyticsReset).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        signals_open = false;
                    }
                }
            }
        }
    }
    info!("WebSocket connection closed for {} (Session ID: {})", peer, session.id());
}
