use crate::agent::{ ChatAgent, ChatError };
use crate::llm::ModelDescriptor;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::pipeline::{ ProgressSink, ProgressUpdate };

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::{ TcpListener, TcpStream };
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use chrono::Utc;
use futures::{ SinkExt, StreamExt };
use log::{ info, warn, error };
use uuid::Uuid;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap()));
}

pub async fn start_ws_server(
    addr: &str,
    agent: Arc<ChatAgent>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        if CONNECTION_LIMITER.check().is_err() {
            warn!("Connection rate limit exceeded, dropping {}", peer);
            continue;
        }
        let agent = agent.clone();
        tokio::spawn(async move {
            accept_connection(peer, stream, agent).await;
        });
    }
}

async fn accept_connection(peer: SocketAddr, stream: TcpStream, agent: Arc<ChatAgent>) {
    match accept_async(stream).await {
        Ok(ws) => handle_connection(peer, ws, agent).await,
        Err(e) => error!("WebSocket handshake with {} failed: {}", peer, e),
    }
}

type Outbox = mpsc::UnboundedSender<ServerMessage>;

fn send(outbox: &Outbox, message: ServerMessage) {
    if outbox.send(message).is_err() {
        warn!("Dropping message for a closed connection");
    }
}

fn progress_sink(outbox: Outbox) -> ProgressSink {
    Arc::new(move |update: ProgressUpdate| {
        send(&outbox, ServerMessage::Progress {
            percent: update.percent,
            message: update.message,
        });
    })
}

fn rejection_message(err: &ChatError) -> String {
    err.notice().unwrap_or_else(|| err.to_string())
}

async fn handle_connection(
    peer: SocketAddr,
    websocket: tokio_tungstenite::WebSocketStream<TcpStream>,
    agent: Arc<ChatAgent>
) {
    let connection_id = Uuid::new_v4();
    info!("New WebSocket connection {} from {}", connection_id, peer);

    let (mut tx, mut rx) = websocket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if let Err(e) = tx.send(Message::Text(json)).await {
                error!("Error sending message to {}: {}", peer, e);
                break;
            }
        }
    });

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(m) => m,
            Err(e) => {
                error!("Error receiving message from {}: {}", peer, e);
                break;
            }
        };
        if message.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds size limit ({} > {})",
                peer,
                message.len(),
                MAX_MESSAGE_SIZE
            );
            send(&outbox, ServerMessage::Error {
                message: "Message too large".to_string(),
            });
            break;
        }

        match message {
            Message::Text(text) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Chat { content }) => {
                        let agent = agent.clone();
                        let outbox = outbox.clone();
                        send(&outbox, ServerMessage::Processing);
                        tokio::spawn(async move {
                            match agent.submit(&content).await {
                                Ok(reply) =>
                                    send(&outbox, ServerMessage::Response {
                                        content: reply.content,
                                        timestamp: Utc::now().timestamp(),
                                    }),
                                Err(e) => {
                                    warn!("Chat request from {} rejected: {}", peer, e);
                                    send(&outbox, ServerMessage::Error {
                                        message: rejection_message(&e),
                                    });
                                }
                            }
                        });
                    }
                    Ok(ClientMessage::LoadModel { model, task }) => {
                        let descriptor = match task {
                            Some(task) => ModelDescriptor::new(model, task),
                            None => ModelDescriptor::detect(model),
                        };
                        let agent = agent.clone();
                        let outbox = outbox.clone();
                        tokio::spawn(async move {
                            let sink = progress_sink(outbox.clone());
                            match agent.load_model(descriptor, sink).await {
                                Ok(loaded) =>
                                    send(&outbox, ServerMessage::ModelReady {
                                        model: loaded.identifier,
                                        task: loaded.task_kind,
                                    }),
                                Err(e @ ChatError::ModelLoad { .. }) =>
                                    send(&outbox, ServerMessage::Response {
                                        content: rejection_message(&e),
                                        timestamp: Utc::now().timestamp(),
                                    }),
                                Err(e) =>
                                    send(&outbox, ServerMessage::Error {
                                        message: rejection_message(&e),
                                    }),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to parse message from {}: {}", peer, e);
                        send(&outbox, ServerMessage::Error {
                            message: format!("Failed to parse message: {}", e),
                        });
                    }
                }
            }
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Binary(_) => {
                warn!("Ignoring binary frame from {}", peer);
            }
            _ => {}
        }
    }

    drop(outbox);
    if let Err(e) = writer.await {
        error!("Writer task for {} ended abnormally: {}", peer, e);
    }
    info!("Connection {} from {} closed", connection_id, peer);
}
