use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use crate::event::ClientEvent;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle and application events reported by the channel task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    ConnectError(String),
    ReconnectAttempt(u32),
    Reconnected,
    ReconnectFailed,
    ChatResponse {
        pdf_id: String,
        response: String,
        timestamp: String,
    },
    ServerError {
        message: String,
    },
}

/// Outgoing application events, serialized as `{"event", "data"}`
/// envelopes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutgoingEvent {
    Join { pdf_id: String },
    ChatMessage { pdf_id: String, message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum IncomingEvent {
    ChatResponse {
        pdf_id: String,
        response: String,
        #[serde(default)]
        timestamp: String,
    },
    Error {
        message: String,
    },
    RoomJoined {
        pdf_id: String,
    },
    ConnectionStatus {
        status: String,
    },
}

/// Send half of an open channel. The UI owns one per attached document
/// and must call `disconnect` exactly once on teardown.
pub trait ChatSink: Send {
    fn emit(&self, event: OutgoingEvent) -> Result<()>;
    fn disconnect(&self);
}

/// Capability to open a channel. The websocket implementation lives
/// below; tests substitute a recording double.
pub trait ChannelConnector: Send {
    fn connect(
        &self,
        generation: u64,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Box<dyn ChatSink>;
}

pub struct WsConnector {
    ws_url: String,
}

impl WsConnector {
    pub fn new(server_url: &str) -> Self {
        let base = server_url.trim_end_matches('/');
        let ws_url = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}/socket.io", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}/socket.io", rest)
        } else {
            format!("ws://{}/socket.io", base)
        };
        Self { ws_url }
    }
}

impl ChannelConnector for WsConnector {
    fn connect(
        &self,
        generation: u64,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Box<dyn ChatSink> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(self.ws_url.clone(), generation, events, cmd_rx));
        Box::new(WsChannel { cmd_tx, task })
    }
}

enum Command {
    Emit(OutgoingEvent),
    Shutdown,
}

struct WsChannel {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatSink for WsChannel {
    fn emit(&self, event: OutgoingEvent) -> Result<()> {
        self.cmd_tx
            .send(Command::Emit(event))
            .map_err(|_| anyhow!("channel task has stopped"))
    }

    fn disconnect(&self) {
        // Ask for a clean close, then make sure the task cannot outlive
        // the teardown even if it is mid-handshake.
        let _ = self.cmd_tx.send(Command::Shutdown);
        self.task.abort();
    }
}

enum SessionEnd {
    Shutdown,
    Dropped,
}

async fn run_channel(
    ws_url: String,
    generation: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let send = |event: ChannelEvent| {
        let _ = events.send(ClientEvent::Channel { generation, event });
    };

    let mut attempt: u32 = 0;
    loop {
        match connect_async(&ws_url).await {
            Ok((stream, _)) => {
                info!("[channel] connected to {}", ws_url);
                if attempt > 0 {
                    send(ChannelEvent::Reconnected);
                }
                attempt = 0;
                send(ChannelEvent::Connected);

                match run_session(stream, &send, &mut cmd_rx).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Dropped => send(ChannelEvent::Disconnected),
                }
            }
            Err(e) => {
                warn!("[channel] connect to {} failed: {}", ws_url, e);
                send(ChannelEvent::ConnectError(e.to_string()));
            }
        }

        attempt += 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            warn!("[channel] giving up after {} attempts", MAX_RECONNECT_ATTEMPTS);
            send(ChannelEvent::ReconnectFailed);
            return;
        }
        send(ChannelEvent::ReconnectAttempt(attempt));

        let backoff = tokio::time::sleep(RECONNECT_DELAY);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => return,
                    Some(Command::Emit(ev)) => {
                        debug!("[channel] dropping emit while disconnected: {:?}", ev);
                    }
                },
            }
        }
    }
}

async fn run_session(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    send: &(dyn Fn(ChannelEvent) + Send + Sync),
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Emit(ev)) => {
                    let text = match serde_json::to_string(&ev) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("[channel] could not encode {:?}: {}", ev, e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                        warn!("[channel] send failed: {}", e);
                        return SessionEnd::Dropped;
                    }
                }
                Some(Command::Shutdown) | None => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            },
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_tx.send(WsMessage::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return SessionEnd::Dropped,
                    Some(Err(e)) => {
                        warn!("[channel] socket error: {}", e);
                        return SessionEnd::Dropped;
                    }
                    _ => continue,
                };
                handle_frame(&text, send);
            },
            _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                let _ = ws_tx.send(WsMessage::Ping(Vec::new())).await;
            }
        }
    }
}

fn handle_frame<F: Fn(ChannelEvent) + ?Sized>(text: &str, send: &F) {
    match serde_json::from_str::<IncomingEvent>(text) {
        Ok(IncomingEvent::ChatResponse {
            pdf_id,
            response,
            timestamp,
        }) => send(ChannelEvent::ChatResponse {
            pdf_id,
            response,
            timestamp,
        }),
        Ok(IncomingEvent::Error { message }) => send(ChannelEvent::ServerError { message }),
        Ok(IncomingEvent::RoomJoined { pdf_id }) => {
            debug!("[channel] joined room for {}", pdf_id);
        }
        Ok(IncomingEvent::ConnectionStatus { status }) => {
            debug!("[channel] server connection status: {}", status);
        }
        Err(_) => debug!("[channel] ignoring unrecognized frame: {}", text),
    }
}
