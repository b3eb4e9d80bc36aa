//! Tokio driver for [`ChatLifecycle`].
//!
//! Interprets the effects the state machine emits: opens the WebSocket,
//! arms the heartbeat and reconnect timers, and forwards transcript
//! entries to the embedding application.

use futures_util::{SinkExt, StreamExt};
use relay_common::{ClientEnvelope, ServerEnvelope};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::lifecycle::{ChatLifecycle, Effect, Event, TranscriptOrigin, HEARTBEAT_INTERVAL};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("command channel closed")]
    CommandChannelClosed,
}

/// Instructions from the embedding application.
#[derive(Debug)]
pub enum WidgetCommand {
    /// Open the chat connection.
    OpenChat,
    /// Send visitor text.
    Send(String),
    /// The session cookie changed; recycle the connection.
    SignedIn,
    /// Close the connection and stop the runner.
    Teardown,
}

/// A transcript entry surfaced to the embedding application.
#[derive(Debug)]
pub struct TranscriptEntry {
    pub origin: TranscriptOrigin,
    pub text: String,
}

/// Drives a [`ChatLifecycle`] against a live relay endpoint.
pub struct Runner {
    url: String,
    /// Session cookie to present on the handshake, if signed in.
    cookie: Option<String>,
    lifecycle: ChatLifecycle,
    commands: mpsc::UnboundedReceiver<WidgetCommand>,
    transcript: mpsc::UnboundedSender<TranscriptEntry>,
    ws: Option<WsStream>,
    heartbeat: Option<tokio::time::Interval>,
    reconnect_at: Option<tokio::time::Instant>,
}

impl Runner {
    pub fn new(
        url: impl Into<String>,
        client_id: impl Into<String>,
        commands: mpsc::UnboundedReceiver<WidgetCommand>,
        transcript: mpsc::UnboundedSender<TranscriptEntry>,
    ) -> Self {
        Self {
            url: url.into(),
            cookie: None,
            lifecycle: ChatLifecycle::new(client_id),
            commands,
            transcript,
            ws: None,
            heartbeat: None,
            reconnect_at: None,
        }
    }

    /// Present this cookie on future handshakes.
    pub fn set_cookie(&mut self, cookie: impl Into<String>) {
        self.cookie = Some(cookie.into());
    }

    /// Run until [`WidgetCommand::Teardown`] or the command channel closes.
    pub async fn run(mut self) -> Result<(), WidgetError> {
        loop {
            let heartbeat_tick = async {
                match self.heartbeat.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending().await,
                }
            };
            let reconnect_tick = async {
                match self.reconnect_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let inbound = async {
                match self.ws.as_mut() {
                    Some(ws) => ws.next().await,
                    None => std::future::pending().await,
                }
            };

            let events = tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Embedder dropped the handle; shut the link down.
                        self.apply(vec![Event::TeardownRequested]).await?;
                        return Err(WidgetError::CommandChannelClosed);
                    };
                    match command {
                        WidgetCommand::OpenChat => vec![Event::ConnectRequested],
                        WidgetCommand::Send(text) => vec![Event::SendRequested(text)],
                        WidgetCommand::SignedIn => vec![Event::SignedIn],
                        WidgetCommand::Teardown => {
                            self.apply(vec![Event::TeardownRequested]).await?;
                            return Ok(());
                        }
                    }
                }
                _ = heartbeat_tick => vec![Event::HeartbeatTick],
                _ = reconnect_tick => {
                    self.reconnect_at = None;
                    vec![Event::ReconnectTick]
                }
                frame = inbound => self.translate_frame(frame),
            };

            self.apply(events).await?;
        }
    }

    /// Map a raw WebSocket frame to lifecycle events.
    fn translate_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Vec<Event> {
        match frame {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEnvelope>(&text) {
                Ok(envelope) => vec![Event::Received(envelope)],
                Err(err) => {
                    warn!("discarding unparseable server frame: {err}");
                    vec![]
                }
            },
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "server closed the connection");
                self.ws = None;
                vec![Event::TransportClosed { initiated: false }]
            }
            Some(Ok(_)) => vec![],
            Some(Err(err)) => {
                warn!("websocket read error: {err}");
                self.ws = None;
                vec![
                    Event::TransportError,
                    Event::TransportClosed { initiated: false },
                ]
            }
            None => {
                self.ws = None;
                vec![Event::TransportClosed { initiated: false }]
            }
        }
    }

    /// Feed events through the lifecycle and carry out the effects. Effects
    /// can produce follow-up events (a failed open closes the transport), so
    /// this drains a queue rather than recursing.
    async fn apply(&mut self, events: Vec<Event>) -> Result<(), WidgetError> {
        let mut queue: std::collections::VecDeque<Event> = events.into();
        while let Some(event) = queue.pop_front() {
            for effect in self.lifecycle.handle(event) {
                match effect {
                    Effect::OpenTransport => match self.connect().await {
                        Ok(ws) => {
                            self.ws = Some(ws);
                            queue.push_back(Event::TransportOpened);
                        }
                        Err(err) => {
                            warn!("failed to open relay connection: {err}");
                            queue.push_back(Event::TransportClosed { initiated: false });
                        }
                    },
                    Effect::CloseTransport => {
                        if let Some(mut ws) = self.ws.take() {
                            if let Err(err) = ws.close(None).await {
                                debug!("error closing websocket: {err}");
                            }
                        }
                        queue.push_back(Event::TransportClosed { initiated: true });
                    }
                    Effect::Send(envelope) => {
                        let is_init = matches!(envelope, ClientEnvelope::Init { .. });
                        if self.send(&envelope).await && is_init {
                            queue.push_back(Event::InitFlushed);
                        }
                    }
                    Effect::StartHeartbeat => {
                        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
                        interval.set_missed_tick_behavior(
                            tokio::time::MissedTickBehavior::Delay,
                        );
                        // The first tick fires immediately; swallow it.
                        interval.reset();
                        self.heartbeat = Some(interval);
                    }
                    Effect::CancelTimers => {
                        self.heartbeat = None;
                        self.reconnect_at = None;
                    }
                    Effect::ScheduleReconnect(delay) => {
                        self.reconnect_at = Some(tokio::time::Instant::now() + delay);
                    }
                    Effect::Append { origin, text } => {
                        // The embedder may have gone away; that only matters
                        // if it also dropped the command channel.
                        let _ = self.transcript.send(TranscriptEntry { origin, text });
                    }
                }
            }
        }
        Ok(())
    }

    async fn connect(&self) -> Result<WsStream, WidgetError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|_| WidgetError::InvalidUrl(self.url.clone()))?;
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|_| WidgetError::InvalidUrl(self.url.clone()))?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (ws, _) = connect_async(request).await?;
        Ok(ws)
    }

    /// Hand an envelope to the transport. Returns whether it was accepted.
    async fn send(&mut self, envelope: &ClientEnvelope) -> bool {
        let Some(ws) = self.ws.as_mut() else {
            debug!("dropping outbound envelope, transport not open");
            return false;
        };
        match serde_json::to_string(envelope) {
            Ok(json) => match ws.send(Message::text(json)).await {
                Ok(()) => true,
                Err(err) => {
                    warn!("websocket send failed: {err}");
                    false
                }
            },
            Err(err) => {
                warn!("failed to serialize envelope: {err}");
                false
            }
        }
    }
}

/// Spawn a runner on the current tokio runtime, returning the command and
/// transcript channel endpoints.
pub fn spawn(
    url: impl Into<String>,
    client_id: impl Into<String>,
) -> (
    mpsc::UnboundedSender<WidgetCommand>,
    mpsc::UnboundedReceiver<TranscriptEntry>,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
    let runner = Runner::new(url, client_id, command_rx, transcript_tx);
    tokio::spawn(async move {
        if let Err(err) = runner.run().await {
            debug!("widget runner stopped: {err}");
        }
    });
    (command_tx, transcript_rx)
}
