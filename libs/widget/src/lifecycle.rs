//! Connection lifecycle state machine.
//!
//! Pure event-in, effects-out: the caller feeds [`Event`]s and interprets the
//! returned [`Effect`]s (open/close the transport, arm or cancel timers,
//! append transcript entries). Keeping the machine free of IO makes every
//! transition unit-testable, including the reconnect storm and the timer
//! hygiene on teardown.

use std::time::Duration;

use relay_common::envelope::HEARTBEAT_INTERVAL_MS;
use relay_common::{ClientEnvelope, ServerEnvelope};

/// Interval between heartbeat envelopes once the connection is ready.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(HEARTBEAT_INTERVAL_MS);

/// Fixed delay before a reconnection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Unsolicited closures tolerated before giving up with a terminal notice.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Notice surfaced when the retry budget is exhausted.
pub const CONNECTION_LOST_NOTICE: &str = "Connection lost. Please refresh the page.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    /// Transport is open; the `init` envelope is on its way out but has not
    /// been flushed yet. Sends stay locally rejected until `Ready`.
    Open,
    Ready,
    Closed,
    Reconnecting,
}

/// Where a transcript entry came from, for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptOrigin {
    /// Bot or staff text.
    Support,
    /// Echo of the visitor's own accepted message.
    OwnEcho,
    /// Error/status notices.
    System,
}

#[derive(Debug)]
pub enum Event {
    /// The visitor opened the chat panel (or anything else needing a link).
    ConnectRequested,
    TransportOpened,
    /// The `init` envelope was handed to the transport.
    InitFlushed,
    /// `initiated` is true when we asked for the closure ourselves.
    TransportClosed { initiated: bool },
    TransportError,
    HeartbeatTick,
    ReconnectTick,
    /// Visitor typed a message and hit send.
    SendRequested(String),
    Received(ServerEnvelope),
    /// External sign-in completed; the session cookie changed.
    SignedIn,
    /// Explicit teardown (logout, widget closed).
    TeardownRequested,
}

#[derive(Debug, PartialEq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    Send(ClientEnvelope),
    StartHeartbeat,
    /// Cancel both the heartbeat and any pending reconnect timer.
    CancelTimers,
    ScheduleReconnect(Duration),
    Append {
        origin: TranscriptOrigin,
        text: String,
    },
}

/// The widget's connection state machine.
pub struct ChatLifecycle {
    state: LifecycleState,
    client_id: String,
    reconnect_attempts: u32,
    /// Set when a deliberate close should be followed by a fresh connect
    /// (re-authentication: the new cookie only rides a new handshake).
    reopen_after_close: bool,
    /// Set on explicit teardown so the trailing close event lands in `Idle`.
    tearing_down: bool,
}

impl ChatLifecycle {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            state: LifecycleState::Idle,
            client_id: client_id.into(),
            reconnect_attempts: 0,
            reopen_after_close: false,
            tearing_down: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Feed one event, returning the effects the caller must carry out.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        use LifecycleState::*;

        match event {
            Event::ConnectRequested => match self.state {
                Idle | Closed => {
                    // A teardown with no live transport never sees its
                    // trailing close; clear the flag here.
                    self.tearing_down = false;
                    self.state = Connecting;
                    vec![Effect::OpenTransport]
                }
                // An attempt is already in flight (or the link is live);
                // a second one is suppressed.
                Connecting | Open | Ready | Reconnecting => vec![],
            },

            Event::TransportOpened => match self.state {
                Connecting | Reconnecting => {
                    // Bind the persisted client id before anything else.
                    self.state = Open;
                    self.reconnect_attempts = 0;
                    vec![Effect::Send(ClientEnvelope::Init {
                        client_id: self.client_id.clone(),
                    })]
                }
                _ => vec![],
            },

            Event::InitFlushed => match self.state {
                Open => {
                    // The heartbeat keeps the link alive through proxies.
                    self.state = Ready;
                    vec![Effect::StartHeartbeat]
                }
                _ => vec![],
            },

            Event::HeartbeatTick => match self.state {
                Ready => vec![Effect::Send(ClientEnvelope::Heartbeat)],
                _ => vec![],
            },

            Event::SendRequested(text) => match self.state {
                Ready => vec![Effect::Send(ClientEnvelope::Message { message: text })],
                // Rejected locally; nothing goes on the wire.
                _ => vec![],
            },

            Event::Received(envelope) => self.dispatch_received(envelope),

            Event::TransportClosed { initiated } => {
                let was_tearing_down = self.tearing_down;
                self.tearing_down = false;

                if initiated && self.reopen_after_close {
                    // Re-auth cycle: immediately reopen with the new cookie.
                    self.reopen_after_close = false;
                    self.reconnect_attempts = 0;
                    self.state = Connecting;
                    return vec![Effect::CancelTimers, Effect::OpenTransport];
                }

                if initiated || was_tearing_down {
                    self.reconnect_attempts = 0;
                    self.state = if was_tearing_down { Idle } else { Closed };
                    return vec![Effect::CancelTimers];
                }

                // Unsolicited closure: retry on a fixed delay, bounded.
                self.state = Closed;
                self.reconnect_attempts += 1;
                if self.reconnect_attempts <= MAX_RECONNECT_ATTEMPTS {
                    self.state = Reconnecting;
                    vec![
                        Effect::CancelTimers,
                        Effect::ScheduleReconnect(RECONNECT_DELAY),
                    ]
                } else {
                    vec![
                        Effect::CancelTimers,
                        Effect::Append {
                            origin: TranscriptOrigin::System,
                            text: CONNECTION_LOST_NOTICE.to_string(),
                        },
                    ]
                }
            }

            Event::TransportError => vec![Effect::Append {
                origin: TranscriptOrigin::System,
                text: "Connection error. Please try again later.".to_string(),
            }],

            Event::ReconnectTick => match self.state {
                Reconnecting => {
                    self.state = Connecting;
                    vec![Effect::OpenTransport]
                }
                _ => vec![],
            },

            Event::SignedIn => match self.state {
                Idle | Closed => {
                    self.state = Connecting;
                    vec![Effect::OpenTransport]
                }
                // Sessions are bound at connect time, not re-checked
                // mid-connection: tear down and reopen so the fresh cookie
                // is presented on the new handshake.
                Connecting | Open | Ready | Reconnecting => {
                    self.reopen_after_close = true;
                    vec![Effect::CancelTimers, Effect::CloseTransport]
                }
            },

            Event::TeardownRequested => {
                self.reopen_after_close = false;
                self.reconnect_attempts = 0;
                match self.state {
                    Idle | Closed => {
                        self.state = Idle;
                        vec![Effect::CancelTimers]
                    }
                    _ => {
                        self.tearing_down = true;
                        self.state = Idle;
                        vec![Effect::CancelTimers, Effect::CloseTransport]
                    }
                }
            }
        }
    }

    fn dispatch_received(&mut self, envelope: ServerEnvelope) -> Vec<Effect> {
        if self.state != LifecycleState::Ready {
            return vec![];
        }
        let (origin, text) = match envelope {
            ServerEnvelope::Message { message, .. } => (TranscriptOrigin::Support, message),
            ServerEnvelope::MessageSent { message } => (TranscriptOrigin::OwnEcho, message),
            ServerEnvelope::Error { message } | ServerEnvelope::Status { message } => {
                (TranscriptOrigin::System, message)
            }
        };
        vec![Effect::Append { origin, text }]
    }
}
