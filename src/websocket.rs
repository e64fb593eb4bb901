//! # WebSocket Voice Session Handler
//!
//! Handles the realtime voice-assistant channel. Clients connect to
//! `/ws/speak?userId=<id>` and exchange JSON envelopes with the bridge, which
//! multiplexes the channel against one backend speech session per connection.
//!
//! ## Channel Protocol:
//! 1. **Connection**: client connects with a `userId` query parameter
//! 2. **Context**: the bridge assembles the user's context bundle and opens
//!    the backend session seeded with it
//! 3. **Ready**: once the backend acknowledges, the client receives `ready`
//! 4. **Streaming**: client `audio`/`text` envelopes are forwarded upstream;
//!    backend audio, text, and turn signals are relayed back unmodified
//! 5. **Teardown**: on either side closing, the backend session is released
//!    first, then the channel
//!
//! ## Message Format:
//! - **Client → Server**: `{"type":"audio","data":"<base64>"}` or
//!   `{"type":"text","data":"..."}`
//! - **Server → Client**: `ready`, `audio`, `text`, `turnComplete`,
//!   `interrupted`, `error`, `sessionClosed` envelopes

use crate::config::AppConfig;
use crate::live::{LiveEvent, LiveHandle};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{Session, SessionPhase};
use crate::state::AppState;
use crate::storage;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// WebSocket actor for one voice session.
///
/// ## Actor Model:
/// Each connection is an independent actor. The backend socket lives on a
/// spawned task; it talks back to the actor through the internal messages
/// below, so all channel writes happen on the actor context.
pub struct SpeakWebSocket {
    /// Owner of the channel, from the `userId` query parameter
    user_id: Option<String>,

    /// Session record held in the shared manager
    session: Option<Arc<Session>>,

    /// Input handle to the backend session, present once setup completed
    live: Option<LiveHandle>,

    /// Shared application state (manager, context store, metrics)
    state: web::Data<AppState>,

    /// Configuration snapshot taken at connection time
    config: AppConfig,

    /// Last heartbeat time
    last_heartbeat: Instant,
}

impl SpeakWebSocket {
    pub fn new(user_id: Option<String>, state: web::Data<AppState>) -> Self {
        let config = state.get_config();
        Self {
            user_id,
            session: None,
            live: None,
            state,
            config,
            last_heartbeat: Instant::now(),
        }
    }

    /// Serialize and send one server envelope on the channel.
    fn send_server(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("failed to encode server envelope: {}", err),
        }
    }

    /// Forward one parsed client envelope to the backend session.
    ///
    /// Input arriving before the backend is ready, or after it ended, is
    /// dropped silently; transient gaps must not produce client errors.
    fn forward_client_message(&mut self, message: ClientMessage) {
        let live = match &self.live {
            Some(live) => live,
            None => {
                debug!("dropping client input, backend session not active");
                return;
            }
        };

        match message {
            ClientMessage::Audio { data } => {
                if live.send_audio(data) {
                    self.note_phase(SessionPhase::Listening);
                    if let Some(session) = &self.session {
                        session.record_frame_forwarded();
                    }
                    self.state.record_frame_forwarded();
                } else {
                    debug!("dropping audio frame, backend session ended");
                }
            }
            ClientMessage::Text { data } => {
                if !live.send_text(data) {
                    debug!("dropping text turn, backend session ended");
                }
            }
        }
    }

    /// Track the coarse conversation phase on the server record, for the
    /// health surface. Traffic that does not fit the current phase (audio
    /// while already listening) is normal and leaves it unchanged; the client
    /// machine remains the authority on observable state.
    fn note_phase(&self, next: SessionPhase) {
        if let Some(session) = &self.session {
            if session.phase() != next && session.phase().can_transition_to(next) {
                let _ = session.transition(next);
            }
        }
    }

    /// Release the backend session. The backend always goes first on any
    /// teardown path; repeat calls are no-ops.
    fn teardown_backend(&mut self) {
        if let Some(live) = self.live.take() {
            live.close();
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = Duration::from_secs(self.config.session.heartbeat_interval_seconds);
        let client_timeout = Duration::from_secs(self.config.session.client_timeout_seconds);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!("WebSocket heartbeat timeout, closing connection");
                act.teardown_backend();
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

/// Backend session established; carries the input handle and event stream.
#[derive(Message)]
#[rtype(result = "()")]
struct BackendConnected {
    handle: LiveHandle,
    events: mpsc::UnboundedReceiver<LiveEvent>,
}

/// Backend session could not be opened.
#[derive(Message)]
#[rtype(result = "()")]
struct BackendFailed {
    detail: String,
}

/// One event from the backend session pump.
#[derive(Message)]
#[rtype(result = "()")]
struct BackendEvent(LiveEvent);

impl Actor for SpeakWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts: validate the caller,
    /// register the session, and open the backend session off-thread.
    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);

        let user_id = match &self.user_id {
            Some(id) => id.clone(),
            None => {
                self.send_server(
                    ctx,
                    &ServerMessage::Error {
                        message: "Missing userId".to_string(),
                    },
                );
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: Some("Missing userId".to_string()),
                }));
                ctx.stop();
                return;
            }
        };

        let session = match self.state.session_manager.create_session(&user_id) {
            Ok(session) => session,
            Err(err) => {
                warn!(user_id = %user_id, "voice session rejected: {}", err);
                self.send_server(
                    ctx,
                    &ServerMessage::Error {
                        message: err.to_string(),
                    },
                );
                ctx.close(None);
                ctx.stop();
                return;
            }
        };

        info!(
            session_id = %session.session_id,
            user_id = %user_id,
            "voice session opened"
        );
        self.state.increment_active_sessions();
        self.session = Some(Arc::clone(&session));

        // Context resolution and the backend handshake are slow; run them off
        // the actor and report back through internal messages.
        let store = Arc::clone(&self.state.context_store);
        let live_config = self.config.live.clone();
        let reflection_limit = self.config.context_service.reflection_limit;
        let addr = ctx.address();

        tokio::spawn(async move {
            let bundle = storage::build_context_bundle(store.as_ref(), &user_id).await;
            let instruction = bundle.system_instruction(reflection_limit);

            match crate::live::connect(&live_config, Some(instruction)).await {
                Ok((handle, events)) => addr.do_send(BackendConnected { handle, events }),
                Err(err) => addr.do_send(BackendFailed {
                    detail: err.to_string(),
                }),
            }
        });
    }

    /// Called when the connection stops, on every exit path.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.teardown_backend();

        if let Some(session) = self.session.take() {
            self.state.session_manager.remove_session(&session.session_id);
            self.state.decrement_active_sessions();
            info!(
                session_id = %session.session_id,
                frames_forwarded = session.frames_forwarded(),
                events_relayed = session.events_relayed(),
                "voice session closed"
            );
        }
    }
}

/// Handle incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SpeakWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.forward_client_message(message),
                Err(err) => warn!("ignoring malformed client envelope: {}", err),
            },
            Ok(ws::Message::Binary(_)) => {
                warn!("ignoring binary frame, the channel protocol is JSON envelopes only");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("client closed the channel: {:?}", reason);
                self.teardown_backend();
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                self.teardown_backend();
                ctx.stop();
            }
        }
    }
}

impl Handler<BackendConnected> for SpeakWebSocket {
    type Result = ();

    fn handle(&mut self, msg: BackendConnected, ctx: &mut Self::Context) {
        if let Some(session) = &self.session {
            if let Err(err) = session.transition(SessionPhase::Ready) {
                warn!("{}", err);
            }
        }
        self.live = Some(msg.handle);
        self.send_server(ctx, &ServerMessage::Ready);

        // Pump backend events into the actor mailbox; the task ends when the
        // backend session closes and drops its sender.
        let addr = ctx.address();
        let mut events = msg.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                addr.do_send(BackendEvent(event));
            }
        });
    }
}

impl Handler<BackendFailed> for SpeakWebSocket {
    type Result = ();

    fn handle(&mut self, msg: BackendFailed, ctx: &mut Self::Context) {
        error!("backend session failed to open: {}", msg.detail);
        if let Some(session) = &self.session {
            session.fail();
        }
        self.state.record_backend_error();
        self.send_server(
            ctx,
            &ServerMessage::Error {
                message: "Failed to start AI session".to_string(),
            },
        );
        ctx.close(None);
        ctx.stop();
    }
}

/// Relay backend events to the client. All payloads pass through unmodified;
/// the bridge never reinterprets audio or text content.
impl Handler<BackendEvent> for SpeakWebSocket {
    type Result = ();

    fn handle(&mut self, msg: BackendEvent, ctx: &mut Self::Context) {
        let outbound = match msg.0 {
            LiveEvent::Audio { data, mime_type } => {
                self.note_phase(SessionPhase::Speaking);
                ServerMessage::Audio { data, mime_type }
            }
            LiveEvent::Text { data } => ServerMessage::Text { data },
            LiveEvent::TurnComplete => {
                self.note_phase(SessionPhase::Ready);
                ServerMessage::TurnComplete
            }
            LiveEvent::Interrupted => ServerMessage::Interrupted,
            LiveEvent::Error { message } => {
                self.state.record_backend_error();
                if let Some(session) = &self.session {
                    session.fail();
                }
                ServerMessage::Error { message }
            }
            LiveEvent::Closed => {
                info!("backend closed the session");
                self.live = None;
                self.send_server(ctx, &ServerMessage::SessionClosed);
                ctx.close(None);
                ctx.stop();
                return;
            }
        };

        if let Some(session) = &self.session {
            session.record_event_relayed();
        }
        self.state.record_event_relayed();
        self.send_server(ctx, &outbound);
    }
}

/// Extract the channel owner from the upgrade request's query string. An
/// empty value is treated the same as an absent one.
fn user_id_from_query(query_string: &str) -> Option<String> {
    let query = web::Query::<HashMap<String, String>>::from_query(query_string)
        .unwrap_or_else(|_| web::Query(HashMap::new()));
    query.get("userId").filter(|id| !id.is_empty()).cloned()
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Handles the initial HTTP request and upgrades it to a WebSocket
/// connection; the session itself is handled by the SpeakWebSocket actor.
pub async fn speak_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New voice session request from: {:?}",
        req.connection_info().peer_addr()
    );

    let user_id = user_id_from_query(req.query_string());
    let websocket = SpeakWebSocket::new(user_id, app_state);

    ws::start(websocket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_extraction() {
        assert_eq!(user_id_from_query("userId=u-123"), Some("u-123".to_string()));
        assert_eq!(
            user_id_from_query("debug=1&userId=u-123"),
            Some("u-123".to_string())
        );
        assert_eq!(user_id_from_query(""), None);
        assert_eq!(user_id_from_query("user=abc"), None);
        assert_eq!(user_id_from_query("userId="), None);
    }

    #[test]
    fn test_missing_user_id_envelope() {
        let msg = ServerMessage::Error {
            message: "Missing userId".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"error","message":"Missing userId"}"#
        );
    }
}
