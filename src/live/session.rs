//! # Live Backend Session
//!
//! Owns the upstream WebSocket to the realtime voice backend. `connect`
//! performs the handshake (socket open, then setup/setupComplete) and hands
//! back a command handle plus an event stream; after that a spawned pump task
//! owns the socket, pushing client input upstream and translating wire frames
//! into [`LiveEvent`]s until either side closes.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::LiveConfig;
use crate::error::{AppError, AppResult};
use crate::live::protocol::{
    ClientContentMessage, RealtimeInputMessage, ServerEnvelope, SetupMessage,
};

/// What the backend did, in session terms. Carried payloads are still base64;
/// decoding is the consumer's concern.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Audio {
        data: String,
        mime_type: Option<String>,
    },
    Text {
        data: String,
    },
    TurnComplete,
    Interrupted,
    Error {
        message: String,
    },
    Closed,
}

enum LiveCommand {
    Audio(String),
    Text(String),
    Close,
}

/// Cloneable handle for pushing input into an established backend session.
#[derive(Clone, Debug)]
pub struct LiveHandle {
    commands: mpsc::UnboundedSender<LiveCommand>,
}

impl LiveHandle {
    /// Forward one base64 audio chunk. Returns false once the session is gone.
    pub fn send_audio(&self, data: String) -> bool {
        self.commands.send(LiveCommand::Audio(data)).is_ok()
    }

    /// Submit a complete typed user turn.
    pub fn send_text(&self, text: String) -> bool {
        self.commands.send(LiveCommand::Text(text)).is_ok()
    }

    /// Ask the pump to close the upstream socket. Safe to call repeatedly and
    /// after the session already ended.
    pub fn close(&self) {
        let _ = self.commands.send(LiveCommand::Close);
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Open a backend session and run the setup handshake.
///
/// Resolves only after the backend acknowledged the setup, so a returned
/// handle is immediately usable for audio input. Connection and setup share
/// the configured timeout.
pub async fn connect(
    config: &LiveConfig,
    system_instruction: Option<String>,
) -> AppResult<(LiveHandle, mpsc::UnboundedReceiver<LiveEvent>)> {
    let connect_timeout = Duration::from_secs(config.connect_timeout_seconds);
    if config.api_key.is_none() {
        warn!("no API key configured, backend will likely reject the session");
    }

    let url = session_url(config);
    let (mut ws, _) = timeout(connect_timeout, connect_async(&url))
        .await
        .map_err(|_| {
            AppError::BackendUnavailable(format!(
                "connect timed out after {}s",
                config.connect_timeout_seconds
            ))
        })??;

    let setup = SetupMessage::new(&config.model, &config.voice, system_instruction);
    ws.send(Message::Text(serde_json::to_string(&setup)?)).await?;

    timeout(connect_timeout, await_setup_complete(&mut ws))
        .await
        .map_err(|_| {
            AppError::BackendUnavailable(format!(
                "setup not acknowledged within {}s",
                config.connect_timeout_seconds
            ))
        })??;

    info!(model = %config.model, voice = %config.voice, "backend session established");

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(pump(ws, commands_rx, events_tx));

    Ok((
        LiveHandle {
            commands: commands_tx,
        },
        events_rx,
    ))
}

/// The session endpoint authenticates via a `key` query parameter.
fn session_url(config: &LiveConfig) -> String {
    match &config.api_key {
        Some(key) => {
            let separator = if config.endpoint.contains('?') { '&' } else { '?' };
            format!("{}{}key={}", config.endpoint, separator, key)
        }
        None => config.endpoint.clone(),
    }
}

async fn await_setup_complete(ws: &mut WsStream) -> AppResult<()> {
    while let Some(frame) = ws.next().await {
        if let Some(envelope) = parse_envelope(&frame?) {
            if envelope.setup_complete.is_some() {
                return Ok(());
            }
            // Content before setupComplete is out of contract; keep waiting
            // rather than aborting on a stray keepalive.
            debug!("ignoring pre-setup frame");
        }
    }
    Err(AppError::BackendProtocol(
        "connection closed during setup".to_string(),
    ))
}

/// The backend emits JSON in both text and binary frames.
fn parse_envelope(frame: &Message) -> Option<ServerEnvelope> {
    let parsed = match frame {
        Message::Text(text) => serde_json::from_str::<ServerEnvelope>(text),
        Message::Binary(data) => serde_json::from_slice::<ServerEnvelope>(data),
        _ => return None,
    };
    match parsed {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            warn!("dropping unparseable backend frame: {}", err);
            None
        }
    }
}

async fn pump(
    ws: WsStream,
    mut commands: mpsc::UnboundedReceiver<LiveCommand>,
    events: mpsc::UnboundedSender<LiveEvent>,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "backend closed the session");
                        break;
                    }
                    Some(Ok(message)) => {
                        if let Some(envelope) = parse_envelope(&message) {
                            if !relay_envelope(&envelope, &events) {
                                break;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        error!("backend read failed: {}", err);
                        let _ = events.send(LiveEvent::Error {
                            message: "AI connection error".to_string(),
                        });
                        break;
                    }
                    None => break,
                }
            }
            command = commands.recv() => {
                match command {
                    Some(LiveCommand::Audio(data)) => {
                        let message = RealtimeInputMessage::audio_chunk(data);
                        if !send_json(&mut write, &message, &events).await {
                            break;
                        }
                    }
                    Some(LiveCommand::Text(text)) => {
                        let message = ClientContentMessage::user_text(text);
                        if !send_json(&mut write, &message, &events).await {
                            break;
                        }
                    }
                    // A dropped handle counts as a close request.
                    Some(LiveCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    let _ = events.send(LiveEvent::Closed);
}

async fn send_json<T: serde::Serialize>(
    write: &mut WsSink,
    message: &T,
    events: &mpsc::UnboundedSender<LiveEvent>,
) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(err) => {
            error!("failed to encode backend message: {}", err);
            return true;
        }
    };
    if let Err(err) = write.send(Message::Text(json)).await {
        error!("backend write failed: {}", err);
        let _ = events.send(LiveEvent::Error {
            message: "AI connection error".to_string(),
        });
        return false;
    }
    true
}

/// Fan a content envelope out as events. A model turn can interleave audio
/// and text parts; turn boundaries ride the same envelope. Returns false
/// when the event receiver is gone.
fn relay_envelope(envelope: &ServerEnvelope, events: &mpsc::UnboundedSender<LiveEvent>) -> bool {
    let content = match &envelope.server_content {
        Some(content) => content,
        None => return true,
    };

    if let Some(turn) = &content.model_turn {
        for part in &turn.parts {
            let event = if let Some(blob) = &part.inline_data {
                LiveEvent::Audio {
                    data: blob.data.clone(),
                    mime_type: blob.mime_type.clone(),
                }
            } else if let Some(text) = &part.text {
                LiveEvent::Text { data: text.clone() }
            } else {
                continue;
            };
            if events.send(event).is_err() {
                return false;
            }
        }
    }

    if content.turn_complete == Some(true) && events.send(LiveEvent::TurnComplete).is_err() {
        return false;
    }
    if content.interrupted == Some(true) && events.send(LiveEvent::Interrupted).is_err() {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_config(port: u16) -> LiveConfig {
        LiveConfig {
            api_key: None,
            endpoint: format!("ws://127.0.0.1:{}", port),
            model: "test-model".to_string(),
            voice: "Kore".to_string(),
            connect_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_setup_handshake_and_event_translation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let setup = ws.next().await.unwrap().unwrap();
            let setup: serde_json::Value =
                serde_json::from_str(setup.to_text().unwrap()).unwrap();
            assert_eq!(setup["setup"]["model"], "models/test-model");
            assert_eq!(
                setup["setup"]["systemInstruction"]["parts"][0]["text"],
                "sys"
            );

            ws.send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
                .await
                .unwrap();

            let chunk = ws.next().await.unwrap().unwrap();
            let chunk: serde_json::Value =
                serde_json::from_str(chunk.to_text().unwrap()).unwrap();
            assert_eq!(chunk["realtimeInput"]["mediaChunks"][0]["data"], "AAAA");

            ws.send(Message::Text(
                r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"UklGRg=="}},{"text":"hi"}]}}}"#
                    .to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"serverContent":{"turnComplete":true}}"#.to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Close(None)).await.unwrap();
        });

        let config = test_config(port);
        let (handle, mut events) = connect(&config, Some("sys".to_string())).await.unwrap();
        assert!(handle.send_audio("AAAA".to_string()));

        match events.recv().await.unwrap() {
            LiveEvent::Audio { data, mime_type } => {
                assert_eq!(data, "UklGRg==");
                assert_eq!(mime_type.as_deref(), Some("audio/pcm;rate=24000"));
            }
            other => panic!("expected audio event, got {:?}", other),
        }
        match events.recv().await.unwrap() {
            LiveEvent::Text { data } => assert_eq!(data, "hi"),
            other => panic!("expected text event, got {:?}", other),
        }
        assert!(matches!(events.recv().await.unwrap(), LiveEvent::TurnComplete));
        assert!(matches!(events.recv().await.unwrap(), LiveEvent::Closed));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_reaches_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _setup = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
                .await
                .unwrap();

            // next frame from the client must be the close handshake
            let mut saw_close = false;
            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, Message::Close(_)) {
                    saw_close = true;
                }
            }
            assert!(saw_close);
        });

        let config = test_config(port);
        let (handle, mut events) = connect(&config, None).await.unwrap();
        handle.close();
        handle.close();

        assert!(matches!(events.recv().await.unwrap(), LiveEvent::Closed));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_backend_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect(&test_config(port), None).await.unwrap_err();
        assert!(matches!(err, AppError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_close_during_setup_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _setup = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
        });

        let err = connect(&test_config(port), None).await.unwrap_err();
        assert!(matches!(err, AppError::BackendProtocol(_)));
        server.await.unwrap();
    }

    #[test]
    fn test_session_url_key_handling() {
        let mut config = test_config(80);
        config.endpoint = "wss://example.com/session".to_string();
        assert_eq!(session_url(&config), "wss://example.com/session");

        config.api_key = Some("secret".to_string());
        assert_eq!(session_url(&config), "wss://example.com/session?key=secret");

        config.endpoint = "wss://example.com/session?alt=ws".to_string();
        assert_eq!(
            session_url(&config),
            "wss://example.com/session?alt=ws&key=secret"
        );
    }
}
