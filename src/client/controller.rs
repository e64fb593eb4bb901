//! # Voice Client Controller
//!
//! The native client's conversation engine. `VoiceClient` owns the state
//! machine, the capture and playback pipelines, and the sending half of the
//! channel; the WebSocket itself lives in `run`, which pumps socket frames,
//! user commands, and pipeline events into the controller from one select
//! loop.
//!
//! ## Data paths:
//! - mic → capture pipeline → base64 → `audio` envelope → bridge
//! - bridge `audio` envelope → base64 decode → playback queue → speaker
//! - bridge control envelopes and pipeline lifecycle events → state machine
//!
//! Everything the controller does is a synchronous reaction to one input, so
//! every path is testable with channels and fake devices, no server needed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::audio::capture::{CaptureEvent, CapturePipeline};
use crate::audio::device::{DeviceSpec, SinkFactory, SourceFactory};
use crate::audio::playback::{PlaybackEvent, PlaybackPipeline};
use crate::audio::AudioFrame;
use crate::client::state::SessionStateMachine;
use crate::config::{AppConfig, AudioConfig};
use crate::error::{AppError, AppResult};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::SessionPhase;

/// Commands from the user interface (key presses, in the terminal client).
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Open the microphone if closed, release it if open
    ToggleMic,
    /// Submit a complete text turn
    SendText(String),
    /// End the session and release everything
    Disconnect,
}

/// Builds a fresh capture device factory for each microphone open. The
/// capture pipeline consumes its factory on start, so reopening the mic
/// needs a new one.
pub type SourceProvider = Box<dyn FnMut() -> SourceFactory + Send>;

/// One conversation's worth of client state: machine, devices, uplink.
pub struct VoiceClient {
    machine: SessionStateMachine,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    make_source: SourceProvider,
    server_tx: mpsc::UnboundedSender<ClientMessage>,
    capture_frames: mpsc::UnboundedSender<AudioFrame>,
    capture_events: mpsc::UnboundedSender<CaptureEvent>,
    audio: AudioConfig,
    playback_seq: u64,
    payload_decode_failures: u64,
}

impl VoiceClient {
    /// Everything injectable: device factories and channel ends come from
    /// the caller, so tests can stand in for hardware and the socket.
    pub fn new(
        audio: &AudioConfig,
        make_source: SourceProvider,
        sink_factory: SinkFactory,
        server_tx: mpsc::UnboundedSender<ClientMessage>,
        capture_frames: mpsc::UnboundedSender<AudioFrame>,
        capture_events: mpsc::UnboundedSender<CaptureEvent>,
        playback_events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Self {
        Self {
            machine: SessionStateMachine::new(),
            capture: CapturePipeline::new(),
            playback: PlaybackPipeline::new(
                sink_factory,
                audio.playback_sample_rate,
                playback_events,
            ),
            make_source,
            server_tx,
            capture_frames,
            capture_events,
            audio: audio.clone(),
            playback_seq: 0,
            payload_decode_failures: 0,
        }
    }

    /// Mark the session as opening. Called before the socket dial so a
    /// failed dial lands in `error` rather than looking idle.
    pub fn begin_connecting(&mut self) -> AppResult<()> {
        self.machine.connect_requested()
    }

    pub fn phase(&self) -> SessionPhase {
        self.machine.phase()
    }

    pub fn capture_active(&self) -> bool {
        self.machine.capture_active()
    }

    pub fn machine(&self) -> &SessionStateMachine {
        &self.machine
    }

    pub fn playback(&self) -> &PlaybackPipeline {
        &self.playback
    }

    /// Inbound `audio` envelopes whose base64 payload would not decode.
    /// PCM-level failures are counted by the playback pipeline instead.
    pub fn payload_decode_failures(&self) -> u64 {
        self.payload_decode_failures
    }

    pub fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::ToggleMic => self.toggle_mic(),
            ClientCommand::SendText(text) => self.send_text(text),
            ClientCommand::Disconnect => {
                info!("disconnect requested");
                self.release_session();
            }
        }
    }

    /// One envelope from the bridge.
    pub fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Ready => {
                info!("session ready");
                self.machine.on_ready();
            }
            ServerMessage::Audio { data, mime_type } => {
                // The payload rate is fixed by the channel contract, so the
                // advisory mimeType is logged and otherwise ignored
                if let Some(mime) = mime_type {
                    debug!(mime = %mime, "audio chunk");
                }
                match BASE64.decode(data.as_bytes()) {
                    Ok(bytes) => {
                        let frame = AudioFrame::playback(self.playback_seq, bytes);
                        self.playback_seq += 1;
                        self.playback.enqueue(frame);
                    }
                    Err(err) => {
                        self.payload_decode_failures += 1;
                        warn!("dropping undecodable audio payload: {}", err);
                    }
                }
            }
            ServerMessage::Text { data } => {
                info!(text = %data, "assistant");
            }
            ServerMessage::TurnComplete => {
                debug!("turn complete");
                self.machine.on_turn_complete();
            }
            ServerMessage::Interrupted => {
                // The user barged in; cut the assistant off mid-sentence
                let dropped = self.playback.flush();
                info!(dropped, "assistant interrupted");
            }
            ServerMessage::Error { message } => {
                error!(error = %message, "session error from bridge");
                self.machine.fail(message);
            }
            ServerMessage::SessionClosed => {
                info!("bridge closed the session");
                self.release_session();
            }
        }
    }

    /// One encoded frame from the capture pipeline, on its way out.
    pub fn forward_frame(&mut self, frame: AudioFrame) {
        let data = BASE64.encode(frame.data());
        if self.server_tx.send(ClientMessage::Audio { data }).is_err() {
            debug!(seq = frame.seq(), "uplink gone, dropping capture frame");
        }
    }

    pub fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Started => debug!("microphone open"),
            CaptureEvent::Stopped => debug!("microphone released"),
            CaptureEvent::Failed(err) => {
                // Capture dies alone; the session and playback stay up so
                // the user still hears any reply in flight
                error!("capture failed: {}", err);
                self.capture.stop();
                self.machine.fail(err.to_string());
            }
        }
    }

    pub fn handle_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => self.machine.on_playback_started(),
            PlaybackEvent::Drained => self.machine.on_playback_drained(),
            PlaybackEvent::Failed(err) => {
                error!("playback failed: {}", err);
                self.machine.fail(err.to_string());
            }
        }
    }

    /// The socket dropped without a `sessionClosed`. Release the devices
    /// and surface an error, unless the session was already torn down.
    pub fn handle_transport_closed(&mut self) {
        if self.machine.phase() == SessionPhase::Idle {
            return;
        }
        self.capture.stop();
        self.playback.close();
        self.machine.fail("connection closed unexpectedly");
    }

    fn toggle_mic(&mut self) {
        if self.machine.capture_active() {
            if let Err(err) = self.machine.stop_listening() {
                warn!("{}", err);
                return;
            }
            self.capture.stop();
        } else {
            if let Err(err) = self.machine.start_listening() {
                warn!("{}", err);
                return;
            }
            let spec = DeviceSpec {
                sample_rate: self.audio.capture_sample_rate,
                channels: self.audio.channels,
                block_size: self.audio.capture_block_size,
            };
            self.capture.start(
                (self.make_source)(),
                spec,
                self.capture_frames.clone(),
                self.capture_events.clone(),
            );
        }
    }

    fn send_text(&mut self, text: String) {
        if let Err(err) = self.machine.text_submitted() {
            warn!("{}", err);
            return;
        }
        if self.server_tx.send(ClientMessage::Text { data: text }).is_err() {
            warn!("uplink gone, dropping text turn");
        }
    }

    /// Orderly teardown: microphone, then speaker, then the machine. Each
    /// release is idempotent, so a partially torn down session is safe.
    fn release_session(&mut self) {
        self.capture.stop();
        self.playback.close();
        self.machine.reset();
    }
}

/// Connect to the bridge and run the conversation until it ends.
///
/// Returns when the user disconnects, the bridge closes the channel, or the
/// socket fails. One call is one session; call again to reconnect.
pub async fn run(
    config: &AppConfig,
    url: &str,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
) -> AppResult<()> {
    let (server_tx, mut server_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<AudioFrame>();
    let (capture_events_tx, mut capture_events_rx) = mpsc::unbounded_channel::<CaptureEvent>();
    let (playback_events_tx, mut playback_events_rx) = mpsc::unbounded_channel::<PlaybackEvent>();

    let mut client = VoiceClient::new(
        &config.audio,
        Box::new(crate::audio::device::default_source_factory),
        crate::audio::device::default_sink_factory(),
        server_tx,
        frames_tx,
        capture_events_tx,
        playback_events_tx,
    );

    client.begin_connecting()?;
    info!(url = %url, "connecting to voice bridge");

    let (socket, _) = connect_async(url)
        .await
        .map_err(|e| AppError::BackendUnavailable(format!("bridge connect failed: {}", e)))?;
    let (mut write, mut read) = socket.split();

    // The writer owns the sink half; dropping the last sender closes the
    // socket politely.
    let writer = tokio::spawn(async move {
        while let Some(message) = server_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    error!("failed to encode outbound envelope: {}", err);
                    continue;
                }
            };
            if write.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => client.handle_server_message(message),
                    Err(err) => warn!("ignoring malformed server envelope: {}", err),
                },
                Some(Ok(Message::Close(reason))) => {
                    info!(?reason, "bridge closed the channel");
                    client.handle_transport_closed();
                    break;
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    error!("channel read failed: {}", err);
                    client.handle_transport_closed();
                    break;
                }
                None => {
                    client.handle_transport_closed();
                    break;
                }
            },
            Some(command) = commands.recv() => {
                let disconnecting = matches!(command, ClientCommand::Disconnect);
                client.handle_command(command);
                if disconnecting {
                    break;
                }
            }
            Some(frame) = frames_rx.recv() => client.forward_frame(frame),
            Some(event) = capture_events_rx.recv() => client.handle_capture_event(event),
            Some(event) = playback_events_rx.recv() => client.handle_playback_event(event),
        }
    }

    // Dropping the client releases the devices; dropping its sender lets
    // the writer close the socket.
    drop(client);
    let _ = writer.await;
    Ok(())
}
