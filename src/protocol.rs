//! # Speak Channel Protocol
//!
//! JSON envelopes exchanged over the `/ws/speak` WebSocket. Both directions
//! are tagged with a `type` field; raw audio rides inside the envelope as
//! base64 so the whole protocol stays text-framed.
//!
//! ## Message Flow:
//! 1. Client connects with `?userId=...` and waits for `ready`
//! 2. Client streams `audio` (base64 PCM16 @ 16 kHz mono) and/or `text` turns
//! 3. Server relays backend output: `audio` (+ mimeType), `text`,
//!    `turnComplete`, `interrupted`
//! 4. `error` carries a human-readable message; `sessionClosed` means the
//!    backend ended the session
//!
//! The envelopes are shared by the server-side bridge actor and the native
//! client, so the two sides can never drift apart.

use serde::{Deserialize, Serialize};

/// Messages the client sends to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// One capture block, base64-encoded PCM16 little-endian at 16 kHz mono
    #[serde(rename = "audio")]
    Audio { data: String },

    /// A complete text turn (alternative input modality to speech)
    #[serde(rename = "text")]
    Text { data: String },
}

/// Messages the bridge sends to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The backend session is established; audio and text may now flow
    #[serde(rename = "ready")]
    Ready,

    /// One chunk of synthesized speech from the backend, base64 PCM.
    /// `mimeType` is relayed exactly as the backend reported it
    /// (observed: `audio/pcm;rate=24000`).
    #[serde(rename = "audio")]
    Audio {
        data: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },

    /// Partial or full assistant text
    #[serde(rename = "text")]
    Text { data: String },

    /// The backend finished its conversational turn
    #[serde(rename = "turnComplete")]
    TurnComplete,

    /// The backend detected the user barging in while it was speaking
    #[serde(rename = "interrupted")]
    Interrupted,

    /// Session-scoped failure with a displayable message
    #[serde(rename = "error")]
    Error { message: String },

    /// The backend closed the session from its side
    #[serde(rename = "sessionClosed")]
    SessionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_roundtrip() {
        let msg = ClientMessage::Audio {
            data: "AAAA".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"audio","data":"AAAA"}"#);

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientMessage::Audio { data } => assert_eq!(data, "AAAA"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_text_turn_parsing() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"text","data":"hello there"}"#).unwrap();
        match parsed {
            ClientMessage::Text { data } => assert_eq!(data, "hello there"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_control_messages_have_bare_envelopes() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::Ready).unwrap(),
            r#"{"type":"ready"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::TurnComplete).unwrap(),
            r#"{"type":"turnComplete"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::Interrupted).unwrap(),
            r#"{"type":"interrupted"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::SessionClosed).unwrap(),
            r#"{"type":"sessionClosed"}"#
        );
    }

    #[test]
    fn test_audio_message_mime_type_field() {
        let msg = ServerMessage::Audio {
            data: "UklGRg==".to_string(),
            mime_type: Some("audio/pcm;rate=24000".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""mimeType":"audio/pcm;rate=24000""#));

        // An audio envelope without a mime type omits the field entirely
        let msg = ServerMessage::Audio {
            data: "UklGRg==".to_string(),
            mime_type: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("mimeType"));
    }

    #[test]
    fn test_error_message_shape() {
        let msg = ServerMessage::Error {
            message: "Missing userId".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"Missing userId"}"#);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"video","data":""}"#);
        assert!(result.is_err());
    }
}
