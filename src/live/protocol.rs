//! # Backend Wire Protocol
//!
//! Serde types for the Gemini Live `BidiGenerateContent` WebSocket protocol,
//! covering exactly the subset this bridge speaks: session setup, realtime
//! audio input, text turns, and the server content stream. Everything the
//! backend sends that we do not model is ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Default MIME type for captured audio pushed upstream.
pub const AUDIO_INPUT_MIME: &str = "audio/pcm;rate=16000";

// ---------------------------------------------------------------------------
// Client -> backend
// ---------------------------------------------------------------------------

/// First message on a fresh connection. The backend answers with
/// `setupComplete` once the session is live.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SetupMessage {
    /// Audio-out session setup with an optional system instruction.
    ///
    /// The wire format wants the fully qualified `models/<name>` form; bare
    /// model names from config are qualified here.
    pub fn new(model: &str, voice: &str, system_instruction: Option<String>) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: system_instruction.map(|text| Content {
                    role: None,
                    parts: vec![Part::text(text)],
                }),
            },
        }
    }
}

/// Streaming audio input. Chunks are base64 PCM with an explicit MIME type.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

impl RealtimeInputMessage {
    pub fn audio_chunk(data: String) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: Some(AUDIO_INPUT_MIME.to_string()),
                    data,
                }],
            },
        }
    }
}

/// A complete typed user turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentMessage {
    pub client_content: ClientContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientContentMessage {
    pub fn user_text(text: String) -> Self {
        Self {
            client_content: ClientContent {
                turns: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::text(text)],
                }],
                turn_complete: true,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Shared content shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One content part. The backend interleaves audio (`inlineData`) and text
/// parts within a single model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }
}

/// Base64 payload plus MIME type, used both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: String,
}

// ---------------------------------------------------------------------------
// Backend -> client
// ---------------------------------------------------------------------------

/// Top-level envelope for backend frames. Exactly one of the fields is
/// populated per frame in practice; unknown siblings are dropped by serde.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(default)]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let msg = SetupMessage::new("gemini-live-test", "Kore", Some("Be brief.".to_string()));
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["setup"]["model"], "models/gemini-live-test");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be brief."
        );
        // role is omitted from the system instruction, not serialized as null
        assert!(json["setup"]["systemInstruction"]
            .as_object()
            .unwrap()
            .get("role")
            .is_none());
    }

    #[test]
    fn test_qualified_model_name_not_doubled() {
        let msg = SetupMessage::new("models/custom", "Kore", None);
        assert_eq!(msg.setup.model, "models/custom");
    }

    #[test]
    fn test_realtime_input_shape() {
        let msg = RealtimeInputMessage::audio_chunk("AAAA".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"AAAA"}]}}"#
        );
    }

    #[test]
    fn test_client_content_shape() {
        let msg = ClientContentMessage::user_text("hello".to_string());
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["clientContent"]["turnComplete"], true);
        assert_eq!(json["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(json["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
    }

    #[test]
    fn test_parse_setup_complete() {
        let envelope: ServerEnvelope = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(envelope.setup_complete.is_some());
        assert!(envelope.server_content.is_none());
    }

    #[test]
    fn test_parse_model_turn_with_audio_and_text() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UklGRg=="}},
                        {"text": "Hello there"}
                    ]
                }
            }
        }"#;
        let envelope: ServerEnvelope = serde_json::from_str(raw).unwrap();
        let content = envelope.server_content.unwrap();
        let turn = content.model_turn.unwrap();

        assert_eq!(turn.parts.len(), 2);
        let blob = turn.parts[0].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type.as_deref(), Some("audio/pcm;rate=24000"));
        assert_eq!(blob.data, "UklGRg==");
        assert_eq!(turn.parts[1].text.as_deref(), Some("Hello there"));
        assert_eq!(content.turn_complete, None);
    }

    #[test]
    fn test_parse_turn_boundaries() {
        let envelope: ServerEnvelope =
            serde_json::from_str(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert_eq!(envelope.server_content.unwrap().turn_complete, Some(true));

        let envelope: ServerEnvelope =
            serde_json::from_str(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(envelope.server_content.unwrap().interrupted, Some(true));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let raw = r#"{"usageMetadata":{"promptTokenCount":12},"serverContent":{"turnComplete":true}}"#;
        let envelope: ServerEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.server_content.is_some());
    }
}
