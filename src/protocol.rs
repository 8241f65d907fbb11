use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Who authored a chat turn. Serialized with the backend's role strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One structured text frame from the consultation backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Acknowledgment that the request reached the backend.
    MessageReceived,
    /// Finalized assistant reply.
    Text { id: String, text: String },
    /// A synthesized-speech stream for `id` is about to begin.
    AudioStart { id: String },
    /// The stream for `id` carries no further chunks.
    AudioEnd { id: String },
    /// The stream for `id` failed server-side.
    AudioError { id: String, error: String },
    /// Request-level failure.
    Error { message: String },
}

/// Outcome of classifying one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(ServerFrame),
    /// Unknown discriminator or misrouted binary payload; logged and skipped.
    Ignored,
}

/// Classify one text frame. Unknown `type` values are skipped rather than
/// surfaced; parse failures are swallowed when the payload plainly is not a
/// JSON envelope (binary data that landed on the text channel).
pub fn decode_text_frame(text: &str) -> Result<Decoded, ClientError> {
    let event: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            if looks_like_binary(text) {
                log::debug!(
                    "[protocol] dropping binary-looking payload on text channel ({} bytes)",
                    text.len()
                );
                return Ok(Decoded::Ignored);
            }
            return Err(ClientError::Protocol(format!("parse error: {}", e)));
        }
    };

    let msg_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");

    let frame = match msg_type {
        "message-received" => ServerFrame::MessageReceived,
        "text" => ServerFrame::Text {
            id: id_field(&event),
            text: str_field(&event, "text"),
        },
        "audio-start" => ServerFrame::AudioStart { id: id_field(&event) },
        "audio-end" => ServerFrame::AudioEnd { id: id_field(&event) },
        "audio-error" => ServerFrame::AudioError {
            id: id_field(&event),
            error: str_field(&event, "error"),
        },
        "error" => ServerFrame::Error {
            message: str_field(&event, "message"),
        },
        other => {
            log::debug!("[protocol] unknown message type: {:?}", other);
            return Ok(Decoded::Ignored);
        }
    };
    Ok(Decoded::Frame(frame))
}

/// Session ids arrive as either JSON strings or numbers.
fn id_field(event: &Value) -> String {
    match event.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn str_field(event: &Value, key: &str) -> String {
    event
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Every structured frame is a JSON object, so anything that does not open
/// with a brace (or smuggles NUL bytes) is misrouted binary, not a protocol
/// violation worth surfacing.
fn looks_like_binary(text: &str) -> bool {
    !text.trim_start().starts_with('{') || text.bytes().any(|b| b == 0)
}

/// One prior turn in the outbound envelope. The wire field is `type`, not
/// `role`; that is the backend contract.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub role: Role,
    pub content: String,
}

/// Outbound chat envelope: the new message plus all prior history.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    pub message: String,
    pub history: Vec<HistoryEntry>,
}

impl ChatRequest {
    pub fn new(message: String, history: Vec<HistoryEntry>) -> Self {
        Self {
            kind: "chat",
            message,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_frame_with_numeric_id() {
        let decoded = decode_text_frame(r#"{"type":"text","id":1,"text":"Ответ"}"#).unwrap();
        assert_eq!(
            decoded,
            Decoded::Frame(ServerFrame::Text {
                id: "1".into(),
                text: "Ответ".into()
            })
        );
    }

    #[test]
    fn decodes_audio_lifecycle_frames() {
        let start = decode_text_frame(r#"{"type":"audio-start","id":"2"}"#).unwrap();
        assert_eq!(start, Decoded::Frame(ServerFrame::AudioStart { id: "2".into() }));

        let end = decode_text_frame(r#"{"type":"audio-end","id":2}"#).unwrap();
        assert_eq!(end, Decoded::Frame(ServerFrame::AudioEnd { id: "2".into() }));

        let err = decode_text_frame(r#"{"type":"audio-error","id":2,"error":"tts failed"}"#)
            .unwrap();
        assert_eq!(
            err,
            Decoded::Frame(ServerFrame::AudioError {
                id: "2".into(),
                error: "tts failed".into()
            })
        );
    }

    #[test]
    fn decodes_acknowledgment_and_error() {
        let ack = decode_text_frame(r#"{"type":"message-received"}"#).unwrap();
        assert_eq!(ack, Decoded::Frame(ServerFrame::MessageReceived));

        let err = decode_text_frame(r#"{"type":"error","message":"overloaded"}"#).unwrap();
        assert_eq!(
            err,
            Decoded::Frame(ServerFrame::Error {
                message: "overloaded".into()
            })
        );
    }

    #[test]
    fn unknown_discriminator_is_skipped() {
        let decoded = decode_text_frame(r#"{"type":"typing-indicator","on":true}"#).unwrap();
        assert_eq!(decoded, Decoded::Ignored);
        // Missing discriminator counts as unknown, not as an error.
        let decoded = decode_text_frame(r#"{"id":7}"#).unwrap();
        assert_eq!(decoded, Decoded::Ignored);
    }

    #[test]
    fn binary_looking_payload_is_swallowed() {
        let decoded = decode_text_frame("OggS\u{2}garbage").unwrap();
        assert_eq!(decoded, Decoded::Ignored);
    }

    #[test]
    fn malformed_json_envelope_is_surfaced() {
        let err = decode_text_frame(r#"{"type":"text","id":"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn chat_request_serializes_with_role_under_type() {
        let request = ChatRequest::new(
            "Проверь договор".into(),
            vec![HistoryEntry {
                role: Role::Assistant,
                content: "Здравствуйте".into(),
            }],
        );
        let json: Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["message"], "Проверь договор");
        assert_eq!(json["history"][0]["type"], "assistant");
        assert_eq!(json["history"][0]["content"], "Здравствуйте");
    }
}
