//! Turning adapter output and tool errors into uniform results.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::adapter::{AdapterOutput, MediaDownload, WindowedMessage};
use super::ToolError;
use crate::whatsapp::{Chat, Contact, Message, SendReceipt};

/// Outcome of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The operation completed.
    Success,
    /// The operation failed; see [`ToolResult::error`].
    Error,
}

/// Data carried by a successful result.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain text.
    Text(String),
    /// A JSON document (object or array).
    Json(Value),
    /// A file written to local disk.
    Resource {
        /// Absolute location of the file.
        path: PathBuf,
        /// MIME type of the file.
        mime_type: String,
        /// Descriptive fields returned alongside the file reference.
        details: Value,
    },
}

/// Machine-readable error details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// Variant name of the [`ToolError`].
    pub kind: String,
    /// Human-readable explanation.
    pub detail: String,
}

/// Uniform result of every tool call.
///
/// Exactly one of `payload` and `error` is set, matching `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Success or failure.
    pub status: ToolStatus,
    /// Result data on success.
    pub payload: Option<Payload>,
    /// Error details on failure.
    pub error: Option<ErrorDetail>,
}

impl ToolResult {
    /// A successful result.
    pub fn success(payload: Payload) -> Self {
        Self {
            status: ToolStatus::Success,
            payload: Some(payload),
            error: None,
        }
    }

    /// A failed result describing `err`.
    pub fn from_error(err: &ToolError) -> Self {
        Self {
            status: ToolStatus::Error,
            payload: None,
            error: Some(ErrorDetail {
                kind: err.kind().to_owned(),
                detail: err.to_string(),
            }),
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Error kind, if the call failed.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }

    /// JSON payload, if the result carries one.
    pub fn json(&self) -> Option<&Value> {
        match &self.payload {
            Some(Payload::Json(value)) => Some(value),
            Some(Payload::Resource { details, .. }) => Some(details),
            _ => None,
        }
    }

    /// Render as an MCP `tools/call` result.
    ///
    /// Content always includes a text rendering. Files additionally get a
    /// `resource_link` block. `structuredContent` is always an object;
    /// arrays are wrapped under `results`.
    pub fn to_mcp(&self) -> Value {
        if let Some(err) = &self.error {
            return json!({
                "content": [{ "type": "text", "text": format!("{}: {}", err.kind, err.detail) }],
                "structuredContent": { "error": err },
                "isError": true,
            });
        }

        match &self.payload {
            Some(Payload::Text(text)) => json!({
                "content": [{ "type": "text", "text": text }],
                "isError": false,
            }),
            Some(Payload::Json(value)) => json!({
                "content": [{ "type": "text", "text": pretty(value) }],
                "structuredContent": structured(value),
                "isError": false,
            }),
            Some(Payload::Resource {
                path,
                mime_type,
                details,
            }) => {
                let mut content = vec![json!({ "type": "text", "text": pretty(details) })];
                if let Ok(uri) = url::Url::from_file_path(path) {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    content.push(json!({
                        "type": "resource_link",
                        "uri": uri.as_str(),
                        "name": name,
                        "mimeType": mime_type,
                    }));
                }
                json!({
                    "content": content,
                    "structuredContent": structured(details),
                    "isError": false,
                })
            }
            None => json!({ "content": [], "isError": false }),
        }
    }
}

impl From<Result<AdapterOutput, ToolError>> for ToolResult {
    fn from(outcome: Result<AdapterOutput, ToolError>) -> Self {
        match outcome {
            Ok(output) => normalize(output),
            Err(err) => ToolResult::from_error(&err),
        }
    }
}

/// Convert adapter output into a successful [`ToolResult`].
pub fn normalize(output: AdapterOutput) -> ToolResult {
    let payload = match output {
        AdapterOutput::Contacts(contacts) => {
            Payload::Json(Value::Array(contacts.iter().map(contact_record).collect()))
        }
        AdapterOutput::Messages(messages) => {
            Payload::Json(Value::Array(messages.iter().map(windowed_record).collect()))
        }
        AdapterOutput::Chats(chats) => {
            Payload::Json(Value::Array(chats.iter().map(chat_record).collect()))
        }
        AdapterOutput::Chat(chat) => Payload::Json(chat_record(&chat)),
        AdapterOutput::Message(message) => Payload::Json(message_record(&message)),
        AdapterOutput::Sent(receipt) => Payload::Json(receipt_record(&receipt)),
        AdapterOutput::Media(download) => media_payload(download),
    };
    ToolResult::success(payload)
}

/// Contact as returned to callers.
pub fn contact_record(contact: &Contact) -> Value {
    json!({
        "phone_number": contact.phone_number,
        "name": contact.name,
        "jid": contact.jid,
    })
}

/// Chat as returned to callers.
pub fn chat_record(chat: &Chat) -> Value {
    let mut record = Map::new();
    record.insert("jid".into(), json!(chat.jid));
    record.insert("name".into(), json!(chat.name));
    record.insert("is_group".into(), json!(chat.is_group()));
    record.insert(
        "last_message_time".into(),
        json!(chat.last_message_time.map(|t| t.to_rfc3339())),
    );
    if chat.last_message.is_some() {
        record.insert("last_message".into(), json!(chat.last_message));
        record.insert("last_sender".into(), json!(chat.last_sender));
        record.insert("last_is_from_me".into(), json!(chat.last_is_from_me));
    }
    Value::Object(record)
}

/// Message as returned to callers.
pub fn message_record(message: &Message) -> Value {
    json!({
        "id": message.id,
        "chat_jid": message.chat_jid,
        "chat_name": message.chat_name,
        "sender": message.sender,
        "sender_name": message.sender_name,
        "timestamp": message.timestamp.to_rfc3339(),
        "body": message.body,
        "is_from_me": message.is_from_me,
        "has_media": message.has_media(),
        "media_type": message.media_type,
    })
}

fn windowed_record(windowed: &WindowedMessage) -> Value {
    let mut record = message_record(&windowed.message);
    if let Value::Object(map) = &mut record {
        map.insert("is_context".into(), json!(windowed.is_context));
    }
    record
}

fn receipt_record(receipt: &SendReceipt) -> Value {
    json!({
        "success": true,
        "message_id": receipt.message_id,
        "timestamp": receipt.timestamp.to_rfc3339(),
        "recipient": receipt.recipient,
        "status": receipt.status,
    })
}

fn media_payload(download: MediaDownload) -> Payload {
    let details = json!({
        "success": true,
        "message_id": download.message_id,
        "file_path": download.local_file_path.to_string_lossy(),
        "mime_type": download.mime_type,
        "size_bytes": download.size_bytes,
    });
    Payload::Resource {
        path: download.local_file_path,
        mime_type: download.mime_type,
        details,
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn structured(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        other => json!({ "results": other }),
    }
}
