//! HTTP client for the WhatsApp bridge.
//!
//! The bridge exposes `/api/<endpoint>` routes. Reads are GETs carrying the
//! caller's `user_id` as a query parameter; sends are JSON POSTs to
//! `/api/send` with `user_id` in the body.
//! Each success body is a JSON object keyed per endpoint (`contacts`,
//! `chats`, `message`, ...). Failures come back either as a non-2xx status or
//! as a 200 body carrying an `error` field.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::time;
use super::{
    Chat, ChatQuery, Contact, MediaKind, MediaPayload, Message, MessageContext, MessageQuery,
    SendReceipt, WhatsAppApi, WhatsAppError,
};

/// Bridge URL used when nothing is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Bridge account used when neither the config nor the caller names one.
pub const DEFAULT_USER_ID: &str = "default_user";

/// Timeouts for the underlying HTTP client.
#[derive(Debug, Clone, Copy)]
pub struct BridgeTimeouts {
    /// TCP connect timeout.
    pub connect: Duration,
    /// Whole-request timeout.
    pub request: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(30),
        }
    }
}

/// Client for the WhatsApp HTTP bridge.
pub struct BridgeClient {
    client: reqwest::Client,
    base_url: String,
}

/// Error body shape used by the bridge.
#[derive(Deserialize)]
struct BridgeErrorBody {
    error: Option<String>,
    message: Option<String>,
    code: Option<String>,
}

/// Body of a `POST /api/send` response.
#[derive(Deserialize)]
struct SendBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default, with = "time::option")]
    timestamp: Option<chrono::DateTime<Utc>>,
}

/// Body of a `GET /api/media` response.
#[derive(Deserialize)]
struct MediaBody {
    data: String,
    mime_type: String,
    #[serde(default)]
    file_name: Option<String>,
}

impl BridgeClient {
    /// Create a client for the bridge at `base_url`.
    pub fn new(base_url: &str, timeouts: BridgeTimeouts) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check whether the bridge answers at all.
    ///
    /// Any HTTP response counts as reachable; only transport failures do not.
    pub async fn is_reachable(&self) -> bool {
        let url = format!("{}/api/status", self.base_url);
        self.client.get(&url).send().await.is_ok()
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/api/{name}", self.base_url)
    }

    async fn get(
        &self,
        name: &str,
        user_id: &str,
        params: &[(&str, String)],
    ) -> Result<Value, WhatsAppError> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("user_id", user_id.to_owned()));
        let resp = self
            .client
            .get(self.endpoint(name))
            .query(&query)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        debug!(endpoint = name, status, "bridge GET");
        decode_body(status, &text)
    }

    async fn post(&self, name: &str, body: Value) -> Result<Value, WhatsAppError> {
        let resp = self
            .client
            .post(self.endpoint(name))
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        debug!(endpoint = name, status, "bridge POST");
        decode_body(status, &text)
    }

    async fn send(
        &self,
        user_id: &str,
        recipient: &str,
        mut body: Value,
    ) -> Result<SendReceipt, WhatsAppError> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("user_id".to_owned(), Value::String(user_id.to_owned()));
            obj.insert("recipient".to_owned(), Value::String(recipient.to_owned()));
        }
        let value = self.post("send", body).await?;
        receipt_from_body(recipient, value)
    }
}

/// Turn a bridge response into its JSON body or a classified error.
pub fn decode_body(status: u16, text: &str) -> Result<Value, WhatsAppError> {
    if !(200..300).contains(&status) {
        return Err(classify_error(status, text));
    }
    let value: Value = serde_json::from_str(text)
        .map_err(|e| WhatsAppError::InvalidResponse(format!("{e}: {}", snippet(text))))?;
    if value.get("error").is_some_and(|e| !e.is_null()) {
        return Err(classify_error(status, text));
    }
    Ok(value)
}

/// Map an error response onto [`WhatsAppError`].
///
/// An explicit `code` in the body wins; otherwise the HTTP status decides.
pub fn classify_error(status: u16, text: &str) -> WhatsAppError {
    let parsed: Option<BridgeErrorBody> = serde_json::from_str(text).ok();
    let (message, code) = match parsed {
        Some(body) => (
            body.error
                .or(body.message)
                .unwrap_or_else(|| snippet(text).to_owned()),
            body.code,
        ),
        None => (snippet(text).to_owned(), None),
    };

    match code.as_deref() {
        Some("not_found") => return WhatsAppError::NotFound(message),
        Some("no_media") => return WhatsAppError::NoMedia(message),
        Some("not_a_contact") => return WhatsAppError::NotAContact(message),
        Some("rate_limited") => return WhatsAppError::RateLimited(message),
        Some("not_connected") => return WhatsAppError::NotConnected,
        Some("file_too_large") => return WhatsAppError::FileTooLarge(message),
        Some("unsupported_media") => return WhatsAppError::UnsupportedMedia(message),
        _ => {}
    }

    match status {
        404 => WhatsAppError::NotFound(message),
        413 => WhatsAppError::FileTooLarge(message),
        415 => WhatsAppError::UnsupportedMedia(message),
        429 => WhatsAppError::RateLimited(message),
        503 => WhatsAppError::NotConnected,
        _ => WhatsAppError::Rejected { status, message },
    }
}

/// Extract and deserialize a field from a bridge body. A missing field is an
/// empty collection for list endpoints, so callers pass `Value::Array` there.
fn field<T: DeserializeOwned>(
    body: &Value,
    key: &str,
    missing: Value,
) -> Result<T, WhatsAppError> {
    let raw = body.get(key).cloned().unwrap_or(missing);
    serde_json::from_value(raw)
        .map_err(|e| WhatsAppError::InvalidResponse(format!("field '{key}': {e}")))
}

/// Extract an optional single entity; `null`, absence and `not_found` all mean `None`.
fn optional<T: DeserializeOwned>(
    result: Result<Value, WhatsAppError>,
    key: &str,
) -> Result<Option<T>, WhatsAppError> {
    match result {
        Ok(body) => field(&body, key, Value::Null),
        Err(WhatsAppError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Build a [`SendReceipt`] from a `/api/send` body.
pub fn receipt_from_body(recipient: &str, body: Value) -> Result<SendReceipt, WhatsAppError> {
    let parsed: SendBody = serde_json::from_value(body)
        .map_err(|e| WhatsAppError::InvalidResponse(format!("send response: {e}")))?;
    let status = parsed
        .message
        .unwrap_or_else(|| "Unknown response".to_owned());
    if !parsed.success {
        return Err(WhatsAppError::Rejected {
            status: 200,
            message: status,
        });
    }
    Ok(SendReceipt {
        message_id: parsed.message_id,
        timestamp: parsed.timestamp.unwrap_or_else(Utc::now),
        recipient: recipient.to_owned(),
        status,
    })
}

/// Decode a `media` object from `/api/media`.
pub fn media_from_body(message_id: &str, body: &Value) -> Result<MediaPayload, WhatsAppError> {
    let media: Option<MediaBody> = field(body, "media", Value::Null)?;
    let media = media.ok_or_else(|| WhatsAppError::NoMedia(message_id.to_owned()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(media.data.as_bytes())
        .map_err(|e| WhatsAppError::InvalidResponse(format!("media data is not base64: {e}")))?;
    Ok(MediaPayload {
        bytes,
        mime_type: media.mime_type,
        file_name: media.file_name,
    })
}

fn snippet(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(200)
        .map_or(text.len(), |(idx, _)| idx);
    text[..end].trim()
}

fn opt_param(params: &mut Vec<(&'static str, String)>, key: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        params.push((key, v.clone()));
    }
}

#[async_trait]
impl WhatsAppApi for BridgeClient {
    async fn search_contacts(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<Contact>, WhatsAppError> {
        let body = self
            .get("contacts", user_id, &[("query", query.to_owned())])
            .await?;
        field(&body, "contacts", json!([]))
    }

    async fn list_messages(
        &self,
        user_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, WhatsAppError> {
        let mut params = Vec::new();
        opt_param(&mut params, "after", &query.after);
        opt_param(&mut params, "before", &query.before);
        opt_param(&mut params, "sender_phone_number", &query.sender_phone_number);
        opt_param(&mut params, "chat_jid", &query.chat_jid);
        opt_param(&mut params, "query", &query.query);
        params.push(("limit", query.limit.to_string()));
        params.push(("page", query.page.to_string()));
        // Context windows are assembled by the tool layer.
        params.push(("include_context", "false".to_owned()));
        let body = self.get("messages", user_id, &params).await?;
        field(&body, "messages", json!([]))
    }

    async fn message_context(
        &self,
        user_id: &str,
        message_id: &str,
        before: u32,
        after: u32,
    ) -> Result<Option<MessageContext>, WhatsAppError> {
        let params = [
            ("message_id", message_id.to_owned()),
            ("before", before.to_string()),
            ("after", after.to_string()),
        ];
        optional(
            self.get("message_context", user_id, &params).await,
            "context",
        )
    }

    async fn list_chats(
        &self,
        user_id: &str,
        query: &ChatQuery,
    ) -> Result<Vec<Chat>, WhatsAppError> {
        let mut params = Vec::new();
        opt_param(&mut params, "query", &query.query);
        params.push(("limit", query.limit.to_string()));
        params.push(("page", query.page.to_string()));
        params.push(("include_last_message", query.include_last_message.to_string()));
        params.push(("sort_by", query.sort_by.clone()));
        let body = self.get("chats", user_id, &params).await?;
        field(&body, "chats", json!([]))
    }

    async fn get_chat(
        &self,
        user_id: &str,
        chat_jid: &str,
        include_last_message: bool,
    ) -> Result<Option<Chat>, WhatsAppError> {
        let params = [
            ("chat_jid", chat_jid.to_owned()),
            ("include_last_message", include_last_message.to_string()),
        ];
        optional(self.get("chat", user_id, &params).await, "chat")
    }

    async fn get_direct_chat_by_contact(
        &self,
        user_id: &str,
        phone_number: &str,
    ) -> Result<Option<Chat>, WhatsAppError> {
        let params = [("sender_phone_number", phone_number.to_owned())];
        optional(self.get("direct_chat", user_id, &params).await, "chat")
    }

    async fn get_contact_chats(
        &self,
        user_id: &str,
        jid: &str,
        limit: u32,
        page: u32,
    ) -> Result<Vec<Chat>, WhatsAppError> {
        let params = [
            ("jid", jid.to_owned()),
            ("limit", limit.to_string()),
            ("page", page.to_string()),
        ];
        let body = self.get("contact_chats", user_id, &params).await?;
        field(&body, "chats", json!([]))
    }

    async fn get_last_interaction(
        &self,
        user_id: &str,
        jid: &str,
    ) -> Result<Option<Message>, WhatsAppError> {
        let params = [("jid", jid.to_owned())];
        optional(
            self.get("last_interaction", user_id, &params).await,
            "message",
        )
    }

    async fn sender_name(
        &self,
        user_id: &str,
        sender_jid: &str,
    ) -> Result<Option<String>, WhatsAppError> {
        let params = [("sender_jid", sender_jid.to_owned())];
        let name: Option<String> =
            optional(self.get("sender_name", user_id, &params).await, "name")?;
        Ok(name.filter(|n| !n.trim().is_empty()))
    }

    async fn send_text(
        &self,
        user_id: &str,
        recipient: &str,
        text: &str,
    ) -> Result<SendReceipt, WhatsAppError> {
        self.send(user_id, recipient, json!({ "message": text })).await
    }

    async fn send_media(
        &self,
        user_id: &str,
        recipient: &str,
        path: &Path,
        caption: Option<&str>,
        kind: MediaKind,
    ) -> Result<SendReceipt, WhatsAppError> {
        let mut body = json!({
            "media_path": path.to_string_lossy(),
            "media_kind": kind,
        });
        if let (Some(caption), Some(obj)) = (caption, body.as_object_mut()) {
            obj.insert("caption".to_owned(), Value::String(caption.to_owned()));
        }
        self.send(user_id, recipient, body).await
    }

    async fn fetch_media(
        &self,
        user_id: &str,
        message_id: &str,
        chat_jid: &str,
    ) -> Result<MediaPayload, WhatsAppError> {
        let params = [
            ("message_id", message_id.to_owned()),
            ("chat_jid", chat_jid.to_owned()),
        ];
        let body = self.get("media", user_id, &params).await?;
        media_from_body(message_id, &body)
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }
}
