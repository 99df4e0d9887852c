//! WhatsApp collaborator: domain snapshots, the client capability trait, the
//! HTTP bridge client and the audio transcoder.
//!
//! Everything the tool layer knows about WhatsApp goes through
//! [`WhatsAppApi`]. The production implementation is
//! [`client::BridgeClient`], which talks to a WhatsApp bridge over HTTP.

pub mod client;
pub mod time;
pub mod transcode;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix carried by every group chat JID.
pub const GROUP_JID_SUFFIX: &str = "@g.us";

/// Errors from the WhatsApp bridge.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to the bridge failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge is running but WhatsApp is not connected.
    #[error("not connected to WhatsApp")]
    NotConnected,

    /// The requested entity does not exist on the bridge.
    #[error("not found: {0}")]
    NotFound(String),

    /// The message exists but carries no attachment.
    #[error("message has no media: {0}")]
    NoMedia(String),

    /// The recipient is not a known contact.
    #[error("recipient is not a contact: {0}")]
    NotAContact(String),

    /// Outbound message was rate-limited.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The bridge refused an attachment because of its size.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// The bridge refused an attachment because of its type.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// The bridge rejected the request for another reason.
    #[error("bridge rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the bridge.
        status: u16,
        /// Error text from the bridge body.
        message: String,
    },

    /// The bridge answered with a body we could not interpret.
    #[error("invalid bridge response: {0}")]
    InvalidResponse(String),
}

/// A WhatsApp contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Phone number with country code, digits only.
    pub phone_number: String,
    /// Display name, if known.
    #[serde(default)]
    pub name: Option<String>,
    /// WhatsApp JID.
    pub jid: String,
}

/// A chat (direct or group) as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Chat JID.
    pub jid: String,
    /// Chat or contact name, if known.
    #[serde(default)]
    pub name: Option<String>,
    /// Time of the most recent message.
    #[serde(default, with = "time::option")]
    pub last_message_time: Option<DateTime<Utc>>,
    /// Text of the most recent message.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Sender of the most recent message.
    #[serde(default)]
    pub last_sender: Option<String>,
    /// Whether the most recent message was sent by us.
    #[serde(default)]
    pub last_is_from_me: Option<bool>,
}

impl Chat {
    /// Whether this chat is a group, judged by its JID.
    pub fn is_group(&self) -> bool {
        self.jid.ends_with(GROUP_JID_SUFFIX)
    }
}

/// A single message snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Bridge-assigned message identifier.
    pub id: String,
    /// JID of the chat the message belongs to.
    pub chat_jid: String,
    /// Name of that chat, if the bridge supplied it.
    #[serde(default)]
    pub chat_name: Option<String>,
    /// Sender JID or phone number.
    pub sender: String,
    /// Display name of the sender, once resolved.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Send time.
    #[serde(with = "time::required")]
    pub timestamp: DateTime<Utc>,
    /// Text content (`content` on the bridge wire).
    #[serde(rename = "content", default)]
    pub body: String,
    /// Whether we sent it.
    #[serde(default)]
    pub is_from_me: bool,
    /// Attachment kind (`image`, `audio`, ...), when there is one.
    #[serde(default)]
    pub media_type: Option<String>,
}

impl Message {
    /// Whether the message carries an attachment.
    pub fn has_media(&self) -> bool {
        self.media_type.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// A message with its neighbours in the same chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    /// The message the context was requested for.
    pub message: Message,
    /// Earlier messages, oldest first.
    #[serde(default)]
    pub before: Vec<Message>,
    /// Later messages, oldest first.
    #[serde(default)]
    pub after: Vec<Message>,
}

/// Confirmation returned by the bridge after a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Identifier of the sent message. Older bridges do not report one.
    pub message_id: Option<String>,
    /// When the bridge accepted it.
    #[serde(with = "time::required")]
    pub timestamp: DateTime<Utc>,
    /// Recipient as submitted.
    pub recipient: String,
    /// Status text from the bridge.
    pub status: String,
}

/// Attachment bytes fetched from the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    /// Raw attachment bytes.
    pub bytes: Vec<u8>,
    /// MIME type reported by the bridge.
    pub mime_type: String,
    /// Original file name, if the bridge knows it.
    pub file_name: Option<String>,
}

/// How an outgoing attachment should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Regular attachment (image, video, document, raw audio).
    File,
    /// Push-to-talk voice note; the file must already be Opus/OGG.
    VoiceNote,
}

/// Filter for message listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQuery {
    /// Only messages after this ISO-8601 instant.
    pub after: Option<String>,
    /// Only messages before this ISO-8601 instant.
    pub before: Option<String>,
    /// Only messages from this sender.
    pub sender_phone_number: Option<String>,
    /// Only messages in this chat.
    pub chat_jid: Option<String>,
    /// Content search term.
    pub query: Option<String>,
    /// Page size.
    pub limit: u32,
    /// Zero-based page.
    pub page: u32,
}

/// Filter for chat listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatQuery {
    /// Name or JID search term.
    pub query: Option<String>,
    /// Page size.
    pub limit: u32,
    /// Zero-based page.
    pub page: u32,
    /// Whether to populate the `last_*` fields.
    pub include_last_message: bool,
    /// `last_active` or `name`.
    pub sort_by: String,
}

/// Capability surface of the external WhatsApp client.
///
/// Every method is a single round-trip; implementations must not retry.
/// `user_id` selects the bridge account the call acts for. Lookups that
/// address exactly one entity return `Ok(None)` when it does not exist,
/// leaving the caller to decide how absence is reported.
#[async_trait]
pub trait WhatsAppApi: Send + Sync {
    /// Search contacts by name or phone number.
    async fn search_contacts(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<Contact>, WhatsAppError>;

    /// List messages matching a filter.
    async fn list_messages(
        &self,
        user_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, WhatsAppError>;

    /// Fetch a message with up to `before`/`after` neighbours.
    async fn message_context(
        &self,
        user_id: &str,
        message_id: &str,
        before: u32,
        after: u32,
    ) -> Result<Option<MessageContext>, WhatsAppError>;

    /// List chats matching a filter.
    async fn list_chats(
        &self,
        user_id: &str,
        query: &ChatQuery,
    ) -> Result<Vec<Chat>, WhatsAppError>;

    /// Fetch one chat by JID.
    async fn get_chat(
        &self,
        user_id: &str,
        chat_jid: &str,
        include_last_message: bool,
    ) -> Result<Option<Chat>, WhatsAppError>;

    /// Fetch the direct chat with a phone number.
    async fn get_direct_chat_by_contact(
        &self,
        user_id: &str,
        phone_number: &str,
    ) -> Result<Option<Chat>, WhatsAppError>;

    /// List every chat involving a contact.
    async fn get_contact_chats(
        &self,
        user_id: &str,
        jid: &str,
        limit: u32,
        page: u32,
    ) -> Result<Vec<Chat>, WhatsAppError>;

    /// Most recent message involving a contact.
    async fn get_last_interaction(
        &self,
        user_id: &str,
        jid: &str,
    ) -> Result<Option<Message>, WhatsAppError>;

    /// Display name of a sender, if the bridge knows one.
    async fn sender_name(
        &self,
        user_id: &str,
        sender_jid: &str,
    ) -> Result<Option<String>, WhatsAppError>;

    /// Send a text message.
    async fn send_text(
        &self,
        user_id: &str,
        recipient: &str,
        text: &str,
    ) -> Result<SendReceipt, WhatsAppError>;

    /// Send a local file as an attachment.
    async fn send_media(
        &self,
        user_id: &str,
        recipient: &str,
        path: &Path,
        caption: Option<&str>,
        kind: MediaKind,
    ) -> Result<SendReceipt, WhatsAppError>;

    /// Fetch the attachment of a message.
    async fn fetch_media(
        &self,
        user_id: &str,
        message_id: &str,
        chat_jid: &str,
    ) -> Result<MediaPayload, WhatsAppError>;

    /// Whether concurrent calls on one session are safe.
    ///
    /// When `false` the dispatcher serializes every call.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }
}
