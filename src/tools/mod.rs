//! WhatsApp tools exposed over MCP.
//!
//! A call flows through [`dispatch::ToolDispatcher`]: the tool name is
//! resolved against the [`schema::ToolRegistry`], arguments are checked by
//! [`validate::validate`], the matching [`adapter::WhatsAppAdapter`] method
//! runs against the WhatsApp client, and [`normalize::normalize`] turns its
//! output into a [`normalize::ToolResult`].

pub mod adapter;
pub mod dispatch;
pub mod media;
pub mod normalize;
pub mod schema;
pub mod validate;

use std::fmt;
use std::str::FromStr;

pub use dispatch::{ToolCall, ToolDispatcher};
pub use normalize::{ToolResult, ToolStatus};
pub use schema::ToolRegistry;

/// The closed set of tools this server offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    /// `search_contacts`
    SearchContacts,
    /// `list_messages`
    ListMessages,
    /// `list_chats`
    ListChats,
    /// `get_chat`
    GetChat,
    /// `get_direct_chat_by_contact`
    GetDirectChatByContact,
    /// `get_contact_chats`
    GetContactChats,
    /// `get_last_interaction`
    GetLastInteraction,
    /// `get_message_context`
    GetMessageContext,
    /// `send_message`
    SendMessage,
    /// `send_file`
    SendFile,
    /// `send_audio_message`
    SendAudioMessage,
    /// `download_media`
    DownloadMedia,
}

impl ToolName {
    /// Every tool, in listing order.
    pub const ALL: [ToolName; 12] = [
        ToolName::SearchContacts,
        ToolName::ListMessages,
        ToolName::ListChats,
        ToolName::GetChat,
        ToolName::GetDirectChatByContact,
        ToolName::GetContactChats,
        ToolName::GetLastInteraction,
        ToolName::GetMessageContext,
        ToolName::SendMessage,
        ToolName::SendFile,
        ToolName::SendAudioMessage,
        ToolName::DownloadMedia,
    ];

    /// Wire name of the tool.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::SearchContacts => "search_contacts",
            ToolName::ListMessages => "list_messages",
            ToolName::ListChats => "list_chats",
            ToolName::GetChat => "get_chat",
            ToolName::GetDirectChatByContact => "get_direct_chat_by_contact",
            ToolName::GetContactChats => "get_contact_chats",
            ToolName::GetLastInteraction => "get_last_interaction",
            ToolName::GetMessageContext => "get_message_context",
            ToolName::SendMessage => "send_message",
            ToolName::SendFile => "send_file",
            ToolName::SendAudioMessage => "send_audio_message",
            ToolName::DownloadMedia => "download_media",
        }
    }

    /// Whether the tool only reads state and may be retried after a
    /// transport failure.
    pub fn is_idempotent_read(self) -> bool {
        !matches!(
            self,
            ToolName::SendMessage
                | ToolName::SendFile
                | ToolName::SendAudioMessage
                | ToolName::DownloadMedia
        )
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ToolError::UnknownTool(s.to_owned()))
    }
}

/// Errors surfaced at the tool boundary.
///
/// The first five variants come from validation and never reach the
/// WhatsApp client. The rest are raised while talking to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name exists.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A required argument was not supplied.
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    /// An argument has the wrong JSON type.
    #[error("argument '{name}' must be {expected}, got {actual}")]
    TypeMismatch {
        /// Argument name.
        name: String,
        /// Expected type.
        expected: String,
        /// Type actually received.
        actual: String,
    },

    /// An argument has the right type but an unacceptable value.
    #[error("argument '{name}' {rule}")]
    ConstraintViolation {
        /// Argument name.
        name: String,
        /// The rule it broke.
        rule: String,
    },

    /// An argument not declared by the tool was supplied.
    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    /// The addressed chat, message or contact does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The message exists but has no attachment.
    #[error("message has no media attached: {0}")]
    NoMediaAttached(String),

    /// WhatsApp refused or could not deliver the message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The attachment exceeds the upload limit.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// The attachment type cannot be sent this way.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// No audio transcoder is available; use `send_file` instead.
    #[error("{0}")]
    TranscodeUnavailable(String),

    /// The WhatsApp client could not be reached or timed out.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl ToolError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "UnknownTool",
            ToolError::MissingArgument(_) => "MissingArgument",
            ToolError::TypeMismatch { .. } => "TypeMismatch",
            ToolError::ConstraintViolation { .. } => "ConstraintViolation",
            ToolError::UnexpectedArgument(_) => "UnexpectedArgument",
            ToolError::NotFound(_) => "NotFound",
            ToolError::NoMediaAttached(_) => "NoMediaAttached",
            ToolError::SendFailed(_) => "SendFailed",
            ToolError::FileTooLarge(_) => "FileTooLarge",
            ToolError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            ToolError::TranscodeUnavailable(_) => "TranscodeUnavailable",
            ToolError::TransportError(_) => "TransportError",
        }
    }

    /// Whether the error was raised before the WhatsApp client was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ToolError::UnknownTool(_)
                | ToolError::MissingArgument(_)
                | ToolError::TypeMismatch { .. }
                | ToolError::ConstraintViolation { .. }
                | ToolError::UnexpectedArgument(_)
        )
    }

    pub(crate) fn constraint(name: &str, rule: impl Into<String>) -> Self {
        ToolError::ConstraintViolation {
            name: name.to_owned(),
            rule: rule.into(),
        }
    }
}
