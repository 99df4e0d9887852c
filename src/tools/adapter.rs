//! One method per tool, each mapped onto the [`WhatsAppApi`] capability
//! surface.
//!
//! The adapter never retries; retry and timeout policy belong to the
//! dispatcher. Client errors are translated into [`ToolError`] here because
//! the right kind depends on the operation (a rejected send is `SendFailed`,
//! a rejected read is a `TransportError`).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::media::{mime_for_path, MediaStore};
use super::ToolError;
use crate::whatsapp::client::DEFAULT_USER_ID;
use crate::whatsapp::transcode::{TranscodeError, Transcoder};
use crate::whatsapp::{
    Chat, ChatQuery, Contact, MediaKind, Message, MessageQuery, SendReceipt, WhatsAppApi,
    WhatsAppError,
};

/// Upload ceiling used when nothing is configured (100 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Sender name shown for our own messages.
pub const SELF_SENDER_NAME: &str = "Me";

/// A message in a listing, flagged when it is only there as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedMessage {
    /// The message.
    pub message: Message,
    /// `false` for matches, `true` for surrounding context.
    pub is_context: bool,
}

/// A downloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDownload {
    /// Message the attachment belongs to.
    pub message_id: String,
    /// Where the file was written. Owned by the caller from now on.
    pub local_file_path: PathBuf,
    /// MIME type reported by WhatsApp.
    pub mime_type: String,
    /// File size.
    pub size_bytes: u64,
}

/// Raw result of one adapter operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterOutput {
    /// `search_contacts`
    Contacts(Vec<Contact>),
    /// `list_messages`, `get_message_context`
    Messages(Vec<WindowedMessage>),
    /// `list_chats`, `get_contact_chats`
    Chats(Vec<Chat>),
    /// `get_chat`, `get_direct_chat_by_contact`
    Chat(Chat),
    /// `get_last_interaction`
    Message(Message),
    /// `send_message`, `send_file`, `send_audio_message`
    Sent(SendReceipt),
    /// `download_media`
    Media(MediaDownload),
}

/// Parameters of `list_messages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMessagesRequest {
    /// Filter forwarded to the client.
    pub query: MessageQuery,
    /// Whether to surround each hit with its neighbours.
    pub include_context: bool,
    /// Neighbours before each hit.
    pub context_before: u32,
    /// Neighbours after each hit.
    pub context_after: u32,
}

/// Maps tool operations onto the WhatsApp client and local collaborators.
pub struct WhatsAppAdapter {
    client: Arc<dyn WhatsAppApi>,
    transcoder: Arc<dyn Transcoder>,
    media: MediaStore,
    max_upload_bytes: u64,
    default_user: String,
}

impl WhatsAppAdapter {
    /// Create an adapter.
    pub fn new(
        client: Arc<dyn WhatsAppApi>,
        transcoder: Arc<dyn Transcoder>,
        media: MediaStore,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            client,
            transcoder,
            media,
            max_upload_bytes,
            default_user: DEFAULT_USER_ID.to_owned(),
        }
    }

    /// Act for `user_id` when a call does not name an account.
    #[must_use]
    pub fn with_default_user(mut self, user_id: impl Into<String>) -> Self {
        self.default_user = user_id.into();
        self
    }

    /// Bridge account used when a call does not name one.
    pub fn default_user(&self) -> &str {
        &self.default_user
    }

    /// Whether the underlying client tolerates concurrent calls.
    pub fn client_supports_concurrency(&self) -> bool {
        self.client.supports_concurrent_calls()
    }

    /// Where downloads are written.
    pub fn media_dir(&self) -> &Path {
        self.media.dir()
    }

    /// Contacts matching `query`, best matches first.
    pub async fn search_contacts(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<AdapterOutput, ToolError> {
        let found = self
            .client
            .search_contacts(user_id, query)
            .await
            .map_err(read_error)?;
        Ok(AdapterOutput::Contacts(rank_contacts(query, found)))
    }

    /// Messages matching a filter, optionally with surrounding context.
    pub async fn list_messages(
        &self,
        user_id: &str,
        request: &ListMessagesRequest,
    ) -> Result<AdapterOutput, ToolError> {
        let mut hits = self
            .client
            .list_messages(user_id, &request.query)
            .await
            .map_err(read_error)?;
        // The bridge lists newest first; an over-long page loses its oldest hits.
        hits.truncate(usize::try_from(request.query.limit).unwrap_or(usize::MAX));
        hits.sort_by_key(|m| m.timestamp);

        let wants_context = request.include_context
            && (request.context_before > 0 || request.context_after > 0);
        let mut listed = if wants_context {
            let mut windows = Vec::with_capacity(hits.len());
            for hit in &hits {
                match self
                    .client
                    .message_context(
                        user_id,
                        &hit.id,
                        request.context_before,
                        request.context_after,
                    )
                    .await
                    .map_err(read_error)?
                {
                    Some(ctx) => windows.push((ctx.before, ctx.after)),
                    None => {
                        debug!(message_id = %hit.id, "no context available for hit");
                        windows.push((Vec::new(), Vec::new()));
                    }
                }
            }
            merge_windows(hits, windows)
        } else {
            hits.into_iter()
                .map(|message| WindowedMessage {
                    message,
                    is_context: false,
                })
                .collect()
        };

        self.resolve_sender_names(user_id, listed.iter_mut().map(|w| &mut w.message).collect::<Vec<&mut Message>>()).await;
        Ok(AdapterOutput::Messages(listed))
    }

    /// Chats matching a filter.
    pub async fn list_chats(
        &self,
        user_id: &str,
        query: &ChatQuery,
    ) -> Result<AdapterOutput, ToolError> {
        let mut chats = self
            .client
            .list_chats(user_id, query)
            .await
            .map_err(read_error)?;
        chats.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
        Ok(AdapterOutput::Chats(chats))
    }

    /// A single chat by JID.
    pub async fn get_chat(
        &self,
        user_id: &str,
        chat_jid: &str,
        include_last_message: bool,
    ) -> Result<AdapterOutput, ToolError> {
        self.client
            .get_chat(user_id, chat_jid, include_last_message)
            .await
            .map_err(read_error)?
            .map(AdapterOutput::Chat)
            .ok_or_else(|| ToolError::NotFound(format!("no chat with JID {chat_jid}")))
    }

    /// The direct chat with a phone number.
    pub async fn get_direct_chat_by_contact(
        &self,
        user_id: &str,
        phone_number: &str,
    ) -> Result<AdapterOutput, ToolError> {
        self.client
            .get_direct_chat_by_contact(user_id, phone_number)
            .await
            .map_err(read_error)?
            .map(AdapterOutput::Chat)
            .ok_or_else(|| ToolError::NotFound(format!("no direct chat with {phone_number}")))
    }

    /// Every chat involving a contact.
    pub async fn get_contact_chats(
        &self,
        user_id: &str,
        jid: &str,
        limit: u32,
        page: u32,
    ) -> Result<AdapterOutput, ToolError> {
        let mut chats = self
            .client
            .get_contact_chats(user_id, jid, limit, page)
            .await
            .map_err(read_error)?;
        chats.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(AdapterOutput::Chats(chats))
    }

    /// The most recent message involving a contact.
    pub async fn get_last_interaction(
        &self,
        user_id: &str,
        jid: &str,
    ) -> Result<AdapterOutput, ToolError> {
        let mut message = self
            .client
            .get_last_interaction(user_id, jid)
            .await
            .map_err(read_error)?
            .ok_or_else(|| ToolError::NotFound(format!("no messages involving {jid}")))?;
        self.resolve_sender_names(user_id, std::iter::once(&mut message)).await;
        Ok(AdapterOutput::Message(message))
    }

    /// A message and up to `before`/`after` neighbours, oldest first.
    pub async fn get_message_context(
        &self,
        user_id: &str,
        message_id: &str,
        before: u32,
        after: u32,
    ) -> Result<AdapterOutput, ToolError> {
        let ctx = self
            .client
            .message_context(user_id, message_id, before, after)
            .await
            .map_err(read_error)?
            .ok_or_else(|| ToolError::NotFound(format!("no message with id {message_id}")))?;

        let mut earlier = ctx.before;
        earlier.sort_by_key(|m| m.timestamp);
        let keep_from = earlier
            .len()
            .saturating_sub(usize::try_from(before).unwrap_or(usize::MAX));
        earlier.drain(..keep_from);

        let mut later = ctx.after;
        later.sort_by_key(|m| m.timestamp);
        later.truncate(usize::try_from(after).unwrap_or(usize::MAX));

        let mut window = merge_windows(vec![ctx.message], vec![(earlier, later)]);
        self.resolve_sender_names(user_id, window.iter_mut().map(|w| &mut w.message).collect::<Vec<&mut Message>>()).await;
        Ok(AdapterOutput::Messages(window))
    }

    /// Send a text message.
    pub async fn send_message(
        &self,
        user_id: &str,
        recipient: &str,
        text: &str,
    ) -> Result<AdapterOutput, ToolError> {
        let receipt = self
            .client
            .send_text(user_id, recipient, text)
            .await
            .map_err(send_error)?;
        info!(recipient, "message sent");
        Ok(AdapterOutput::Sent(receipt))
    }

    /// Send a local file as an attachment.
    pub async fn send_file(
        &self,
        user_id: &str,
        recipient: &str,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<AdapterOutput, ToolError> {
        self.check_upload_size(path).await?;
        let receipt = self
            .client
            .send_media(user_id, recipient, path, caption, MediaKind::File)
            .await
            .map_err(send_error)?;
        info!(recipient, path = %path.display(), "file sent");
        Ok(AdapterOutput::Sent(receipt))
    }

    /// Send an audio file as a voice note, converting it to Opus/OGG first
    /// unless it already is one.
    ///
    /// A missing transcoder is reported as
    /// [`ToolError::TranscodeUnavailable`]; the caller decides whether to
    /// fall back to [`Self::send_file`].
    pub async fn send_audio_message(
        &self,
        user_id: &str,
        recipient: &str,
        path: &Path,
    ) -> Result<AdapterOutput, ToolError> {
        self.check_upload_size(path).await?;

        let mime = mime_for_path(path);
        if let Some(mime) = mime {
            if !mime.starts_with("audio/") && !mime.starts_with("video/") {
                return Err(ToolError::UnsupportedMediaType(format!(
                    "{} is {mime}, not audio",
                    path.display()
                )));
            }
        }

        let receipt = if mime == Some("audio/ogg") {
            self.client
                .send_media(user_id, recipient, path, None, MediaKind::VoiceNote)
                .await
                .map_err(send_error)?
        } else {
            let converted = self
                .transcoder
                .to_voice_note(path)
                .await
                .map_err(|e| match e {
                    TranscodeError::Unavailable(reason) => ToolError::TranscodeUnavailable(
                        format!(
                            "cannot convert audio to Opus .ogg ({reason}); install ffmpeg or use send_file instead"
                        ),
                    ),
                    TranscodeError::Failed(reason) => ToolError::UnsupportedMediaType(format!(
                        "{} could not be converted to a voice note: {reason}",
                        path.display()
                    )),
                })?;
            self.client
                .send_media(
                    user_id,
                    recipient,
                    converted.path(),
                    None,
                    MediaKind::VoiceNote,
                )
                .await
                .map_err(send_error)?
        };

        info!(recipient, path = %path.display(), "voice note sent");
        Ok(AdapterOutput::Sent(receipt))
    }

    /// Fetch a message attachment and write it into the media directory.
    pub async fn download_media(
        &self,
        user_id: &str,
        message_id: &str,
        chat_jid: &str,
    ) -> Result<AdapterOutput, ToolError> {
        let payload = self
            .client
            .fetch_media(user_id, message_id, chat_jid)
            .await
            .map_err(read_error)?;
        if payload.bytes.is_empty() {
            return Err(ToolError::NoMediaAttached(format!(
                "message {message_id} has an empty attachment"
            )));
        }

        let file_name =
            MediaStore::file_name_for(message_id, payload.file_name.as_deref(), &payload.mime_type);
        let persisted = self
            .media
            .persist(&file_name, payload.bytes.as_slice())
            .await
            .map_err(|e| ToolError::TransportError(format!("failed to write media: {e}")))?;

        info!(message_id, path = %persisted.path.display(), "media downloaded");
        Ok(AdapterOutput::Media(MediaDownload {
            message_id: message_id.to_owned(),
            local_file_path: persisted.path,
            mime_type: payload.mime_type,
            size_bytes: persisted.size_bytes,
        }))
    }

    /// Fill in `sender_name` on each message, asking the bridge once per
    /// sender. Lookups never fail the call; an unknown sender keeps its JID.
    async fn resolve_sender_names<'m>(
        &self,
        user_id: &str,
        messages: impl IntoIterator<Item = &'m mut Message>,
    ) {
        let mut names: HashMap<String, String> = HashMap::new();
        for message in messages {
            if message.is_from_me {
                message.sender_name = Some(SELF_SENDER_NAME.to_owned());
                continue;
            }
            if message.sender_name.is_some() {
                continue;
            }
            if let Some(name) = names.get(&message.sender) {
                message.sender_name = Some(name.clone());
                continue;
            }
            let name = match self.client.sender_name(user_id, &message.sender).await {
                Ok(Some(name)) => name,
                Ok(None) => message.sender.clone(),
                Err(e) => {
                    debug!(sender = %message.sender, error = %e, "sender name lookup failed");
                    message.sender.clone()
                }
            };
            names.insert(message.sender.clone(), name.clone());
            message.sender_name = Some(name);
        }
    }

    async fn check_upload_size(&self, path: &Path) -> Result<(), ToolError> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            ToolError::constraint("media_path", format!("cannot be read: {e}"))
        })?;
        if meta.len() > self.max_upload_bytes {
            return Err(ToolError::FileTooLarge(format!(
                "{} is {} bytes; the limit is {} bytes",
                path.display(),
                meta.len(),
                self.max_upload_bytes
            )));
        }
        Ok(())
    }
}

/// Translate a client error raised by a read operation.
pub fn read_error(e: WhatsAppError) -> ToolError {
    match e {
        WhatsAppError::NotFound(m) => ToolError::NotFound(m),
        WhatsAppError::NoMedia(m) => ToolError::NoMediaAttached(m),
        other => ToolError::TransportError(other.to_string()),
    }
}

/// Translate a client error raised by a send operation.
pub fn send_error(e: WhatsAppError) -> ToolError {
    match e {
        WhatsAppError::FileTooLarge(m) => ToolError::FileTooLarge(m),
        WhatsAppError::UnsupportedMedia(m) => ToolError::UnsupportedMediaType(m),
        other => ToolError::SendFailed(other.to_string()),
    }
}

/// Order contacts exact match first, then prefix, then substring, then the
/// rest; drop duplicate JIDs.
pub fn rank_contacts(query: &str, contacts: Vec<Contact>) -> Vec<Contact> {
    let needle = query.trim().to_lowercase();
    let digits: String = needle.chars().filter(char::is_ascii_digit).collect();

    let score = |c: &Contact| -> u8 {
        let name = c.name.as_deref().unwrap_or_default().to_lowercase();
        let fields = [name.as_str(), c.phone_number.as_str(), c.jid.as_str()];
        let phone_hit =
            |f: fn(&str, &str) -> bool| !digits.is_empty() && f(&c.phone_number, &digits);
        if fields.iter().any(|f| *f == needle) || phone_hit(|a, b| a == b) {
            0
        } else if fields.iter().any(|f| f.starts_with(&needle))
            || phone_hit(|a, b| a.starts_with(b))
        {
            1
        } else if fields.iter().any(|f| f.contains(&needle)) || phone_hit(|a, b| a.contains(b)) {
            2
        } else {
            3
        }
    };

    let mut seen = HashSet::new();
    let mut unique: Vec<Contact> = contacts
        .into_iter()
        .filter(|c| seen.insert(c.jid.clone()))
        .collect();
    unique.sort_by_key(|c| score(c));
    unique
}

/// Flatten hits and their context windows into one chronological list.
///
/// Each hit is expanded to `before ++ [hit] ++ after`. Messages are ordered
/// by timestamp; ties keep their order within that sequence, so context never
/// crosses to the wrong side of a hit sent in the same second. A message
/// appearing in several windows is listed once; if any occurrence is a hit
/// it stays a hit.
pub fn merge_windows(
    hits: Vec<Message>,
    windows: Vec<(Vec<Message>, Vec<Message>)>,
) -> Vec<WindowedMessage> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<(WindowedMessage, (usize, usize))> = Vec::new();
    let mut windows = windows.into_iter();

    for (window_no, hit) in hits.into_iter().enumerate() {
        let (before, after) = windows.next().unwrap_or_default();
        let sequence = before
            .into_iter()
            .map(|m| (m, true))
            .chain(std::iter::once((hit, false)))
            .chain(after.into_iter().map(|m| (m, true)));

        for (position, (message, is_context)) in sequence.enumerate() {
            match slots.get(&message.id) {
                Some(&slot) => {
                    if let (false, Some((entry, _))) = (is_context, merged.get_mut(slot)) {
                        entry.is_context = false;
                    }
                }
                None => {
                    slots.insert(message.id.clone(), merged.len());
                    merged.push((
                        WindowedMessage {
                            message,
                            is_context,
                        },
                        (window_no, position),
                    ));
                }
            }
        }
    }

    merged.sort_by(|(a, a_key), (b, b_key)| {
        a.message
            .timestamp
            .cmp(&b.message.timestamp)
            .then(a_key.cmp(b_key))
    });
    merged.into_iter().map(|(windowed, _)| windowed).collect()
}
