//! Shared fixtures for the tools tests: an in-memory WhatsApp client and a
//! fake transcoder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use whatsapp_mcp::tools::adapter::WhatsAppAdapter;
use whatsapp_mcp::tools::dispatch::DispatchPolicy;
use whatsapp_mcp::tools::media::MediaStore;
use whatsapp_mcp::tools::{ToolDispatcher, ToolRegistry};
use whatsapp_mcp::whatsapp::time::parse_timestamp;
use whatsapp_mcp::whatsapp::transcode::{TranscodeError, TranscodedAudio, Transcoder};
use whatsapp_mcp::whatsapp::{
    Chat, ChatQuery, Contact, MediaKind, MediaPayload, Message, MessageContext, MessageQuery,
    SendReceipt, WhatsAppApi, WhatsAppError,
};

pub const ALICE_PHONE: &str = "15551234567";
pub const ALICE_JID: &str = "15551234567@s.whatsapp.net";
pub const FAMILY_JID: &str = "120363000000000001@g.us";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0)
        .single()
        .expect("valid fixture time")
}

pub fn message(id: &str, chat_jid: &str, sender: &str, minute: u32, body: &str) -> Message {
    Message {
        id: id.to_owned(),
        chat_jid: chat_jid.to_owned(),
        chat_name: None,
        sender: sender.to_owned(),
        sender_name: None,
        timestamp: at(minute),
        body: body.to_owned(),
        is_from_me: sender == "me",
        media_type: None,
    }
}

pub fn contact(name: &str, phone: &str) -> Contact {
    Contact {
        phone_number: phone.to_owned(),
        name: Some(name.to_owned()),
        jid: format!("{phone}@s.whatsapp.net"),
    }
}

fn chat(jid: &str, name: &str, last: &Message) -> Chat {
    Chat {
        jid: jid.to_owned(),
        name: Some(name.to_owned()),
        last_message_time: Some(last.timestamp),
        last_message: Some(last.body.clone()),
        last_sender: Some(last.sender.clone()),
        last_is_from_me: Some(last.is_from_me),
    }
}

// ---------------------------------------------------------------------------
// Mock client
// ---------------------------------------------------------------------------

/// A send the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentItem {
    pub recipient: String,
    pub text: Option<String>,
    pub path: Option<PathBuf>,
    pub kind: Option<MediaKind>,
    pub caption: Option<String>,
}

/// In-memory bridge with call counters and failure injection.
pub struct MockWhatsApp {
    pub contacts: Vec<Contact>,
    pub chats: Vec<Chat>,
    /// Full history, oldest first.
    pub history: Vec<Message>,
    pub media: HashMap<String, MediaPayload>,
    pub concurrent: bool,
    pub reject_sends: Option<String>,
    pub delay: Option<Duration>,
    /// Return every matching message, ignoring `limit`.
    pub ignore_limit: bool,
    /// Reads that fail with `NotConnected` before the mock recovers.
    pub transient_failures: AtomicUsize,
    pub calls: AtomicUsize,
    /// Account named by every call that reached the mock, in order.
    pub users: Mutex<Vec<String>>,
    /// Sender name lookups, which are not counted in `calls`.
    pub name_lookups: AtomicUsize,
    pub sent: Mutex<Vec<SentItem>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockWhatsApp {
    /// A small account: a direct chat with Alice holding five messages and
    /// a family group with three, one of them an image.
    pub fn seeded() -> Self {
        let history = vec![
            message("m1", ALICE_JID, ALICE_PHONE, 1, "are we still on for lunch"),
            message("f1", FAMILY_JID, "15550009999", 2, "dinner at 7"),
            message("m2", ALICE_JID, "me", 3, "yes, noon works"),
            message("abc", ALICE_JID, ALICE_PHONE, 4, "great, the usual place?"),
            Message {
                media_type: Some("image".to_owned()),
                ..message("f2", FAMILY_JID, "15550009999", 5, "look at this")
            },
            message("m4", ALICE_JID, "me", 6, "sure"),
            message("f3", FAMILY_JID, "me", 7, "lunch was great"),
            message("m5", ALICE_JID, ALICE_PHONE, 8, "see you there"),
        ];

        let chats = vec![
            chat(FAMILY_JID, "Family", &history[6]),
            chat(ALICE_JID, "Alice", &history[7]),
        ];

        let contacts = vec![
            contact("Malice", "15550003333"),
            contact("Alice Smith", "15550002222"),
            contact("Alice", ALICE_PHONE),
            contact("Bob", "15550004444"),
            contact("Alice", ALICE_PHONE),
        ];

        let mut media = HashMap::new();
        media.insert(
            "f2".to_owned(),
            MediaPayload {
                bytes: b"\x89PNG\r\n\x1a\nfake-image-bytes".to_vec(),
                mime_type: "image/png".to_owned(),
                file_name: Some("photo.png".to_owned()),
            },
        );

        Self {
            contacts,
            chats,
            history,
            media,
            concurrent: true,
            reject_sends: None,
            delay: None,
            ignore_limit: false,
            transient_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            users: Mutex::new(Vec::new()),
            name_lookups: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn users(&self) -> Vec<String> {
        self.users.lock().expect("users lock").clone()
    }

    async fn enter(&self, user_id: &str, is_read: bool) -> Result<InFlight<'_>, WhatsAppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.users
            .lock()
            .expect("users lock")
            .push(user_id.to_owned());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if is_read
            && self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(WhatsAppError::NotConnected);
        }
        Ok(guard)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.history.iter().position(|m| m.id == id)
    }

    fn record(&self, item: SentItem) -> Result<SendReceipt, WhatsAppError> {
        if let Some(reason) = &self.reject_sends {
            return Err(WhatsAppError::NotAContact(reason.clone()));
        }
        let mut sent = self.sent.lock().expect("sent lock");
        let receipt = SendReceipt {
            message_id: Some(format!("sent-{}", sent.len())),
            timestamp: at(30),
            recipient: item.recipient.clone(),
            status: "Message sent".to_owned(),
        };
        sent.push(item);
        Ok(receipt)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn page<T: Clone>(items: &[T], limit: u32, page: u32) -> Vec<T> {
    let limit = usize::try_from(limit).expect("limit fits");
    let skip = usize::try_from(page)
        .expect("page fits")
        .saturating_mul(limit);
    items.iter().skip(skip).take(limit).cloned().collect()
}

fn phone_of(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

#[async_trait]
impl WhatsAppApi for MockWhatsApp {
    async fn search_contacts(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<Contact>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        let q = query.to_lowercase();
        Ok(self
            .contacts
            .iter()
            .filter(|c| {
                c.name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase().contains(&q))
                    || c.phone_number.contains(&q)
            })
            .cloned()
            .collect())
    }

    async fn list_messages(
        &self,
        user_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        let after = query.after.as_deref().and_then(parse_timestamp);
        let before = query.before.as_deref().and_then(parse_timestamp);
        // Newest first, like the bridge.
        let matching: Vec<Message> = self
            .history
            .iter()
            .rev()
            .filter(|m| query.chat_jid.as_deref().is_none_or(|j| m.chat_jid == j))
            .filter(|m| {
                query
                    .sender_phone_number
                    .as_deref()
                    .is_none_or(|s| m.sender == s)
            })
            .filter(|m| query.query.as_deref().is_none_or(|q| m.body.contains(q)))
            .filter(|m| after.is_none_or(|t| m.timestamp > t))
            .filter(|m| before.is_none_or(|t| m.timestamp < t))
            .cloned()
            .collect();
        let limit = if self.ignore_limit {
            u32::MAX
        } else {
            query.limit
        };
        Ok(page(&matching, limit, query.page))
    }

    async fn message_context(
        &self,
        user_id: &str,
        message_id: &str,
        before: u32,
        after: u32,
    ) -> Result<Option<MessageContext>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        let Some(pos) = self.position(message_id) else {
            return Ok(None);
        };
        let target = self.history[pos].clone();
        let same_chat = |m: &&Message| m.chat_jid == target.chat_jid;

        let mut earlier: Vec<Message> = self.history[..pos]
            .iter()
            .rev()
            .filter(same_chat)
            .take(usize::try_from(before).expect("fits"))
            .cloned()
            .collect();
        earlier.reverse();
        let later: Vec<Message> = self.history[pos..]
            .iter()
            .skip(1)
            .filter(same_chat)
            .take(usize::try_from(after).expect("fits"))
            .cloned()
            .collect();

        Ok(Some(MessageContext {
            message: target,
            before: earlier,
            after: later,
        }))
    }

    async fn list_chats(
        &self,
        user_id: &str,
        query: &ChatQuery,
    ) -> Result<Vec<Chat>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        let mut chats: Vec<Chat> = self
            .chats
            .iter()
            .filter(|c| {
                query.query.as_deref().is_none_or(|q| {
                    c.jid.contains(q) || c.name.as_deref().is_some_and(|n| n.contains(q))
                })
            })
            .cloned()
            .collect();
        if query.sort_by == "name" {
            chats.sort_by(|a, b| a.name.cmp(&b.name));
        } else {
            chats.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        }
        Ok(page(&chats, query.limit, query.page))
    }

    async fn get_chat(
        &self,
        user_id: &str,
        chat_jid: &str,
        include_last_message: bool,
    ) -> Result<Option<Chat>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        Ok(self.chats.iter().find(|c| c.jid == chat_jid).map(|c| {
            let mut c = c.clone();
            if !include_last_message {
                c.last_message = None;
                c.last_sender = None;
                c.last_is_from_me = None;
            }
            c
        }))
    }

    async fn get_direct_chat_by_contact(
        &self,
        user_id: &str,
        phone_number: &str,
    ) -> Result<Option<Chat>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        let jid = format!("{phone_number}@s.whatsapp.net");
        Ok(self.chats.iter().find(|c| c.jid == jid).cloned())
    }

    async fn get_contact_chats(
        &self,
        user_id: &str,
        jid: &str,
        limit: u32,
        page_no: u32,
    ) -> Result<Vec<Chat>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        let phone = phone_of(jid);
        let chats: Vec<Chat> = self
            .chats
            .iter()
            .filter(|c| {
                c.jid == jid
                    || self
                        .history
                        .iter()
                        .any(|m| m.chat_jid == c.jid && m.sender == phone)
            })
            .cloned()
            .collect();
        Ok(page(&chats, limit, page_no))
    }

    async fn get_last_interaction(
        &self,
        user_id: &str,
        jid: &str,
    ) -> Result<Option<Message>, WhatsAppError> {
        let _g = self.enter(user_id, true).await?;
        let phone = phone_of(jid);
        Ok(self
            .history
            .iter()
            .rev()
            .find(|m| m.chat_jid == jid || m.sender == phone)
            .cloned())
    }

    async fn sender_name(
        &self,
        _user_id: &str,
        sender_jid: &str,
    ) -> Result<Option<String>, WhatsAppError> {
        self.name_lookups.fetch_add(1, Ordering::SeqCst);
        let phone = phone_of(sender_jid);
        Ok(self
            .contacts
            .iter()
            .find(|c| c.phone_number == phone)
            .and_then(|c| c.name.clone()))
    }

    async fn send_text(
        &self,
        user_id: &str,
        recipient: &str,
        text: &str,
    ) -> Result<SendReceipt, WhatsAppError> {
        let _g = self.enter(user_id, false).await?;
        self.record(SentItem {
            recipient: recipient.to_owned(),
            text: Some(text.to_owned()),
            path: None,
            kind: None,
            caption: None,
        })
    }

    async fn send_media(
        &self,
        user_id: &str,
        recipient: &str,
        path: &Path,
        caption: Option<&str>,
        kind: MediaKind,
    ) -> Result<SendReceipt, WhatsAppError> {
        let _g = self.enter(user_id, false).await?;
        assert!(path.is_file(), "media must exist while it is sent");
        self.record(SentItem {
            recipient: recipient.to_owned(),
            text: None,
            path: Some(path.to_path_buf()),
            kind: Some(kind),
            caption: caption.map(str::to_owned),
        })
    }

    async fn fetch_media(
        &self,
        user_id: &str,
        message_id: &str,
        _chat_jid: &str,
    ) -> Result<MediaPayload, WhatsAppError> {
        let _g = self.enter(user_id, false).await?;
        if self.position(message_id).is_none() {
            return Err(WhatsAppError::NotFound(format!("message {message_id}")));
        }
        self.media
            .get(message_id)
            .cloned()
            .ok_or_else(|| WhatsAppError::NoMedia(format!("message {message_id}")))
    }

    fn supports_concurrent_calls(&self) -> bool {
        self.concurrent
    }
}

// ---------------------------------------------------------------------------
// Fake transcoder
// ---------------------------------------------------------------------------

/// Writes a small placeholder `.ogg` instead of running ffmpeg.
pub struct FakeTranscoder {
    pub fail_with: Option<TranscodeError>,
    pub calls: AtomicUsize,
}

impl FakeTranscoder {
    pub fn working() -> Self {
        Self {
            fail_with: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn missing() -> Self {
        Self {
            fail_with: Some(TranscodeError::Unavailable("ffmpeg not found".to_owned())),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn to_voice_note(&self, input: &Path) -> Result<TranscodedAudio, TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        assert!(input.is_file());
        let file = tempfile::Builder::new()
            .prefix("fake-voice-")
            .suffix(".ogg")
            .tempfile()
            .expect("temp output");
        std::fs::write(file.path(), b"OggS fake").expect("write fake ogg");
        Ok(TranscodedAudio::new(file.into_temp_path()))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn fast_policy() -> DispatchPolicy {
    DispatchPolicy {
        call_timeout: Duration::from_secs(5),
        read_retry_backoff: Duration::from_millis(1),
    }
}

pub fn dispatcher_with(
    mock: Arc<MockWhatsApp>,
    transcoder: Arc<dyn Transcoder>,
    download_dir: &Path,
    policy: DispatchPolicy,
) -> ToolDispatcher {
    let adapter = WhatsAppAdapter::new(
        mock,
        transcoder,
        MediaStore::new(download_dir),
        1024 * 1024,
    );
    ToolDispatcher::new(Arc::new(ToolRegistry::builtin()), adapter, policy)
}

pub fn dispatcher(mock: Arc<MockWhatsApp>, download_dir: &Path) -> ToolDispatcher {
    dispatcher_with(
        mock,
        Arc::new(FakeTranscoder::working()),
        download_dir,
        fast_policy(),
    )
}
