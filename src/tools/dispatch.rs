//! Single entry point for tool calls.
//!
//! Every call moves through the phases of [`CallPhase`]; each one ends in
//! exactly one [`ToolResult`], whatever happens along the way. Validation
//! failures never reach the WhatsApp client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::adapter::{AdapterOutput, ListMessagesRequest, WhatsAppAdapter};
use super::normalize::{normalize, ToolResult};
use super::schema::ToolRegistry;
use super::validate::{validate, ValidatedArgs};
use super::{ToolError, ToolName};
use crate::whatsapp::{ChatQuery, MessageQuery};

/// Default per-attempt timeout for a client call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

/// Default pause before retrying a read.
pub const DEFAULT_READ_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// An inbound request to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Requested tool name.
    #[serde(rename = "name")]
    pub tool_name: String,
    /// Raw JSON arguments.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// Build a call.
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Accepted, nothing checked yet.
    Received,
    /// Tool resolved and arguments accepted.
    Validated,
    /// Handed to the adapter.
    Dispatched,
    /// Adapter output converted to a result.
    Normalized,
    /// Result handed back to the caller.
    Returned,
    /// Stopped early with an error.
    Failed,
}

/// Timeout and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Budget for each attempt at a client call.
    pub call_timeout: Duration,
    /// Pause before the single retry of a read.
    pub read_retry_backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            read_retry_backoff: DEFAULT_READ_RETRY_BACKOFF,
        }
    }
}

/// Resolves, validates, routes and normalizes tool calls.
///
/// Safe to share across tasks. If the client does not support concurrent
/// calls, client work is serialized behind a session lock while validation
/// stays concurrent.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    adapter: WhatsAppAdapter,
    policy: DispatchPolicy,
    session: Option<Mutex<()>>,
}

impl ToolDispatcher {
    /// Build a dispatcher around an adapter.
    pub fn new(
        registry: Arc<ToolRegistry>,
        adapter: WhatsAppAdapter,
        policy: DispatchPolicy,
    ) -> Self {
        let session = if adapter.client_supports_concurrency() {
            None
        } else {
            Some(Mutex::new(()))
        };
        Self {
            registry,
            adapter,
            policy,
            session,
        }
    }

    /// The tool registry in use.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one call to completion.
    pub async fn handle(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let mut phase = CallPhase::Received;
        debug!(tool = %call.tool_name, ?phase, "tool call");

        let result = match self.run(call, &mut phase).await {
            Ok(result) => result,
            Err(err) => {
                phase = CallPhase::Failed;
                ToolResult::from_error(&err)
            }
        };
        if phase != CallPhase::Failed {
            phase = CallPhase::Returned;
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result.error_kind() {
            None => info!(tool = %call.tool_name, elapsed_ms, ?phase, "tool call succeeded"),
            Some(kind) => warn!(
                tool = %call.tool_name,
                elapsed_ms,
                ?phase,
                error_kind = kind,
                "tool call failed"
            ),
        }
        result
    }

    async fn run(&self, call: &ToolCall, phase: &mut CallPhase) -> Result<ToolResult, ToolError> {
        let spec = self.registry.get_spec(&call.tool_name)?;
        let args = validate(spec, &call.arguments)?;
        let tool = spec.name;
        *phase = CallPhase::Validated;
        debug!(%tool, ?phase, "arguments accepted");

        *phase = CallPhase::Dispatched;
        debug!(%tool, ?phase, "calling WhatsApp client");
        let output = self.invoke_with_policy(tool, &args).await?;

        let result = normalize(output);
        *phase = CallPhase::Normalized;
        debug!(%tool, ?phase, "result normalized");
        Ok(result)
    }

    async fn invoke_with_policy(
        &self,
        tool: ToolName,
        args: &ValidatedArgs,
    ) -> Result<AdapterOutput, ToolError> {
        match self.invoke_once(tool, args).await {
            Err(ToolError::TransportError(reason)) if tool.is_idempotent_read() => {
                warn!(%tool, %reason, "transport error on read, retrying once");
                tokio::time::sleep(self.policy.read_retry_backoff).await;
                self.invoke_once(tool, args).await
            }
            other => other,
        }
    }

    async fn invoke_once(
        &self,
        tool: ToolName,
        args: &ValidatedArgs,
    ) -> Result<AdapterOutput, ToolError> {
        let _session = match &self.session {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        match tokio::time::timeout(self.policy.call_timeout, route(&self.adapter, tool, args)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::TransportError(format!(
                "{tool} timed out after {}s",
                self.policy.call_timeout.as_secs_f32()
            ))),
        }
    }
}

/// Call the adapter method for `tool` with already validated arguments.
async fn route(
    adapter: &WhatsAppAdapter,
    tool: ToolName,
    args: &ValidatedArgs,
) -> Result<AdapterOutput, ToolError> {
    let user = args.str("user_id").unwrap_or_else(|| adapter.default_user());
    match tool {
        ToolName::SearchContacts => {
            adapter
                .search_contacts(user, args.required_str("query")?)
                .await
        }
        ToolName::ListMessages => {
            let request = ListMessagesRequest {
                query: MessageQuery {
                    after: args.string("after"),
                    before: args.string("before"),
                    sender_phone_number: args.string("sender_phone_number"),
                    chat_jid: args.string("chat_jid"),
                    query: args.string("query"),
                    limit: args.u32("limit")?,
                    page: args.u32("page")?,
                },
                include_context: args.bool("include_context")?,
                context_before: args.u32("context_before")?,
                context_after: args.u32("context_after")?,
            };
            adapter.list_messages(user, &request).await
        }
        ToolName::ListChats => {
            let query = ChatQuery {
                query: args.string("query"),
                limit: args.u32("limit")?,
                page: args.u32("page")?,
                include_last_message: args.bool("include_last_message")?,
                sort_by: args.required_str("sort_by")?.to_owned(),
            };
            adapter.list_chats(user, &query).await
        }
        ToolName::GetChat => {
            adapter
                .get_chat(
                    user,
                    args.required_str("chat_jid")?,
                    args.bool("include_last_message")?,
                )
                .await
        }
        ToolName::GetDirectChatByContact => {
            adapter
                .get_direct_chat_by_contact(user, args.required_str("sender_phone_number")?)
                .await
        }
        ToolName::GetContactChats => {
            adapter
                .get_contact_chats(
                    user,
                    args.required_str("jid")?,
                    args.u32("limit")?,
                    args.u32("page")?,
                )
                .await
        }
        ToolName::GetLastInteraction => {
            adapter
                .get_last_interaction(user, args.required_str("jid")?)
                .await
        }
        ToolName::GetMessageContext => {
            adapter
                .get_message_context(
                    user,
                    args.required_str("message_id")?,
                    args.u32("before")?,
                    args.u32("after")?,
                )
                .await
        }
        ToolName::SendMessage => {
            adapter
                .send_message(
                    user,
                    args.required_str("recipient")?,
                    args.required_str("message")?,
                )
                .await
        }
        ToolName::SendFile => {
            adapter
                .send_file(
                    user,
                    args.required_str("recipient")?,
                    &args.path("media_path")?,
                    args.str("caption"),
                )
                .await
        }
        ToolName::SendAudioMessage => {
            adapter
                .send_audio_message(
                    user,
                    args.required_str("recipient")?,
                    &args.path("media_path")?,
                )
                .await
        }
        ToolName::DownloadMedia => {
            adapter
                .download_media(
                    user,
                    args.required_str("message_id")?,
                    args.required_str("chat_jid")?,
                )
                .await
        }
    }
}
