//! Static tool definitions.
//!
//! Every tool is described once by [`build_spec`], an exhaustive match over
//! [`ToolName`]. The [`ToolRegistry`] is built from those specs at startup
//! and is never mutated afterwards.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{ToolError, ToolName};

/// Default page size for listing tools.
pub const DEFAULT_LIMIT: i64 = 20;

/// Largest page size a caller may request.
pub const MAX_LIMIT: i64 = 100;

/// Largest page index a caller may request.
pub const MAX_PAGE: i64 = 10_000;

/// Largest context window on either side of a message.
pub const MAX_CONTEXT: i64 = 50;

const RECIPIENT_DESCRIPTION: &str = "The recipient - either a phone number with country code but no + or other symbols, or a JID (e.g., \"123456789@s.whatsapp.net\" or a group JID like \"123456789@g.us\")";

/// JSON-level kind of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Any string.
    String,
    /// Whole number within an inclusive range.
    Integer {
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },
    /// `true` or `false`.
    Boolean,
    /// One of a fixed set of strings.
    Enum(&'static [&'static str]),
    /// Local filesystem path, as a string.
    Path,
}

impl ParamKind {
    /// JSON Schema type name.
    pub fn json_type(self) -> &'static str {
        match self {
            ParamKind::String | ParamKind::Enum(_) | ParamKind::Path => "string",
            ParamKind::Integer { .. } => "integer",
            ParamKind::Boolean => "boolean",
        }
    }
}

/// Domain rule applied after the type check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Looks like a WhatsApp JID (`user@server`).
    Jid,
    /// Country code plus number, digits only.
    PhoneNumber,
    /// Phone number or JID.
    Recipient,
    /// Not empty after trimming.
    NonEmpty,
    /// RFC 3339 or ISO-8601 date/time.
    IsoDateTime,
    /// Absolute path to an existing, readable regular file.
    ExistingFile,
}

impl Constraint {
    /// Human-readable statement of the rule.
    pub fn rule(self) -> &'static str {
        match self {
            Constraint::Jid => "must look like a JID (e.g. 123456789@s.whatsapp.net)",
            Constraint::PhoneNumber => {
                "must be a phone number with country code, digits only (7-15 digits)"
            }
            Constraint::Recipient => "must be a phone number (digits only) or a JID",
            Constraint::NonEmpty => "must not be empty",
            Constraint::IsoDateTime => "must be an ISO-8601 date or date-time",
            Constraint::ExistingFile => "must be an absolute path to an existing readable file",
        }
    }
}

/// Value used when an optional parameter is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    /// Integer default.
    Integer(i64),
    /// Boolean default.
    Boolean(bool),
    /// String default.
    String(&'static str),
}

impl ParamDefault {
    /// The default as JSON.
    pub fn to_value(self) -> Value {
        match self {
            ParamDefault::Integer(n) => json!(n),
            ParamDefault::Boolean(b) => json!(b),
            ParamDefault::String(s) => json!(s),
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    /// Canonical name.
    pub name: &'static str,
    /// JSON-level kind.
    pub kind: ParamKind,
    /// Whether the caller must supply it.
    pub required: bool,
    /// Value filled in when omitted.
    pub default: Option<ParamDefault>,
    /// Alternative names accepted on input.
    pub aliases: &'static [&'static str],
    /// Domain rules checked after the type.
    pub constraints: &'static [Constraint],
    /// Description shown to the model.
    pub description: &'static str,
}

impl ParamSpec {
    fn new(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            aliases: &[],
            constraints: &[],
            description,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn default(mut self, value: ParamDefault) -> Self {
        self.default = Some(value);
        self
    }

    fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    fn constrained(mut self, constraints: &'static [Constraint]) -> Self {
        self.constraints = constraints;
        self
    }

    /// Whether `key` names this parameter, directly or via an alias.
    pub fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.aliases.contains(&key)
    }

    fn json_schema(&self) -> Value {
        self.property(self.description)
    }

    fn property(&self, description: &str) -> Value {
        let mut prop = Map::new();
        prop.insert("type".to_owned(), json!(self.kind.json_type()));
        prop.insert("description".to_owned(), json!(description));
        match self.kind {
            ParamKind::Integer { min, max } => {
                prop.insert("minimum".to_owned(), json!(min));
                prop.insert("maximum".to_owned(), json!(max));
            }
            ParamKind::Enum(values) => {
                prop.insert("enum".to_owned(), json!(values));
            }
            _ => {}
        }
        if let Some(default) = self.default {
            prop.insert("default".to_owned(), default.to_value());
        }
        Value::Object(prop)
    }
}

/// Declaration of one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Which tool.
    pub name: ToolName,
    /// Description shown to the model.
    pub description: &'static str,
    /// Parameters in declaration order.
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    /// Find the parameter `key` refers to, by name or alias.
    pub fn param(&self, key: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.answers_to(key))
    }

    /// JSON Schema for the tool arguments.
    ///
    /// Aliases are declared as properties of their own so a closed schema
    /// still admits them. A required parameter with aliases is satisfied by
    /// any one of its names, expressed as an `anyOf` under `allOf`.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        let mut alternatives = Vec::new();
        for param in &self.params {
            properties.insert(param.name.to_owned(), param.json_schema());
            for alias in param.aliases {
                let description = format!("Alias of `{}`.", param.name);
                properties.insert((*alias).to_owned(), param.property(&description));
            }
            if !param.required {
                continue;
            }
            if param.aliases.is_empty() {
                required.push(param.name);
            } else {
                let names = std::iter::once(param.name).chain(param.aliases.iter().copied());
                let any_of: Vec<Value> = names.map(|n| json!({ "required": [n] })).collect();
                alternatives.push(json!({ "anyOf": any_of }));
            }
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        });
        if let (false, Some(obj)) = (alternatives.is_empty(), schema.as_object_mut()) {
            obj.insert("allOf".to_owned(), Value::Array(alternatives));
        }
        schema
    }

    /// MCP tool definition.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.as_str().to_owned(),
            description: self.description.to_owned(),
            input_schema: self.input_schema(),
        }
    }
}

/// Tool definition as listed by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Immutable name -> spec table.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: HashMap<&'static str, ToolSpec>,
}

impl ToolRegistry {
    /// Registry holding every built-in tool.
    pub fn builtin() -> Self {
        let specs = ToolName::ALL
            .into_iter()
            .map(|tool| (tool.as_str(), build_spec(tool)))
            .collect();
        Self { specs }
    }

    /// Look up a tool by wire name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] if no tool has that name.
    pub fn get_spec(&self, name: &str) -> Result<&ToolSpec, ToolError> {
        self.specs
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_owned()))
    }

    /// Definitions of every tool, in listing order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolName::ALL
            .into_iter()
            .filter_map(|tool| self.specs.get(tool.as_str()))
            .map(ToolSpec::definition)
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn limit_param() -> ParamSpec {
    ParamSpec::new(
        "limit",
        ParamKind::Integer {
            min: 1,
            max: MAX_LIMIT,
        },
        "Maximum number of results to return (default 20)",
    )
    .default(ParamDefault::Integer(DEFAULT_LIMIT))
}

fn page_param() -> ParamSpec {
    ParamSpec::new(
        "page",
        ParamKind::Integer {
            min: 0,
            max: MAX_PAGE,
        },
        "Page number for pagination (default 0)",
    )
    .default(ParamDefault::Integer(0))
}

fn context_param(name: &'static str, default: i64, description: &'static str) -> ParamSpec {
    ParamSpec::new(
        name,
        ParamKind::Integer {
            min: 0,
            max: MAX_CONTEXT,
        },
        description,
    )
    .default(ParamDefault::Integer(default))
}

fn recipient_param() -> ParamSpec {
    ParamSpec::new("recipient", ParamKind::String, RECIPIENT_DESCRIPTION)
        .required()
        .constrained(&[Constraint::Recipient])
}

fn user_id_param() -> ParamSpec {
    ParamSpec::new(
        "user_id",
        ParamKind::String,
        "Bridge account to act for (defaults to the configured account)",
    )
    .constrained(&[Constraint::NonEmpty])
}

fn include_last_message_param() -> ParamSpec {
    ParamSpec::new(
        "include_last_message",
        ParamKind::Boolean,
        "Whether to include the last message (default true)",
    )
    .default(ParamDefault::Boolean(true))
}

/// Declaration of a single tool.
pub fn build_spec(tool: ToolName) -> ToolSpec {
    let (description, mut params) = match tool {
        ToolName::SearchContacts => (
            "Search WhatsApp contacts by name or phone number.",
            vec![ParamSpec::new(
                "query",
                ParamKind::String,
                "Search term to match against contact names or phone numbers",
            )
            .required()
            .constrained(&[Constraint::NonEmpty])],
        ),
        ToolName::ListMessages => (
            "Get WhatsApp messages matching specified criteria with optional context.",
            vec![
                ParamSpec::new(
                    "after",
                    ParamKind::String,
                    "Optional ISO-8601 formatted string to only return messages after this date",
                )
                .constrained(&[Constraint::IsoDateTime]),
                ParamSpec::new(
                    "before",
                    ParamKind::String,
                    "Optional ISO-8601 formatted string to only return messages before this date",
                )
                .constrained(&[Constraint::IsoDateTime]),
                ParamSpec::new(
                    "sender_phone_number",
                    ParamKind::String,
                    "Optional phone number to filter messages by sender",
                )
                .constrained(&[Constraint::PhoneNumber]),
                ParamSpec::new(
                    "chat_jid",
                    ParamKind::String,
                    "Optional chat JID to filter messages by chat",
                )
                .constrained(&[Constraint::Jid]),
                ParamSpec::new(
                    "query",
                    ParamKind::String,
                    "Optional search term to filter messages by content",
                ),
                limit_param(),
                page_param(),
                ParamSpec::new(
                    "include_context",
                    ParamKind::Boolean,
                    "Whether to include messages before and after matches (default true)",
                )
                .default(ParamDefault::Boolean(true)),
                context_param(
                    "context_before",
                    1,
                    "Number of messages to include before each match (default 1)",
                ),
                context_param(
                    "context_after",
                    1,
                    "Number of messages to include after each match (default 1)",
                ),
            ],
        ),
        ToolName::ListChats => (
            "Get WhatsApp chats matching specified criteria.",
            vec![
                ParamSpec::new(
                    "query",
                    ParamKind::String,
                    "Optional search term to filter chats by name or JID",
                ),
                limit_param(),
                page_param(),
                ParamSpec::new(
                    "include_last_message",
                    ParamKind::Boolean,
                    "Whether to include the last message in each chat (default true)",
                )
                .default(ParamDefault::Boolean(true)),
                ParamSpec::new(
                    "sort_by",
                    ParamKind::Enum(&["last_active", "name"]),
                    "Field to sort results by, either \"last_active\" or \"name\" (default \"last_active\")",
                )
                .default(ParamDefault::String("last_active")),
            ],
        ),
        ToolName::GetChat => (
            "Get WhatsApp chat metadata by JID.",
            vec![
                ParamSpec::new("chat_jid", ParamKind::String, "The JID of the chat to retrieve")
                    .required()
                    .constrained(&[Constraint::Jid]),
                include_last_message_param(),
            ],
        ),
        ToolName::GetDirectChatByContact => (
            "Get WhatsApp chat metadata by sender phone number.",
            vec![ParamSpec::new(
                "sender_phone_number",
                ParamKind::String,
                "The phone number to search for",
            )
            .required()
            .constrained(&[Constraint::PhoneNumber])],
        ),
        ToolName::GetContactChats => (
            "Get all WhatsApp chats involving the contact.",
            vec![
                ParamSpec::new("jid", ParamKind::String, "The contact's JID to search for")
                    .required()
                    .constrained(&[Constraint::Recipient]),
                limit_param(),
                page_param(),
            ],
        ),
        ToolName::GetLastInteraction => (
            "Get most recent WhatsApp message involving the contact.",
            vec![
                ParamSpec::new("jid", ParamKind::String, "The JID of the contact to search for")
                    .required()
                    .constrained(&[Constraint::Recipient]),
            ],
        ),
        ToolName::GetMessageContext => (
            "Get context around a specific WhatsApp message.",
            vec![
                ParamSpec::new(
                    "message_id",
                    ParamKind::String,
                    "The ID of the message to get context for",
                )
                .required()
                .constrained(&[Constraint::NonEmpty]),
                context_param(
                    "before",
                    5,
                    "Number of messages to include before the target message (default 5)",
                ),
                context_param(
                    "after",
                    5,
                    "Number of messages to include after the target message (default 5)",
                ),
            ],
        ),
        ToolName::SendMessage => (
            "Send a WhatsApp message to a person or group. For group chats use the JID.",
            vec![
                recipient_param(),
                ParamSpec::new("message", ParamKind::String, "The message text to send")
                    .required()
                    .aliases(&["body"])
                    .constrained(&[Constraint::NonEmpty]),
            ],
        ),
        ToolName::SendFile => (
            "Send a file such as a picture, raw audio, video or document via WhatsApp to the specified recipient. For group messages use the JID.",
            vec![
                recipient_param(),
                ParamSpec::new(
                    "media_path",
                    ParamKind::Path,
                    "The absolute path to the media file to send (image, video, document)",
                )
                .required()
                .aliases(&["file_path"])
                .constrained(&[Constraint::ExistingFile]),
                ParamSpec::new(
                    "caption",
                    ParamKind::String,
                    "Optional caption shown with the file",
                ),
            ],
        ),
        ToolName::SendAudioMessage => (
            "Send any audio file as a WhatsApp audio message to the specified recipient. For group messages use the JID. If it errors due to ffmpeg not being installed, use send_file instead.",
            vec![
                recipient_param(),
                ParamSpec::new(
                    "media_path",
                    ParamKind::Path,
                    "The absolute path to the audio file to send (will be converted to Opus .ogg if it's not a .ogg file)",
                )
                .required()
                .aliases(&["file_path"])
                .constrained(&[Constraint::ExistingFile]),
            ],
        ),
        ToolName::DownloadMedia => (
            "Download media from a WhatsApp message and get the local file path.",
            vec![
                ParamSpec::new(
                    "message_id",
                    ParamKind::String,
                    "The ID of the message containing the media",
                )
                .required()
                .constrained(&[Constraint::NonEmpty]),
                ParamSpec::new(
                    "chat_jid",
                    ParamKind::String,
                    "The JID of the chat containing the message",
                )
                .required()
                .constrained(&[Constraint::Jid]),
            ],
        ),
    };

    params.push(user_id_param());
    ToolSpec {
        name: tool,
        description,
        params,
    }
}
