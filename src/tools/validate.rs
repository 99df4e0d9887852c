//! Argument validation against a [`ToolSpec`].
//!
//! Validation is pure apart from the existence check on file parameters,
//! which only reads metadata and opens the file for reading.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::schema::{Constraint, ParamKind, ParamSpec, ToolSpec};
use super::ToolError;
use crate::whatsapp::time::parse_timestamp;

static JID_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Za-z._:\-]+@(s\.whatsapp\.net|g\.us|c\.us|lid|broadcast|newsletter)$").ok()
});

static PHONE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[0-9]{7,15}$").ok());

/// Arguments that passed validation, keyed by canonical parameter name.
///
/// Optional parameters with a declared default are always present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: Map<String, Value>,
}

impl ValidatedArgs {
    /// Raw value of a parameter.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// String value, if supplied.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Owned string value, if supplied.
    pub fn string(&self, name: &str) -> Option<String> {
        self.str(name).map(str::to_owned)
    }

    /// String value that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MissingArgument`] if absent.
    pub fn required_str(&self, name: &str) -> Result<&str, ToolError> {
        self.str(name)
            .ok_or_else(|| ToolError::MissingArgument(name.to_owned()))
    }

    /// Non-negative integer value.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MissingArgument`] if absent, or
    /// [`ToolError::ConstraintViolation`] if it does not fit a `u32`.
    pub fn u32(&self, name: &str) -> Result<u32, ToolError> {
        let raw = self
            .values
            .get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::MissingArgument(name.to_owned()))?;
        u32::try_from(raw).map_err(|_| ToolError::constraint(name, "must be a non-negative integer"))
    }

    /// Boolean value.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MissingArgument`] if absent.
    pub fn bool(&self, name: &str) -> Result<bool, ToolError> {
        self.values
            .get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| ToolError::MissingArgument(name.to_owned()))
    }

    /// Path value that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MissingArgument`] if absent.
    pub fn path(&self, name: &str) -> Result<PathBuf, ToolError> {
        self.required_str(name).map(PathBuf::from)
    }

    /// All validated values.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Check `raw` against `spec`.
///
/// # Errors
///
/// Returns the first violation found: [`ToolError::TypeMismatch`] when the
/// arguments are not an object, [`ToolError::UnexpectedArgument`] for
/// undeclared keys, then per parameter in declaration order
/// [`ToolError::MissingArgument`], [`ToolError::TypeMismatch`] or
/// [`ToolError::ConstraintViolation`].
pub fn validate(spec: &ToolSpec, raw: &Value) -> Result<ValidatedArgs, ToolError> {
    let empty = Map::new();
    let supplied = match raw {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(ToolError::TypeMismatch {
                name: "arguments".to_owned(),
                expected: "object".to_owned(),
                actual: json_type_name(other).to_owned(),
            })
        }
    };

    for key in supplied.keys() {
        if spec.param(key).is_none() {
            return Err(ToolError::UnexpectedArgument(key.clone()));
        }
    }

    let mut values = Map::new();
    for param in &spec.params {
        let mut found = supplied
            .iter()
            .filter(|(key, value)| param.answers_to(key) && !value.is_null());
        let value = found.next().map(|(_, value)| value);
        if found.next().is_some() {
            return Err(ToolError::constraint(param.name, "was supplied more than once"));
        }

        match value {
            Some(value) => {
                check_value(param, value)?;
                values.insert(param.name.to_owned(), value.clone());
            }
            None if param.required => {
                return Err(ToolError::MissingArgument(param.name.to_owned()));
            }
            None => {
                if let Some(default) = param.default {
                    values.insert(param.name.to_owned(), default.to_value());
                }
            }
        }
    }

    Ok(ValidatedArgs { values })
}

fn check_value(param: &ParamSpec, value: &Value) -> Result<(), ToolError> {
    let mismatch = || ToolError::TypeMismatch {
        name: param.name.to_owned(),
        expected: param.kind.json_type().to_owned(),
        actual: json_type_name(value).to_owned(),
    };

    match param.kind {
        ParamKind::String | ParamKind::Path => {
            let text = value.as_str().ok_or_else(mismatch)?;
            for constraint in param.constraints {
                check_constraint(param.name, *constraint, text)?;
            }
        }
        ParamKind::Enum(allowed) => {
            let text = value.as_str().ok_or_else(mismatch)?;
            if !allowed.contains(&text) {
                return Err(ToolError::constraint(
                    param.name,
                    format!("must be one of: {}", allowed.join(", ")),
                ));
            }
        }
        ParamKind::Integer { min, max } => {
            let in_range = match value.as_i64() {
                Some(n) => (min..=max).contains(&n),
                None if value.is_u64() => false,
                None => return Err(mismatch()),
            };
            if !in_range {
                return Err(ToolError::constraint(
                    param.name,
                    format!("must be between {min} and {max}"),
                ));
            }
        }
        ParamKind::Boolean => {
            value.as_bool().ok_or_else(mismatch)?;
        }
    }
    Ok(())
}

fn check_constraint(name: &str, constraint: Constraint, text: &str) -> Result<(), ToolError> {
    let ok = match constraint {
        Constraint::Jid => is_jid(text),
        Constraint::PhoneNumber => is_phone_number(text),
        Constraint::Recipient => is_phone_number(text) || is_jid(text),
        Constraint::NonEmpty => !text.trim().is_empty(),
        Constraint::IsoDateTime => parse_timestamp(text).is_some(),
        Constraint::ExistingFile => is_readable_file(Path::new(text)),
    };
    if ok {
        Ok(())
    } else {
        Err(ToolError::constraint(name, constraint.rule()))
    }
}

/// Whether `text` looks like a WhatsApp JID.
pub fn is_jid(text: &str) -> bool {
    JID_RE.as_ref().is_some_and(|re| re.is_match(text))
}

/// Whether `text` is a phone number with country code and no symbols.
pub fn is_phone_number(text: &str) -> bool {
    PHONE_RE.as_ref().is_some_and(|re| re.is_match(text))
}

fn is_readable_file(path: &Path) -> bool {
    path.is_absolute()
        && std::fs::metadata(path).is_ok_and(|m| m.is_file())
        && std::fs::File::open(path).is_ok()
}

/// JSON type name used in mismatch reports.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
