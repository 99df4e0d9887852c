//! Tests for `src/tools/validate.rs`: argument checking.

use serde_json::json;

use whatsapp_mcp::tools::schema::build_spec;
use whatsapp_mcp::tools::validate::validate;
use whatsapp_mcp::tools::{ToolError, ToolName};

fn check(tool: ToolName, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
    validate(&build_spec(tool), &args).map(|v| serde_json::Value::Object(v.as_map().clone()))
}

#[test]
fn defaults_fill_omitted_optionals() {
    let args = check(ToolName::ListMessages, json!({})).expect("all optional");
    assert_eq!(args["limit"], 20);
    assert_eq!(args["page"], 0);
    assert_eq!(args["include_context"], true);
    assert_eq!(args["context_before"], 1);
    assert_eq!(args["context_after"], 1);
    assert!(args.get("query").is_none());

    let args = check(ToolName::ListChats, json!({})).expect("all optional");
    assert_eq!(args["sort_by"], "last_active");
}

#[test]
fn null_arguments_mean_no_arguments() {
    let args = check(ToolName::ListChats, serde_json::Value::Null).expect("null is {}");
    assert_eq!(args["limit"], 20);
}

#[test]
fn non_object_arguments_are_a_type_mismatch() {
    let err = check(ToolName::ListChats, json!(["a"])).expect_err("array");
    assert_eq!(
        err,
        ToolError::TypeMismatch {
            name: "arguments".into(),
            expected: "object".into(),
            actual: "array".into()
        }
    );
}

#[test]
fn missing_required_argument_is_named() {
    let err = check(ToolName::SendMessage, json!({ "message": "hi" })).expect_err("no recipient");
    assert_eq!(err, ToolError::MissingArgument("recipient".into()));
}

#[test]
fn explicit_null_counts_as_missing() {
    let err = check(ToolName::GetChat, json!({ "chat_jid": null })).expect_err("null");
    assert_eq!(err, ToolError::MissingArgument("chat_jid".into()));
}

#[test]
fn unexpected_argument_is_rejected() {
    let err = check(
        ToolName::GetChat,
        json!({ "chat_jid": "120363000000000001@g.us", "verbose": true }),
    )
    .expect_err("undeclared key");
    assert_eq!(err, ToolError::UnexpectedArgument("verbose".into()));
}

#[test]
fn wrong_json_type_is_a_type_mismatch() {
    let err = check(ToolName::ListChats, json!({ "limit": "10" })).expect_err("string limit");
    assert_eq!(err.kind(), "TypeMismatch");
    assert!(err.to_string().contains("limit"));

    let err = check(ToolName::ListChats, json!({ "limit": 2.5 })).expect_err("float limit");
    assert_eq!(err.kind(), "TypeMismatch");
}

#[test]
fn limit_outside_bounds_is_a_constraint_violation() {
    for bad in [0, 101, -1] {
        let err = check(ToolName::ListChats, json!({ "limit": bad })).expect_err("out of range");
        assert_eq!(err.kind(), "ConstraintViolation", "limit={bad}");
    }
    let ok = check(ToolName::ListChats, json!({ "limit": 100 })).expect("upper bound");
    assert_eq!(ok["limit"], 100);
}

#[test]
fn enum_values_are_enforced() {
    let err =
        check(ToolName::ListChats, json!({ "sort_by": "unread" })).expect_err("not an option");
    assert_eq!(err.kind(), "ConstraintViolation");
    assert!(err.to_string().contains("last_active"));
}

#[test]
fn recipients_accept_phone_numbers_and_jids() {
    for recipient in ["15551234567", "15551234567@s.whatsapp.net", "120363000000000001@g.us"] {
        check(
            ToolName::SendMessage,
            json!({ "recipient": recipient, "message": "hi" }),
        )
        .unwrap_or_else(|e| panic!("{recipient} should be accepted: {e}"));
    }
    for recipient in ["+15551234567", "alice", "555-1234"] {
        let err = check(
            ToolName::SendMessage,
            json!({ "recipient": recipient, "message": "hi" }),
        )
        .expect_err("bad recipient");
        assert_eq!(err.kind(), "ConstraintViolation", "{recipient}");
    }
}

#[test]
fn chat_jid_must_be_a_jid() {
    let err = check(ToolName::GetChat, json!({ "chat_jid": "15551234567" })).expect_err("phone");
    assert_eq!(err.kind(), "ConstraintViolation");
}

#[test]
fn dates_must_parse() {
    check(ToolName::ListMessages, json!({ "after": "2024-05-01T10:00:00Z" })).expect("rfc3339");
    check(ToolName::ListMessages, json!({ "after": "2024-05-01T10:00:00" })).expect("naive");
    let err = check(ToolName::ListMessages, json!({ "after": "last tuesday" })).expect_err("prose");
    assert_eq!(err.kind(), "ConstraintViolation");
}

#[test]
fn body_is_an_alias_for_message() {
    let args = check(
        ToolName::SendMessage,
        json!({ "recipient": "15551234567", "body": "hi" }),
    )
    .expect("alias accepted");
    assert_eq!(args["message"], "hi");
    assert!(args.get("body").is_none());
}

#[test]
fn name_and_alias_together_are_rejected() {
    let err = check(
        ToolName::SendMessage,
        json!({ "recipient": "15551234567", "message": "hi", "body": "hi" }),
    )
    .expect_err("supplied twice");
    assert_eq!(err.kind(), "ConstraintViolation");
}

#[test]
fn blank_message_is_rejected() {
    let err = check(
        ToolName::SendMessage,
        json!({ "recipient": "15551234567", "message": "   " }),
    )
    .expect_err("blank");
    assert_eq!(err.kind(), "ConstraintViolation");
}

#[test]
fn media_path_must_be_an_existing_absolute_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("photo.jpg");
    std::fs::write(&file, b"jpeg").expect("write");

    let ok = check(
        ToolName::SendFile,
        json!({ "recipient": "15551234567", "media_path": file.to_str() }),
    )
    .expect("existing file");
    assert_eq!(ok["media_path"], file.to_str().expect("utf-8 path"));

    let missing = dir.path().join("nope.jpg");
    for bad in [
        missing.to_string_lossy().into_owned(),
        dir.path().to_string_lossy().into_owned(),
        "relative/photo.jpg".to_owned(),
    ] {
        let err = check(
            ToolName::SendFile,
            json!({ "recipient": "15551234567", "media_path": bad }),
        )
        .expect_err("not a usable file");
        assert_eq!(err.kind(), "ConstraintViolation", "{bad}");
    }
}

#[test]
fn user_id_is_accepted_by_every_tool_and_left_unset_when_omitted() {
    let args = check(
        ToolName::SearchContacts,
        json!({ "query": "alice", "user_id": "work" }),
    )
    .expect("valid");
    assert_eq!(args["user_id"], "work");

    let args = check(ToolName::SearchContacts, json!({ "query": "alice" })).expect("valid");
    assert!(args.get("user_id").is_none());
}

#[test]
fn blank_user_id_is_rejected() {
    let err = check(ToolName::ListChats, json!({ "user_id": "  " })).expect_err("blank");
    assert_eq!(err.kind(), "ConstraintViolation");
}
