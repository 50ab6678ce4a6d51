use llm_runner_core::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use test_case::test_case;

#[test_case(r#"{"type":"system","subtype":"init","session_id":"abc"}"#, "system" ; "system")]
#[test_case(r#"{"type":"user","session_id":"abc","message":{"role":"user"}}"#, "user" ; "user")]
#[test_case(r#"{"type":"assistant","session_id":"abc"}"#, "assistant" ; "assistant")]
#[test_case(r#"{"type":"tool_result","session_id":"abc"}"#, "tool_result" ; "tool result")]
#[test_case(r#"{"type":"result","session_id":"abc","num_turns":2}"#, "result" ; "result")]
fn test_message_variants(line: &str, expected_type: &str) {
    let msg = StreamedMessage::from_line(line).unwrap();
    assert_eq!(msg.message_type(), expected_type);
    assert_eq!(msg.session_id(), "abc");
}

#[test]
fn test_system_message_with_servers() {
    let line = json!({
        "type": "system",
        "subtype": "init",
        "session_id": "sess-1",
        "tools": ["Bash", "Read"],
        "mcp_servers": [{"name": "files", "status": "connected"}]
    })
    .to_string();

    match StreamedMessage::from_line(&line).unwrap() {
        StreamedMessage::System(system) => {
            assert_eq!(system.subtype.as_deref(), Some("init"));
            assert_eq!(system.tools, vec!["Bash".to_string(), "Read".to_string()]);
            assert_eq!(
                system.mcp_servers,
                vec![McpServerStatus {
                    name: "files".to_string(),
                    status: "connected".to_string(),
                }]
            );
        }
        other => panic!("expected system message, got {:?}", other),
    }
}

#[test]
fn test_result_message_fields() {
    let line = json!({
        "type": "result",
        "subtype": "success",
        "session_id": "sess-2",
        "result": "done",
        "cost_usd": 0.0123,
        "duration_ms": 1500,
        "duration_api_ms": 1200,
        "is_error": false,
        "num_turns": 3
    })
    .to_string();

    let msg = StreamedMessage::from_line(&line).unwrap();
    let result = msg.as_result().unwrap();

    assert!(msg.is_result());
    assert_eq!(result.result.as_deref(), Some("done"));
    assert_eq!(result.duration_ms, 1500);
    assert_eq!(result.duration_api_ms, 1200);
    assert_eq!(result.num_turns, 3);
    assert!(!result.is_error);
    assert!((result.cost_usd - 0.0123).abs() < f64::EPSILON);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let line = r#"{"type":"assistant","session_id":"s","model":"x","usage":{"tokens":3}}"#;
    assert!(StreamedMessage::from_line(line).is_ok());
}

#[test]
fn test_invalid_records_fail_to_decode() {
    assert!(StreamedMessage::from_line("not json").is_err());
    assert!(StreamedMessage::from_line(r#"{"session_id":"no type"}"#).is_err());
    assert!(StreamedMessage::from_line(r#"{"type":"assistant""#).is_err());
}

#[test]
fn test_message_serializes_with_type_tag() {
    let msg = StreamedMessage::ToolResult(ConversationMessage {
        subtype: None,
        session_id: "s".to_string(),
        message: Some(json!({"ok": true})),
    });

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "tool_result");
    assert_eq!(value["message"]["ok"], true);
}

#[test]
fn test_run_result_decoding() {
    let body = r#"{"type":"result","subtype":"success","result":"4","cost_usd":0.001,"duration_ms":10,"duration_api_ms":8,"is_error":false,"num_turns":1,"session_id":"x"}"#;
    let result: RunResult = serde_json::from_str(body).unwrap();

    assert_eq!(result.kind, "result");
    assert_eq!(result.result, "4");
    assert_eq!(result.session_id, "x");
}

#[test]
fn test_run_result_from_text() {
    let result = RunResult::from_text("plain output");
    assert_eq!(result.result, "plain output");
    assert!(!result.is_error);
}
