// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool outcome analysis: tool/intent/error classification, result
//! normalization, and the legacy completion evaluation rules.

use serde_json::{json, Value};

/// What a tool does, guessed from its name.  Matching is by the exact
/// keyword casing tool vendors use (`HassTurnOn`, `GetLiveContext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Query,
    Action,
    Hybrid,
}

const QUERY_KEYWORDS: &[&str] = &[
    "Get", "List", "Query", "Find", "Search", "Fetch", "Describe", "Show",
];
const ACTION_KEYWORDS: &[&str] = &[
    "Set", "Create", "Update", "Delete", "Turn", "Start", "Stop", "Execute", "Send", "Run",
    "Call", "Invoke",
];

pub fn classify_tool_kind(tool_name: &str) -> ToolKind {
    if QUERY_KEYWORDS.iter().any(|k| tool_name.contains(k)) {
        return ToolKind::Query;
    }
    if ACTION_KEYWORDS.iter().any(|k| tool_name.contains(k)) {
        return ToolKind::Action;
    }
    ToolKind::Hybrid
}

/// Failure categories that drive remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPattern {
    ResourceNotFound,
    InvalidParameter,
    PermissionDenied,
    ToolUnsupported,
    NetworkIssue,
    Unknown,
}

pub fn classify_error_pattern(error: &str) -> ErrorPattern {
    let e = error.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| e.contains(k));

    if contains_any(&["not found", "does not exist", "unknown", "no such"]) {
        ErrorPattern::ResourceNotFound
    } else if contains_any(&["invalid", "incorrect", "malformed", "bad request"]) {
        ErrorPattern::InvalidParameter
    } else if contains_any(&["permission", "forbidden", "unauthorized", "access denied"]) {
        ErrorPattern::PermissionDenied
    } else if contains_any(&["not support", "unsupported", "unavailable"]) {
        ErrorPattern::ToolUnsupported
    } else if contains_any(&["timeout", "network", "connection"]) {
        ErrorPattern::NetworkIssue
    } else {
        ErrorPattern::Unknown
    }
}

/// What the user ultimately wants, guessed from the utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    ActionTask,
    QueryOnly,
    Unknown,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActionTask => "action_task",
            Self::QueryOnly => "query_only",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "action_task" => Self::ActionTask,
            "query_only" => Self::QueryOnly,
            _ => Self::Unknown,
        }
    }
}

const QUERY_VERBS: &[&str] = &[
    "查看", "查询", "显示", "获取", "列出", "看", "看看", "是多少", "是什么", "有哪些", "告诉我",
    "look", "check", "display", "get", "list", "show", "what is", "how many", "are there",
    "tell me",
];
const ACTION_VERBS: &[&str] = &[
    "打开", "关闭", "设置", "调节", "控制", "开启", "关掉", "关上", "启动", "停止", "发送",
    "创建", "删除", "修改", "拉上", "拉开", "调整", "增加", "减少",
    "open", "close", "set ", "adjust", "control", "start", "stop", "send", "create", "delete",
    "modify", "turn up", "turn down", "turn on", "turn off", "pull open", "pull closed",
    "increase", "decrease",
];

/// Action verbs dominate: an utterance with both kinds is an action task,
/// and an unclassifiable one is treated as an action task downstream
/// (the conservative reading).
pub fn classify_task_intent(user_intent: &str) -> IntentKind {
    let text = user_intent.to_lowercase();
    let has_action = ACTION_VERBS.iter().any(|v| text.contains(v));
    let has_query = QUERY_VERBS.iter().any(|v| text.contains(v));

    if has_action {
        IntentKind::ActionTask
    } else if has_query {
        IntentKind::QueryOnly
    } else {
        IntentKind::Unknown
    }
}

/// Lift a tool-signalled `isError` flag into the envelope.
///
/// Rules, in order: an already-failed envelope passes through; an inner
/// `result.isError == true` becomes `{success: false, error, raw_result}`;
/// everything else passes through unchanged.
pub fn normalize_tool_result(result: Value) -> Value {
    if !result
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return result;
    }

    let is_error = result
        .get("result")
        .and_then(|inner| inner.get("isError"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if is_error {
        let message = result
            .get("result")
            .map(extract_error_message)
            .unwrap_or_else(|| "Tool execution failed without details".into());
        return json!({
            "success": false,
            "error": message,
            "raw_result": result,
        });
    }

    result
}

/// Best-effort error text from a tool error payload: the first content
/// item's text, then `message`, then `error` (string or `{message}`),
/// then a truncated JSON dump, finally a generic string.
pub fn extract_error_message(error_data: &Value) -> String {
    if let Some(text) = error_data
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
    {
        return text.to_string();
    }

    if let Some(message) = error_data.get("message") {
        return value_as_text(message);
    }

    if let Some(error) = error_data.get("error") {
        if let Some(s) = error.as_str() {
            return s.to_string();
        }
        if let Some(message) = error.get("message") {
            return value_as_text(message);
        }
        return error.to_string();
    }

    if let Ok(dump) = serde_json::to_string(error_data) {
        if dump.len() > 200 {
            return format!("{}...", &dump[..200]);
        }
        return dump;
    }

    "Tool execution failed without details".into()
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pull the user-visible payload out of a normalized envelope:
/// `formatted_output` first, then `result` (unwrapping one more nested
/// `formatted_output`).
pub fn extract_tool_output(tool_result: &Value) -> Option<Value> {
    if let Some(formatted) = tool_result.get("formatted_output") {
        return Some(formatted.clone());
    }
    if let Some(inner) = tool_result.get("result") {
        if let Some(formatted) = inner.get("formatted_output") {
            return Some(formatted.clone());
        }
        return Some(inner.clone());
    }
    None
}

/// Legacy completion evaluation result.
#[derive(Debug, Clone)]
pub struct CompletionJudgment {
    pub completed: bool,
    pub confidence: f64,
    pub reason: &'static str,
    pub analysis: String,
}

/// Legacy goal-driven completion rules:
/// 1. a query by a pure-query task completes it; a query by an action
///    task is preparation;
/// 2. the user's explicitly requested tool completing completes the task;
/// 3. an action tool completes with confidence graded by state
///    verification.
pub fn evaluate_completion(
    tool_name: &str,
    intent: IntentKind,
    user_requested_tool: Option<&str>,
    result: &Value,
) -> CompletionJudgment {
    let kind = classify_tool_kind(tool_name);

    if kind == ToolKind::Query {
        return if intent == IntentKind::QueryOnly {
            CompletionJudgment {
                completed: true,
                confidence: 0.95,
                reason: "query_task_completed",
                analysis: format!("query tool {tool_name} returned the requested data"),
            }
        } else {
            CompletionJudgment {
                completed: false,
                confidence: 0.5,
                reason: "query_for_preparation",
                analysis: format!("{tool_name} gathered data for a later operation"),
            }
        };
    }

    if user_requested_tool == Some(tool_name) {
        return CompletionJudgment {
            completed: true,
            confidence: 0.95,
            reason: "target_tool_executed",
            analysis: format!("requested tool {tool_name} executed"),
        };
    }

    if kind == ToolKind::Action {
        let content = result
            .get("content")
            .or_else(|| result.get("result"))
            .cloned()
            .unwrap_or(Value::Null);
        let state = content.get("state").and_then(Value::as_str);

        return match state {
            Some(state) => {
                let expected = infer_expected_state(tool_name);
                if expected == Some(state) {
                    CompletionJudgment {
                        completed: true,
                        confidence: 0.95,
                        reason: "state_verified",
                        analysis: format!("{tool_name} succeeded, state verified as {state}"),
                    }
                } else {
                    CompletionJudgment {
                        completed: true,
                        confidence: 0.85,
                        reason: "action_completed",
                        analysis: format!("{tool_name} succeeded, current state {state}"),
                    }
                }
            }
            None => CompletionJudgment {
                completed: true,
                confidence: 0.7,
                reason: "action_completed_no_state",
                analysis: format!("{tool_name} succeeded without state verification"),
            },
        };
    }

    CompletionJudgment {
        completed: false,
        confidence: 0.5,
        reason: "may_need_more_steps",
        analysis: format!("{tool_name} succeeded but follow-up may be needed"),
    }
}

fn infer_expected_state(tool_name: &str) -> Option<&'static str> {
    if tool_name.contains("TurnOn") {
        Some("on")
    } else if tool_name.contains("TurnOff") {
        Some("off")
    } else {
        None
    }
}

/// Compact one-line summary of a step outcome for goal evolution.
pub fn result_summary(tool_name: &str, result: &Value) -> String {
    let success = result
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if success {
        if classify_tool_kind(tool_name) == ToolKind::Query {
            let data = result
                .get("content")
                .or_else(|| result.get("result"))
                .map(value_as_text)
                .unwrap_or_default();
            let mut snippet: String = data.chars().take(200).collect();
            if data.chars().count() > 200 {
                snippet.push_str("...");
            }
            if snippet.is_empty() {
                format!("query succeeded ({tool_name})")
            } else {
                format!("query succeeded ({tool_name}): {snippet}")
            }
        } else {
            format!("operation succeeded ({tool_name})")
        }
    } else {
        let error = result
            .get("error")
            .map(value_as_text)
            .unwrap_or_else(|| "unknown error".into());
        let mut snippet: String = error.chars().take(150).collect();
        if error.chars().count() > 150 {
            snippet.push_str("...");
        }
        format!("failed - {snippet}")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Tool kind ─────────────────────────────────────────────────────────────

    #[test]
    fn tool_kind_keywords() {
        assert_eq!(classify_tool_kind("GetLiveContext"), ToolKind::Query);
        assert_eq!(classify_tool_kind("HassListEntities"), ToolKind::Query);
        assert_eq!(classify_tool_kind("HassTurnOn"), ToolKind::Action);
        assert_eq!(classify_tool_kind("SendEmail"), ToolKind::Action);
        assert_eq!(classify_tool_kind("web_search"), ToolKind::Hybrid);
    }

    // ── Error patterns ────────────────────────────────────────────────────────

    #[test]
    fn error_pattern_table() {
        assert_eq!(
            classify_error_pattern("entity light.kitchen not found"),
            ErrorPattern::ResourceNotFound
        );
        assert_eq!(
            classify_error_pattern("Invalid position value"),
            ErrorPattern::InvalidParameter
        );
        assert_eq!(
            classify_error_pattern("403 Forbidden"),
            ErrorPattern::PermissionDenied
        );
        assert_eq!(
            classify_error_pattern("operation unsupported"),
            ErrorPattern::ToolUnsupported
        );
        assert_eq!(
            classify_error_pattern("connection reset by peer"),
            ErrorPattern::NetworkIssue
        );
        assert_eq!(classify_error_pattern("something odd"), ErrorPattern::Unknown);
    }

    #[test]
    fn resource_not_found_wins_over_network() {
        // "unknown host" matches both tables; the not-found class is
        // checked first.
        assert_eq!(
            classify_error_pattern("unknown host connection"),
            ErrorPattern::ResourceNotFound
        );
    }

    // ── Intent classification ─────────────────────────────────────────────────

    #[test]
    fn intent_action_dominates() {
        assert_eq!(classify_task_intent("打开客厅的灯"), IntentKind::ActionTask);
        assert_eq!(classify_task_intent("查看温度然后打开空调"), IntentKind::ActionTask);
        assert_eq!(classify_task_intent("turn on the light"), IntentKind::ActionTask);
    }

    #[test]
    fn intent_query_only() {
        assert_eq!(classify_task_intent("查询北京的天气"), IntentKind::QueryOnly);
        assert_eq!(classify_task_intent("tell me the temperature"), IntentKind::QueryOnly);
    }

    #[test]
    fn intent_unknown_falls_through() {
        assert_eq!(classify_task_intent("嗯"), IntentKind::Unknown);
        assert_eq!(IntentKind::from_str("action_task"), IntentKind::ActionTask);
        assert_eq!(IntentKind::from_str("gibberish"), IntentKind::Unknown);
    }

    // ── Normalization ─────────────────────────────────────────────────────────

    #[test]
    fn normalize_passes_failures_through() {
        let input = serde_json::json!({ "success": false, "error": "boom" });
        assert_eq!(normalize_tool_result(input.clone()), input);
    }

    #[test]
    fn normalize_lifts_is_error() {
        let input = serde_json::json!({
            "success": true,
            "result": {
                "isError": true,
                "content": [{ "text": "entity light.kitchen_lamp not found" }]
            }
        });
        let out = normalize_tool_result(input);
        assert_eq!(out["success"], false);
        assert_eq!(out["error"], "entity light.kitchen_lamp not found");
        assert_eq!(out["raw_result"]["result"]["isError"], true);
    }

    #[test]
    fn normalize_keeps_clean_success() {
        let input = serde_json::json!({
            "success": true,
            "result": { "isError": false, "content": [] }
        });
        assert_eq!(normalize_tool_result(input.clone()), input);
    }

    #[test]
    fn error_message_fallback_chain() {
        assert_eq!(
            extract_error_message(&serde_json::json!({ "content": [{ "text": "first" }] })),
            "first"
        );
        assert_eq!(
            extract_error_message(&serde_json::json!({ "message": "msg" })),
            "msg"
        );
        assert_eq!(
            extract_error_message(&serde_json::json!({ "error": "plain" })),
            "plain"
        );
        assert_eq!(
            extract_error_message(&serde_json::json!({ "error": { "message": "nested" } })),
            "nested"
        );
        // Opaque payload falls back to a JSON dump.
        let dump = extract_error_message(&serde_json::json!({ "odd": 1 }));
        assert!(dump.contains("odd"));
    }

    // ── Output extraction ─────────────────────────────────────────────────────

    #[test]
    fn output_prefers_formatted() {
        let v = serde_json::json!({ "formatted_output": "pretty", "result": "raw" });
        assert_eq!(extract_tool_output(&v).unwrap(), "pretty");
    }

    #[test]
    fn output_unwraps_nested_formatted() {
        let v = serde_json::json!({ "result": { "formatted_output": "inner" } });
        assert_eq!(extract_tool_output(&v).unwrap(), "inner");
    }

    #[test]
    fn output_falls_back_to_result() {
        let v = serde_json::json!({ "result": { "temperature": 15 } });
        assert_eq!(extract_tool_output(&v).unwrap()["temperature"], 15);
        assert!(extract_tool_output(&serde_json::json!({ "success": true })).is_none());
    }

    // ── Completion evaluation ─────────────────────────────────────────────────

    #[test]
    fn pure_query_completes_on_query() {
        let j = evaluate_completion("GetWeather", IntentKind::QueryOnly, None, &Value::Null);
        assert!(j.completed);
        assert_eq!(j.confidence, 0.95);
        assert_eq!(j.reason, "query_task_completed");
    }

    #[test]
    fn preparation_query_does_not_complete() {
        let j = evaluate_completion("GetLiveContext", IntentKind::ActionTask, None, &Value::Null);
        assert!(!j.completed);
        assert_eq!(j.reason, "query_for_preparation");
    }

    #[test]
    fn state_verified_action() {
        let result = serde_json::json!({ "content": { "state": "on" } });
        let j = evaluate_completion("HassTurnOn", IntentKind::ActionTask, None, &result);
        assert!(j.completed);
        assert_eq!(j.confidence, 0.95);
        assert_eq!(j.reason, "state_verified");
    }

    #[test]
    fn mismatched_state_action_still_completes() {
        let result = serde_json::json!({ "content": { "state": "off" } });
        let j = evaluate_completion("HassTurnOn", IntentKind::ActionTask, None, &result);
        assert!(j.completed);
        assert_eq!(j.confidence, 0.85);
    }

    #[test]
    fn stateless_action_gets_medium_confidence() {
        let result = serde_json::json!({ "content": {} });
        let j = evaluate_completion("HassTurnOff", IntentKind::ActionTask, None, &result);
        assert!(j.completed);
        assert_eq!(j.confidence, 0.7);
    }

    #[test]
    fn requested_tool_match_completes() {
        let j = evaluate_completion(
            "custom_move",
            IntentKind::ActionTask,
            Some("custom_move"),
            &Value::Null,
        );
        assert!(j.completed);
        assert_eq!(j.reason, "target_tool_executed");
    }

    #[test]
    fn hybrid_tool_defaults_to_not_complete() {
        let j = evaluate_completion("web_search", IntentKind::ActionTask, None, &Value::Null);
        assert!(!j.completed);
        assert_eq!(j.confidence, 0.5);
    }

    // ── Result summary ────────────────────────────────────────────────────────

    #[test]
    fn summary_for_query_includes_snippet() {
        let result = serde_json::json!({ "success": true, "result": "sunny, 15C" });
        let s = result_summary("GetWeather", &result);
        assert!(s.contains("sunny"));
    }

    #[test]
    fn summary_for_failure_includes_error() {
        let result = serde_json::json!({ "success": false, "error": "nope" });
        assert!(result_summary("HassTurnOn", &result).contains("nope"));
    }
}
