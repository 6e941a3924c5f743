// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wake-word gated conversation executor.
//!
//! Runs as one long-lived task: listen for a wake phrase, open a
//! conversational window, classify each utterance as chit-chat vs. an
//! actionable request, delegate actionable requests to the MCP executor
//! as a sub-task, and speak a reply grounded in the tool output.
//!
//! The permanent standby loop polls `listen(60s)` so the external
//! `running` flag is observed between reads; this is what "permanent
//! standby" means here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use fennec_config::ConversationConfig;
use fennec_mcp::ToolIndex;
use fennec_model::{ChatRequest, LanguageModel, Message};
use fennec_tasks::{
    now_ts, SharedTask, Task, TaskExecutor, TaskQueue, TaskStatus, TaskType,
};

use crate::actions::{ActionRegistry, ActionResult};
use crate::events::StateBroadcaster;
use crate::prompts::{extract_json_object, intent_analysis_prompt, reply_synthesis_prompt};

const WAKE_LISTEN_TIMEOUT_SECS: f64 = 60.0;
const MAX_CONVERSATION_ROUNDS: u32 = 20;
const MCP_SUB_TASK_TIMEOUT_SECS: f64 = 3000.0;
const MCP_WAIT_SECS: u64 = 60;

const GOODBYE_KEYWORDS: &[&str] = &[
    "再见", "拜拜", "byebye", "goodbye", "886", "结束", "停止", "退出", "你退下吧",
];

struct ConversationState {
    current_state: String,
    total_conversations: u64,
    /// Capped `(role, content)` window used for LLM context.
    conversation_history: Vec<(String, String)>,
    /// Capped log broadcast to subscribers.
    messages: Vec<Value>,
}

pub struct ConversationExecutor {
    registry: Arc<ActionRegistry>,
    llm: Arc<dyn LanguageModel>,
    index: Arc<ToolIndex>,
    queue: Arc<TaskQueue>,
    config: ConversationConfig,
    broadcaster: StateBroadcaster,
    running: AtomicBool,
    listening_active: AtomicBool,
    state: std::sync::Mutex<ConversationState>,
}

impl ConversationExecutor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        llm: Arc<dyn LanguageModel>,
        index: Arc<ToolIndex>,
        queue: Arc<TaskQueue>,
        config: ConversationConfig,
        broadcaster: StateBroadcaster,
    ) -> Self {
        Self {
            registry,
            llm,
            index,
            queue,
            config,
            broadcaster,
            running: AtomicBool::new(false),
            listening_active: AtomicBool::new(false),
            state: std::sync::Mutex::new(ConversationState {
                current_state: "waiting_wake".into(),
                total_conversations: 0,
                conversation_history: Vec::new(),
                messages: Vec::new(),
            }),
        }
    }

    // ── External control ──────────────────────────────────────────────────────

    pub fn start_listening(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.listening_active.store(true, Ordering::SeqCst);
            info!("listening started");
            let mut data = Map::new();
            data.insert("message".into(), json!("listening started"));
            self.broadcaster.emit("listening_started", data);
        }
    }

    pub fn stop_listening(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.listening_active.store(false, Ordering::SeqCst);
        info!("listening stopped");
        let mut data = Map::new();
        data.insert("message".into(), json!("listening stopped"));
        self.broadcaster.emit("listening_stopped", data);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening_active.load(Ordering::SeqCst)
    }

    pub fn current_state(&self) -> String {
        self.state.lock().unwrap().current_state.clone()
    }

    pub fn total_conversations(&self) -> u64 {
        self.state.lock().unwrap().total_conversations
    }

    /// Snapshot of the message log tail.
    pub fn get_messages(&self, limit: Option<usize>) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        match limit {
            Some(n) if n < state.messages.len() => {
                state.messages[state.messages.len() - n..].to_vec()
            }
            _ => state.messages.clone(),
        }
    }

    pub fn clear_messages(&self) {
        self.state.lock().unwrap().messages.clear();
        self.broadcaster.emit("messages_cleared", Map::new());
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn set_state(&self, state: &str, data: Map<String, Value>) {
        self.state.lock().unwrap().current_state = state.to_string();
        self.broadcaster.emit(state, data);
    }

    fn add_message(&self, role: &str, content: &str) {
        let message = json!({
            "role": role,
            "content": content,
            "timestamp": now_ts(),
        });
        let total = {
            let mut state = self.state.lock().unwrap();
            state.messages.push(message.clone());
            let max = self.config.max_messages;
            if state.messages.len() > max {
                let drop = state.messages.len() - max;
                state.messages.drain(..drop);
            }
            state.messages.len()
        };
        let mut data = Map::new();
        data.insert("message".into(), message);
        data.insert("total_messages".into(), json!(total));
        self.broadcaster.emit("message", data);
    }

    async fn speak(&self, text: &str) -> bool {
        let result = self.registry.execute("speak", json!({ "text": text })).await;
        if !result.success {
            warn!(error = ?result.error, "speak failed");
        }
        result.success
    }

    async fn listen(&self, timeout_secs: f64) -> ActionResult {
        self.registry
            .execute("listen", json!({ "timeout_secs": timeout_secs }))
            .await
    }

    fn is_goodbye(text: &str) -> bool {
        let t = text.to_lowercase();
        let t = t.trim();
        GOODBYE_KEYWORDS.iter().any(|k| t.contains(k))
    }

    /// Permanent standby: wait for the external start signal, then cycle
    /// wake-wait → conversation → goodbye until stopped.
    async fn standby_loop(&self) {
        debug!("entering permanent standby (waiting for start signal)");
        while !self.is_running() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        while self.is_running() {
            let mut data = Map::new();
            data.insert(
                "message".into(),
                json!(format!("waiting for wake words: {}", self.config.wake_words.join(", "))),
            );
            self.set_state("waiting_wake", data);

            let awakened = self.wait_for_wake_word().await;
            if !self.is_running() {
                break;
            }
            if !awakened {
                continue;
            }

            let conversation_id = {
                let mut state = self.state.lock().unwrap();
                state.total_conversations += 1;
                state.total_conversations
            };
            info!(conversation_id, "awakened");
            let mut data = Map::new();
            data.insert("message".into(), json!("awakened"));
            data.insert("conversation_id".into(), json!(conversation_id));
            self.set_state("awakened", data);

            let welcome = self.config.welcome_phrase.clone();
            self.add_message("assistant", &welcome);
            self.speak(&welcome).await;

            self.conversation_loop().await;

            self.state.lock().unwrap().conversation_history.clear();
            let mut data = Map::new();
            data.insert("message".into(), json!("conversation ended, back to standby"));
            data.insert("conversation_id".into(), json!(conversation_id));
            self.set_state("goodbye", data);

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn single_conversation(&self) {
        self.running.store(true, Ordering::SeqCst);
        let conversation_id = {
            let mut state = self.state.lock().unwrap();
            state.total_conversations += 1;
            state.total_conversations
        };
        let mut data = Map::new();
        data.insert("conversation_id".into(), json!(conversation_id));
        self.set_state("conversing", data);

        self.conversation_loop().await;

        let mut data = Map::new();
        data.insert("conversation_id".into(), json!(conversation_id));
        self.set_state("completed", data);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wake-word wait: effectively unbounded; each `listen` runs with a
    /// 60s timeout only so the `running` flag gets observed.
    async fn wait_for_wake_word(&self) -> bool {
        while self.is_running() {
            let result = self.listen(WAKE_LISTEN_TIMEOUT_SECS).await;
            if !self.is_running() {
                return false;
            }
            if result.success {
                let text = result.output["text"]
                    .as_str()
                    .unwrap_or_default()
                    .trim()
                    .to_lowercase();
                debug!(%text, "heard speech while waiting for wake");
                for wake in &self.config.wake_words {
                    if text.contains(&wake.to_lowercase()) {
                        return true;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    async fn conversation_loop(&self) {
        let mut idle_count: u32 = 0;
        let mut round_count: u32 = 0;

        while self.is_running() && round_count < MAX_CONVERSATION_ROUNDS {
            let result = self.listen(self.config.idle_timeout_secs).await;
            if !self.is_running() {
                break;
            }

            if !result.success {
                idle_count += 1;
                let mut data = Map::new();
                data.insert("idle_count".into(), json!(idle_count));
                data.insert("max_idle_rounds".into(), json!(self.config.max_idle_rounds));
                self.set_state("idle", data);

                if idle_count >= self.config.max_idle_rounds {
                    let farewell = self.config.idle_farewell_phrase.clone();
                    self.add_message("assistant", &farewell);
                    self.speak(&farewell).await;
                    break;
                }
                continue;
            }
            idle_count = 0;

            let user_text = result.output["text"]
                .as_str()
                .unwrap_or_default()
                .trim()
                .to_string();
            if user_text.is_empty() {
                continue;
            }
            self.add_message("user", &user_text);

            if Self::is_goodbye(&user_text) {
                let farewell = self.config.farewell_phrase.clone();
                self.add_message("assistant", &farewell);
                self.speak(&farewell).await;
                break;
            }

            let response = self.handle_user_input(&user_text).await;
            self.add_message("assistant", &response);

            let mut data = Map::new();
            data.insert("user_input".into(), json!(user_text));
            data.insert("bot_response".into(), json!(response.clone()));
            data.insert("round".into(), json!(round_count + 1));
            self.set_state("conversing", data);

            self.speak(&response).await;
            round_count += 1;
        }
    }

    /// Intent analysis + optional MCP delegation for one utterance.
    async fn handle_user_input(&self, user_text: &str) -> String {
        let intent = self.analyze_intent(user_text).await;
        let intent_type = intent["intent_type"].as_str().unwrap_or("simple_chat");
        let mut response = intent["response"].as_str().unwrap_or_default().to_string();

        if intent_type == "task_request" {
            if let Some(info) = intent.get("task_info") {
                if info["executor_type"] == "mcp" {
                    let outcome = self.call_mcp_tool(info).await;
                    if outcome["success"].as_bool().unwrap_or(false) {
                        response = self.generate_final_response(user_text, &outcome).await;
                    } else {
                        let error = outcome["error"].as_str().unwrap_or("unknown error");
                        response = format!("Sorry, the task failed: {error}");
                    }
                }
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state
                .conversation_history
                .push(("user".into(), user_text.to_string()));
            state
                .conversation_history
                .push(("assistant".into(), response.clone()));
            let max = self.config.max_history;
            if state.conversation_history.len() > max * 2 {
                let keep = state.conversation_history.len() - max;
                state.conversation_history.drain(..keep);
            }
        }

        response
    }

    /// Ask the LLM to classify the utterance.  Non-JSON replies degrade
    /// to `simple_chat` with the raw text as the response.
    async fn analyze_intent(&self, user_text: &str) -> Value {
        let tools: Vec<(String, String)> = self
            .index
            .all_tools()
            .into_iter()
            .map(|t| (t.tool_name, t.description))
            .collect();
        let prompt = intent_analysis_prompt(
            &[("speak".to_string(), "speech output".to_string())],
            &tools,
        );

        let request = ChatRequest {
            messages: vec![Message::system(prompt), Message::user(user_text)],
            temperature: Some(0.3),
            json_mode: true,
            ..Default::default()
        };

        match self.llm.chat(request).await {
            Ok(reply) => {
                let text = reply.text_or_empty().to_string();
                extract_json_object(&text).unwrap_or_else(|| {
                    json!({ "intent_type": "simple_chat", "response": text })
                })
            }
            Err(e) => {
                warn!(error = %e, "intent analysis failed");
                json!({
                    "intent_type": "simple_chat",
                    "response": "抱歉，我现在有点忙，稍后再试试吧。",
                })
            }
        }
    }

    /// Submit an MCP sub-task and poll its status once per second for up
    /// to a minute.
    async fn call_mcp_tool(&self, task_info: &Value) -> Value {
        let params = &task_info["parameters"];
        let user_intent = params["user_intent"].as_str().unwrap_or_default();
        let context = params["context"].as_object().cloned().unwrap_or_default();

        let mut execution_data = Map::new();
        execution_data.insert("goal".into(), json!(user_intent));
        execution_data.insert("user_intent".into(), json!(user_intent));
        execution_data.insert("max_steps".into(), json!(5));

        let task = Task::new(TaskType::McpCall)
            .with_priority(self.config.mcp_task_priority)
            .with_timeout(MCP_SUB_TASK_TIMEOUT_SECS)
            .with_context(context)
            .with_execution_data(execution_data);
        let task_id = self.queue.push(task).await;
        debug!(%task_id, %user_intent, "MCP sub-task submitted");

        for _ in 0..MCP_WAIT_SECS {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let Some(task) = self.queue.get_by_id(&task_id).await else {
                break;
            };
            let t = task.lock().await;
            match t.status {
                TaskStatus::Completed => {
                    return match &t.result {
                        Some(result) if result.is_object() => result.clone(),
                        Some(_) => json!({ "success": false, "error": "Invalid result type" }),
                        None => json!({ "success": false, "error": "No result" }),
                    };
                }
                TaskStatus::Failed => {
                    let error = t
                        .result
                        .as_ref()
                        .and_then(|r| r["error"].as_str())
                        .unwrap_or("Unknown error")
                        .to_string();
                    return json!({ "success": false, "error": error });
                }
                _ => {}
            }
        }
        json!({ "success": false, "error": "Timeout" })
    }

    /// Synthesize the user-facing reply from the tool output.
    async fn generate_final_response(&self, user_text: &str, mcp_result: &Value) -> String {
        let formatted = format_tool_output(mcp_result);
        let prompt = reply_synthesis_prompt(user_text, &formatted);
        let request = ChatRequest {
            messages: vec![Message::system(prompt), Message::user(user_text)],
            temperature: Some(0.7),
            max_tokens: Some(150),
            ..Default::default()
        };
        match self.llm.chat(request).await {
            Ok(reply) => reply.text_or_empty().to_string(),
            Err(e) => {
                warn!(error = %e, "reply synthesis failed, returning raw output");
                formatted
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for ConversationExecutor {
    /// `execution_data.mode`: `"loop"` (permanent standby, default) or
    /// `"once"` (single conversation).
    async fn execute(&self, task: SharedTask) -> anyhow::Result<()> {
        let mode = task
            .lock()
            .await
            .exec_str("mode")
            .unwrap_or("loop")
            .to_string();
        info!(%mode, "conversation task started");

        if mode == "loop" {
            self.standby_loop().await;
        } else {
            self.single_conversation().await;
        }

        let total = self.total_conversations();
        let mut t = task.lock().await;
        t.result = Some(json!({ "success": true, "total_conversations": total }));
        t.transition_to(TaskStatus::Completed, "Conversation ended");
        Ok(())
    }
}

/// Flatten an MCP task result into readable lines for reply synthesis.
///
/// Walks `final_result` → `result` → last of `step_results`, unwraps one
/// nested `{result}` / `{content}` level, then renders lists as the first
/// three `title - snippet` lines and `{query, results}` maps as the first
/// three `title / snippet` pairs.
fn format_tool_output(mcp_result: &Value) -> String {
    let mut output = mcp_result
        .get("final_result")
        .cloned()
        .or_else(|| mcp_result.get("result").cloned())
        .or_else(|| {
            mcp_result
                .get("step_results")
                .and_then(Value::as_array)
                .and_then(|steps| steps.last())
                .and_then(|last| last.get("result"))
                .cloned()
        })
        .unwrap_or(Value::Null);

    if let Value::Object(map) = &output {
        if let Some(inner) = map.get("result") {
            output = inner.clone();
        } else if let Some(content) = map.get("content") {
            output = content.clone();
        }
    }

    match &output {
        Value::Array(items) => {
            if items.first().map(Value::is_object).unwrap_or(false) {
                items
                    .iter()
                    .take(3)
                    .enumerate()
                    .map(|(i, item)| {
                        if let Some(title) = item["title"].as_str() {
                            let snippet: String = item["snippet"]
                                .as_str()
                                .unwrap_or_default()
                                .chars()
                                .take(100)
                                .collect();
                            format!("{}. {title} - {snippet}", i + 1)
                        } else {
                            let text: String = item.to_string().chars().take(100).collect();
                            format!("{}. {text}", i + 1)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                items
                    .iter()
                    .take(5)
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Value::Object(map) if map.contains_key("query") && map.contains_key("results") => {
            let results = map["results"].as_array().cloned().unwrap_or_default();
            if results.is_empty() {
                "No relevant results found".to_string()
            } else {
                results
                    .iter()
                    .take(3)
                    .enumerate()
                    .map(|(i, r)| {
                        let title = r["title"].as_str().unwrap_or_default();
                        let snippet: String = r["snippet"]
                            .as_str()
                            .unwrap_or_default()
                            .chars()
                            .take(150)
                            .collect();
                        format!("{}. {title}\n   {snippet}", i + 1)
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use fennec_model::{ChatResponse, ScriptedModel};
    use std::sync::Mutex;

    struct ScriptedListen {
        /// `Some(text)` = recognised speech, `None` = silence/timeout.
        script: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Action for ScriptedListen {
        fn name(&self) -> &str {
            "listen"
        }
        async fn execute(&self, _input: Value) -> ActionResult {
            let next = self.script.lock().unwrap().pop();
            match next.flatten() {
                Some(text) => ActionResult::ok(json!({ "text": text })),
                None => ActionResult::err("listen timeout"),
            }
        }
    }

    struct RecordingSpeak {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Action for RecordingSpeak {
        fn name(&self) -> &str {
            "speak"
        }
        async fn execute(&self, input: Value) -> ActionResult {
            let text = input["text"].as_str().unwrap_or_default().to_string();
            self.spoken.lock().unwrap().push(text);
            ActionResult::ok(json!({ "success": true }))
        }
    }

    struct Harness {
        executor: Arc<ConversationExecutor>,
        spoken: Arc<Mutex<Vec<String>>>,
        events: Arc<Mutex<Vec<(String, Value)>>>,
    }

    /// Build an executor with scripted audio and LLM.  `listens` is in
    /// chronological order.
    fn harness(listens: Vec<Option<&str>>, llm_scripts: Vec<ChatResponse>) -> Harness {
        let registry = Arc::new(ActionRegistry::new());
        let spoken = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(RecordingSpeak { spoken: spoken.clone() }));
        // Scripts pop from the back.
        let mut script: Vec<Option<String>> =
            listens.into_iter().map(|o| o.map(str::to_string)).collect();
        script.reverse();
        registry.register(Arc::new(ScriptedListen { script: Mutex::new(script) }));

        let events: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let broadcaster = StateBroadcaster::new(Arc::new(move |state, data| {
            sink.lock().unwrap().push((state.to_string(), data));
        }));

        let executor = Arc::new(ConversationExecutor::new(
            registry,
            Arc::new(ScriptedModel::new(llm_scripts)),
            Arc::new(ToolIndex::new()),
            Arc::new(TaskQueue::new()),
            ConversationConfig::default(),
            broadcaster,
        ));
        Harness { executor, spoken, events }
    }

    fn once_task() -> SharedTask {
        let mut execution_data = Map::new();
        execution_data.insert("mode".into(), json!("once"));
        fennec_tasks::shared(
            Task::new(TaskType::Conversation)
                .with_priority(10)
                .with_timeout(86_400.0)
                .with_execution_data(execution_data),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn simple_chat_round_speaks_reply_and_emits_conversing() {
        let chat = json!({
            "intent_type": "simple_chat",
            "response": "你好！有什么可以帮你的吗？"
        })
        .to_string();
        let h = harness(
            vec![Some("你好"), None, None],
            vec![ChatResponse::text(chat)],
        );

        h.executor.execute(once_task()).await.unwrap();

        let spoken = h.spoken.lock().unwrap();
        assert!(spoken.contains(&"你好！有什么可以帮你的吗？".to_string()));
        // Two silences close the conversation with the idle farewell.
        assert_eq!(spoken.last().unwrap(), "好的，我先休息了，有需要再叫我");

        let events = h.events.lock().unwrap();
        let conversing = events
            .iter()
            .find(|(name, data)| name == "conversing" && data.get("round").is_some())
            .expect("conversing event");
        assert_eq!(conversing.1["round"], 1);
        assert_eq!(conversing.1["user_input"], "你好");
    }

    #[tokio::test(start_paused = true)]
    async fn goodbye_keyword_closes_conversation() {
        let h = harness(vec![Some("再见")], vec![]);
        h.executor.execute(once_task()).await.unwrap();
        let spoken = h.spoken.lock().unwrap();
        assert_eq!(spoken.as_slice(), ["再见，下次见！"]);
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_intent_reply_degrades_to_chat() {
        let h = harness(
            vec![Some("讲个笑话"), Some("再见")],
            vec![ChatResponse::text("plain text, not JSON")],
        );
        h.executor.execute(once_task()).await.unwrap();
        let spoken = h.spoken.lock().unwrap();
        assert!(spoken.contains(&"plain text, not JSON".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn conversation_task_completes_with_totals() {
        let h = harness(vec![Some("再见")], vec![]);
        let task = once_task();
        h.executor.execute(task.clone()).await.unwrap();
        let t = task.lock().await;
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result.as_ref().unwrap()["total_conversations"], 1);
    }

    #[test]
    fn goodbye_detection() {
        assert!(ConversationExecutor::is_goodbye("再见"));
        assert!(ConversationExecutor::is_goodbye("那就ByeBye吧"));
        assert!(ConversationExecutor::is_goodbye("你退下吧"));
        assert!(!ConversationExecutor::is_goodbye("今天天气怎么样"));
    }

    #[test]
    fn listening_flags_and_events() {
        let h = harness(vec![], vec![]);
        assert!(!h.executor.is_running());
        h.executor.start_listening();
        assert!(h.executor.is_running());
        assert!(h.executor.is_listening());
        h.executor.stop_listening();
        assert!(!h.executor.is_running());

        let events = h.events.lock().unwrap();
        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"listening_started"));
        assert!(names.contains(&"listening_stopped"));
    }

    #[test]
    fn message_log_caps_and_clears() {
        let h = harness(vec![], vec![]);
        for i in 0..60 {
            h.executor.add_message("user", &format!("m{i}"));
        }
        let messages = h.executor.get_messages(None);
        assert_eq!(messages.len(), 50);
        assert_eq!(h.executor.get_messages(Some(5)).len(), 5);

        h.executor.clear_messages();
        assert!(h.executor.get_messages(None).is_empty());
        let events = h.events.lock().unwrap();
        assert!(events.iter().any(|(n, _)| n == "messages_cleared"));
    }

    #[test]
    fn format_search_results() {
        let result = json!({
            "success": true,
            "result": {
                "query": "北京今天天气",
                "results": [
                    { "title": "北京天气", "snippet": "晴，15°C", "link": "" },
                    { "title": "预报", "snippet": "明天多云", "link": "" }
                ]
            }
        });
        let text = format_tool_output(&result);
        assert!(text.contains("1. 北京天气"));
        assert!(text.contains("晴，15°C"));
    }

    #[test]
    fn format_list_output() {
        let result = json!({
            "result": [
                { "title": "a", "snippet": "s1" },
                { "title": "b", "snippet": "s2" },
                { "title": "c", "snippet": "s3" },
                { "title": "d", "snippet": "s4" }
            ]
        });
        let text = format_tool_output(&result);
        assert!(text.contains("1. a - s1"));
        assert!(text.contains("3. c - s3"));
        assert!(!text.contains("4. d"), "only the first three items render");
    }

    #[test]
    fn format_prefers_final_result() {
        let result = json!({
            "final_result": { "formatted_output": "ignored", "result": "the answer" },
            "result": "shadowed"
        });
        assert_eq!(format_tool_output(&result), "the answer");
    }

    #[test]
    fn format_empty_results_says_so() {
        let result = json!({ "result": { "query": "x", "results": [] } });
        assert_eq!(format_tool_output(&result), "No relevant results found");
    }
}
