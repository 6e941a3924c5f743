// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Plan-driven MCP executor.
//!
//! A tool-calling task processes ONE plan step per invocation, then
//! either terminates or enqueues a successor task inheriting its evolved
//! plan, context, and retry count.  Single-stepping keeps scheduling fair
//! under the concurrency limit and makes every step boundary a
//! cancellation point.
//!
//! The legacy goal-driven mode (selectable at construction) instead
//! evolves a textual goal per step and judges completion with rule-based
//! evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use fennec_config::ExecutorConfig;
use fennec_mcp::{HistoryEntry, Router, RouterContext, RouterDecision, SharedConnection};
use fennec_model::{ChatRequest, Message};
use fennec_tasks::{
    now_ts, HistoryEvent, Plan, PlanStep, SharedTask, StepStatus, Task, TaskExecutor, TaskSink,
    TaskStatus, TaskType,
};

use crate::executors::home_context::{
    enhance_goal_with_devices, has_home_intent, parse_live_context, HASS_TOOLS,
};
use crate::executors::outcome::{
    classify_error_pattern, classify_task_intent, classify_tool_kind, evaluate_completion,
    extract_tool_output, normalize_tool_result, result_summary, ErrorPattern, IntentKind,
    ToolKind,
};
use crate::prompts::{extract_json_object, plan_generation_prompt, plan_revision_prompt};

/// Router decisions below this confidence are rejected.
const DECISION_CONFIDENCE_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct McpExecutorSettings {
    /// Plan-driven (default) vs. legacy goal-driven execution.
    pub plan_mode: bool,
    pub max_plan_steps: usize,
    pub max_plan_revisions: u32,
    pub home_context_ttl_secs: f64,
    /// Legacy mode: minimum completion confidence to finish the task.
    pub completion_confidence_threshold: f64,
    /// LLM-based plan verification, reserved; rule-based when false.
    pub llm_verification: bool,
}

impl Default for McpExecutorSettings {
    fn default() -> Self {
        Self {
            plan_mode: true,
            max_plan_steps: 20,
            max_plan_revisions: 3,
            home_context_ttl_secs: 60.0,
            completion_confidence_threshold: 0.7,
            llm_verification: false,
        }
    }
}

impl From<&ExecutorConfig> for McpExecutorSettings {
    fn from(cfg: &ExecutorConfig) -> Self {
        Self {
            plan_mode: cfg.plan_mode,
            max_plan_steps: cfg.max_plan_steps,
            max_plan_revisions: cfg.max_plan_revisions,
            home_context_ttl_secs: cfg.home_context_ttl_secs,
            completion_confidence_threshold: cfg.completion_confidence_threshold,
            llm_verification: cfg.verification_mode == "llm",
        }
    }
}

pub struct McpExecutor {
    router: Arc<Router>,
    connections: HashMap<String, SharedConnection>,
    sink: Arc<dyn TaskSink>,
    settings: McpExecutorSettings,
}

impl McpExecutor {
    pub fn new(
        router: Arc<Router>,
        connections: HashMap<String, SharedConnection>,
        sink: Arc<dyn TaskSink>,
        settings: McpExecutorSettings,
    ) -> Self {
        Self { router, connections, sink, settings }
    }

    // ── Plan-driven mode ──────────────────────────────────────────────────────

    async fn execute_plan_driven(&self, task: SharedTask) -> anyhow::Result<()> {
        // Entry validation and first-time intent classification.
        let goal = {
            let mut t = task.lock().await;
            let goal = match t.exec_str("goal").map(str::to_string) {
                Some(g) if !g.is_empty() => g,
                _ => {
                    t.transition_to(TaskStatus::Failed, "Validation failed: no goal");
                    return Ok(());
                }
            };
            if t.ctx_str("task_intent_type").is_none() {
                let user_intent = t
                    .exec_str("user_intent")
                    .map(str::to_string)
                    .unwrap_or_else(|| goal.clone());
                let intent = classify_task_intent(&user_intent);
                t.ctx_set("task_intent_type", json!(intent.as_str()));
                t.log("INFO", format!("task intent classified as {}", intent.as_str()));
            }
            goal
        };

        // A. Generate a plan when the task arrives without one.
        if task.lock().await.plan.is_none() {
            let plan = self.generate_plan(&goal).await;
            let mut t = task.lock().await;
            let steps = plan.steps.len();
            t.plan = Some(plan);
            t.history.push(HistoryEvent::PlanGenerated { timestamp: now_ts(), steps });
            t.log("INFO", format!("plan generated with {steps} steps"));
        }

        // B. Finalize a completed plan.
        {
            let mut t = task.lock().await;
            let completed = t.plan.as_ref().is_some_and(Plan::is_completed);
            if completed {
                let result = final_plan_result(t.plan.as_ref().expect("plan present"));
                t.result = Some(result);
                t.transition_to(TaskStatus::Completed, "Plan completed successfully");
                return Ok(());
            }
        }

        // C. Pick up the current step.
        let (step_index, step_goal) = {
            let mut t = task.lock().await;
            let (too_many, step_info) = {
                let plan = t.plan.as_ref().expect("plan present");
                (
                    plan.steps.len() > self.settings.max_plan_steps,
                    plan.current_step().map(|step| {
                        (plan.current_step_index, step.description.clone(), plan.steps.len())
                    }),
                )
            };
            if too_many {
                t.result = Some(json!({ "success": false, "error": "Plan has too many steps" }));
                t.transition_to(TaskStatus::Failed, "Plan has too many steps");
                return Ok(());
            }
            let Some((index, description, total)) = step_info else {
                t.transition_to(TaskStatus::Failed, "Plan execution error: no current step");
                return Ok(());
            };
            t.log("INFO", format!("executing step {}/{}: {description}", index + 1, total));
            let step = t
                .plan
                .as_mut()
                .expect("plan present")
                .current_step_mut()
                .expect("step present");
            step.status = StepStatus::InProgress;
            step.started_at = Some(now_ts());
            (index, description)
        };

        // Pre-fetch live device context for home-automation goals.
        let is_home = {
            let t = task.lock().await;
            self.is_home_automation_task(&t)
        };
        if is_home {
            self.ensure_home_context(&task).await;
        }

        // D. Decide via the router, with the step description as the goal.
        let router_context = {
            let t = task.lock().await;
            RouterContext {
                goal: step_goal.clone(),
                current_step: step_index,
                history: history_entries(&t.history),
                environment: t.context.clone(),
            }
        };
        let decision = self.router.route(&router_context).await;

        if decision.tool.is_none() {
            return self.handle_no_tool_decision(&task, decision).await;
        }
        if decision.confidence < DECISION_CONFIDENCE_THRESHOLD {
            return self.handle_low_confidence(&task, decision).await;
        }

        // E. Execute the tool and normalize the result.
        let tool_name = decision.tool.clone().expect("tool present");
        let envelope = self.execute_tool(&decision).await;

        // F. Record and process the outcome.
        {
            let mut t = task.lock().await;
            t.history.push(HistoryEvent::ToolCall {
                timestamp: now_ts(),
                step: step_index,
                server_id: decision.server_id.clone(),
                tool: tool_name.clone(),
                arguments: Value::Object(decision.arguments.clone()),
                result: envelope.clone(),
            });
            let step = t
                .plan
                .as_mut()
                .expect("plan present")
                .current_step_mut()
                .expect("step present");
            step.execution_result = Some(envelope.clone());
            step.completed_at = Some(now_ts());
        }

        let success = envelope["success"].as_bool().unwrap_or(false);
        if success {
            self.finish_successful_step(&task, &tool_name, &envelope).await
        } else {
            self.finish_failed_step(&task, &envelope).await
        }
    }

    async fn handle_no_tool_decision(
        &self,
        task: &SharedTask,
        decision: RouterDecision,
    ) -> anyhow::Result<()> {
        if decision.confidence >= DECISION_CONFIDENCE_THRESHOLD {
            // The router is confident no tool is needed: step done.
            let mut t = task.lock().await;
            let plan = t.plan.as_mut().expect("plan present");
            if let Some(step) = plan.current_step_mut() {
                step.status = StepStatus::Completed;
                step.completed_at = Some(now_ts());
                step.execution_result =
                    Some(json!({ "success": true, "reasoning": decision.reasoning }));
            }
            plan.advance_step();
            let index = plan.current_step_index;
            t.transition_to(TaskStatus::Completed, format!("Step {index} completed"));
            drop(t);
            self.spawn_successor(task).await;
            return Ok(());
        }

        // No tool and low confidence: the step failed.
        let revisable = {
            let mut t = task.lock().await;
            let max = self.settings.max_plan_revisions;
            let plan = t.plan.as_mut().expect("plan present");
            if let Some(step) = plan.current_step_mut() {
                step.status = StepStatus::Failed;
                step.completed_at = Some(now_ts());
                step.execution_result =
                    Some(json!({ "success": false, "error": decision.reasoning.clone() }));
            }
            plan.revision_count < max
        };

        if revisable {
            self.revise_plan(task, format!("Cannot find suitable tool: {}", decision.reasoning))
                .await;
            let mut t = task.lock().await;
            let plan = t.plan.as_mut().expect("plan present");
            plan.advance_step();
            let index = plan.current_step_index;
            t.transition_to(TaskStatus::Completed, format!("Step {index} completed"));
            drop(t);
            self.spawn_successor(task).await;
        } else {
            let mut t = task.lock().await;
            t.result = Some(json!({ "success": false, "error": "Cannot find suitable tool" }));
            t.transition_to(TaskStatus::Failed, "Cannot find suitable tool");
        }
        Ok(())
    }

    async fn handle_low_confidence(
        &self,
        task: &SharedTask,
        decision: RouterDecision,
    ) -> anyhow::Result<()> {
        let revisable = {
            let mut t = task.lock().await;
            let max = self.settings.max_plan_revisions;
            let plan = t.plan.as_mut().expect("plan present");
            if let Some(step) = plan.current_step_mut() {
                step.status = StepStatus::Failed;
                step.completed_at = Some(now_ts());
                step.execution_result = Some(
                    json!({ "success": false, "error": format!("Low confidence: {}", decision.confidence) }),
                );
            }
            plan.revision_count < max
        };

        if revisable {
            self.revise_plan(
                task,
                format!("Low confidence decision: {}", decision.confidence),
            )
            .await;
            let mut t = task.lock().await;
            t.plan.as_mut().expect("plan present").advance_step();
            t.transition_to(TaskStatus::Completed, "Step failed, plan revised");
            drop(t);
            self.spawn_successor(task).await;
        } else {
            let mut t = task.lock().await;
            t.result = Some(
                json!({ "success": false, "error": "Low confidence and max revisions reached" }),
            );
            t.transition_to(TaskStatus::Failed, "Low confidence");
        }
        Ok(())
    }

    async fn finish_successful_step(
        &self,
        task: &SharedTask,
        tool_name: &str,
        envelope: &Value,
    ) -> anyhow::Result<()> {
        {
            let mut t = task.lock().await;
            extract_query_result_into_context(&mut t, tool_name, envelope);
            if let Some(step) = t.plan.as_mut().expect("plan present").current_step_mut() {
                step.status = StepStatus::Completed;
            }
        }

        if self.verify_plan(task, envelope).await {
            self.revise_plan(task, "Execution result does not match expectations".into())
                .await;
        }

        {
            let mut t = task.lock().await;
            let plan = t.plan.as_mut().expect("plan present");
            plan.advance_step();
            let current = plan.current_step_index;
            let total = plan.steps.len();
            let output = extract_tool_output(envelope);
            t.result = Some(json!({
                "success": true,
                "plan_completed": false,
                "current_step": current,
                "total_steps": total,
                "latest_result": envelope,
                "result": output.clone(),
                "formatted_output": output,
            }));
            t.transition_to(TaskStatus::Completed, format!("Step {current} completed"));
        }
        self.spawn_successor(task).await;
        Ok(())
    }

    async fn finish_failed_step(&self, task: &SharedTask, envelope: &Value) -> anyhow::Result<()> {
        let error_text = envelope["error"].as_str().unwrap_or("unknown error").to_string();
        {
            let mut t = task.lock().await;
            t.log("ERROR", format!("step failed: {error_text}"));
            if let Some(step) = t.plan.as_mut().expect("plan present").current_step_mut() {
                step.status = StepStatus::Failed;
            }
        }

        let need_revision = self.verify_plan(task, envelope).await;
        let (revisable, can_retry) = {
            let t = task.lock().await;
            let plan = t.plan.as_ref().expect("plan present");
            (plan.revision_count < self.settings.max_plan_revisions, t.can_retry())
        };

        if need_revision && revisable {
            self.revise_plan(task, format!("Step failed: {error_text}")).await;
            let mut t = task.lock().await;
            t.plan.as_mut().expect("plan present").advance_step();
            t.transition_to(TaskStatus::Completed, "Step failed, plan revised");
            drop(t);
            self.spawn_successor(task).await;
        } else if can_retry {
            let mut t = task.lock().await;
            t.increment_retry();
            // Retries caused by stale identifiers must re-fetch device
            // context before the next router call.
            let pattern = classify_error_pattern(&error_text);
            if matches!(pattern, ErrorPattern::ResourceNotFound | ErrorPattern::InvalidParameter) {
                t.ctx_set("force_refresh_home_context", json!(true));
            }
            if let Some(step) = t.plan.as_mut().expect("plan present").current_step_mut() {
                step.status = StepStatus::Pending;
            }
            let (retries, max) = (t.retry_count, t.max_retries);
            t.transition_to(TaskStatus::Retrying, format!("Retry {retries}/{max}"));
            t.transition_to(TaskStatus::Completed, "Retry task created");
            drop(t);
            self.spawn_successor(task).await;
        } else {
            let mut t = task.lock().await;
            t.result = Some(json!({ "success": false, "error": error_text }));
            t.transition_to(TaskStatus::Failed, "Step failed and cannot retry");
        }
        Ok(())
    }

    /// Generate a plan from the goal and a summary of available tools.
    /// Degrades to a single-step plan on LLM failure or an empty answer.
    async fn generate_plan(&self, goal: &str) -> Plan {
        let tools_summary = self
            .router
            .index()
            .all_tools()
            .iter()
            .take(20)
            .map(|t| format!("- {}: {}", t.tool_name, t.description))
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest {
            messages: vec![Message::user(plan_generation_prompt(goal, &tools_summary))],
            json_mode: true,
            ..Default::default()
        };

        let steps = match self.router.llm().chat(request).await {
            Ok(response) => parse_plan_steps(response.text_or_empty()),
            Err(e) => {
                warn!(error = %e, "plan generation failed, using single-step plan");
                Vec::new()
            }
        };

        let mut steps = steps;
        if steps.is_empty() {
            steps.push(PlanStep::new(goal, None));
        }
        if steps.len() > self.settings.max_plan_steps {
            warn!(
                steps = steps.len(),
                max = self.settings.max_plan_steps,
                "plan too long, truncating"
            );
            steps.truncate(self.settings.max_plan_steps);
        }
        Plan::new(steps)
    }

    /// Decide whether the plan needs revision after a step.  Rule-based
    /// policy: only a resource-not-found failure (within the revision
    /// budget) triggers one.  LLM verification is reserved.
    async fn verify_plan(&self, task: &SharedTask, envelope: &Value) -> bool {
        if self.settings.llm_verification {
            return false;
        }
        let t = task.lock().await;
        let plan = t.plan.as_ref().expect("plan present");
        if plan.revision_count >= self.settings.max_plan_revisions {
            return false;
        }
        if !envelope["success"].as_bool().unwrap_or(false) {
            let error = envelope["error"].as_str().unwrap_or("");
            return classify_error_pattern(error) == ErrorPattern::ResourceNotFound;
        }
        false
    }

    /// Skip the remaining Pending steps and append LLM-generated
    /// replacement steps.
    async fn revise_plan(&self, task: &SharedTask, reason: String) {
        let (user_intent, completed) = {
            let t = task.lock().await;
            let user_intent = t
                .exec_str("user_intent")
                .or(t.exec_str("goal"))
                .unwrap_or_default()
                .to_string();
            let plan = t.plan.as_ref().expect("plan present");
            let completed: Vec<String> = plan.steps[..plan.current_step_index]
                .iter()
                .map(|s| format!("- {} [{:?}]", s.description, s.status))
                .collect();
            (user_intent, completed)
        };

        let request = ChatRequest {
            messages: vec![Message::user(plan_revision_prompt(&user_intent, &completed, &reason))],
            json_mode: true,
            ..Default::default()
        };
        let new_steps = match self.router.llm().chat(request).await {
            Ok(response) => parse_plan_steps(response.text_or_empty()),
            Err(e) => {
                warn!(error = %e, "plan revision LLM call failed");
                Vec::new()
            }
        };

        let mut t = task.lock().await;
        let plan = t.plan.as_mut().expect("plan present");
        let index = plan.current_step_index;
        for step in plan.steps[index..].iter_mut() {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
                step.skip_reason = Some(format!("Plan revised: {reason}"));
            }
        }
        let added = new_steps.len();
        plan.steps.extend(new_steps);
        plan.increment_revision();
        let revision_count = plan.revision_count;
        t.history.push(HistoryEvent::PlanRevised {
            timestamp: now_ts(),
            reason: reason.clone(),
            revision_count,
            added_steps: added,
        });
        t.log("INFO", format!("plan revised (#{revision_count}), {added} steps added"));
    }

    /// Dispatch the decision to a local tool or an MCP connection, then
    /// normalize the result envelope.
    async fn execute_tool(&self, decision: &RouterDecision) -> Value {
        let server_id = decision.server_id.as_deref().unwrap_or_default();
        let tool = decision.tool.as_deref().unwrap_or_default();

        if server_id.starts_with("local-") {
            let Some(instance) = self.router.index().local_tool(tool) else {
                return json!({
                    "success": false,
                    "error": format!("Local tool {tool} not found in tool index"),
                });
            };
            debug!(%tool, "calling local tool");
            return match instance.execute(&decision.arguments).await {
                Ok(data) => json!({ "success": true, "result": data.clone(), "content": data }),
                Err(e) => json!({
                    "success": false,
                    "error": format!("Local tool execution failed: {e}"),
                }),
            };
        }

        let Some(conn) = self.connections.get(server_id) else {
            return json!({
                "success": false,
                "error": format!("Connection {server_id} not found"),
            });
        };
        let envelope = conn.lock().await.call_tool(tool, decision.arguments.clone()).await;
        normalize_tool_result(envelope.to_value())
    }

    /// Enqueue a successor inheriting plan, context, execution data, and
    /// the accumulated retry count.
    async fn spawn_successor(&self, task: &SharedTask) {
        let next = {
            let t = task.lock().await;
            let mut next = Task::new(TaskType::McpCall)
                .with_priority(t.priority)
                .with_timeout(t.timeout)
                .with_max_retries(t.max_retries)
                .with_context(t.context.clone())
                .with_execution_data(t.execution_data.clone());
            if let Some(plan) = &t.plan {
                next = next.with_plan(plan.clone());
            }
            next.retry_count = t.retry_count;
            next
        };
        let task_id = self.sink.enqueue(next).await;
        debug!(successor = %task_id, "successor task enqueued");
    }

    // ── Home-automation context ───────────────────────────────────────────────

    fn is_home_automation_task(&self, t: &Task) -> bool {
        if t.ctx_str("task_type") == Some("home_automation") {
            return true;
        }
        if t.context
            .get("home_automation")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return true;
        }
        for event in &t.history {
            if let HistoryEvent::ToolCall { tool, .. } = event {
                if HASS_TOOLS.iter().any(|h| tool.contains(h)) {
                    return true;
                }
            }
        }
        let user_intent = t
            .exec_str("user_intent")
            .or(t.exec_str("goal"))
            .unwrap_or_default();
        has_home_intent(user_intent)
    }

    /// Make sure a fresh device snapshot is cached on the task context.
    /// Refreshes when the cache is stale, when the force flag is set, or
    /// when the last tool call failed with resource-not-found.  Returns
    /// whether the context was updated.
    async fn ensure_home_context(&self, task: &SharedTask) -> bool {
        let now = now_ts();
        let needs_fetch = {
            let mut t = task.lock().await;
            let force = t
                .context
                .get("force_refresh_home_context")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if force {
                t.ctx_set("force_refresh_home_context", json!(false));
                t.log("INFO", "force refresh flag set, refreshing home context");
                true
            } else {
                let fresh = t
                    .context
                    .get("home_live_context")
                    .and_then(|c| c.get("timestamp"))
                    .and_then(Value::as_f64)
                    .map(|ts| now - ts < self.settings.home_context_ttl_secs)
                    .unwrap_or(false);
                if fresh {
                    last_call_was_resource_not_found(&t.history)
                } else {
                    true
                }
            }
        };
        if !needs_fetch {
            debug!("using cached home context");
            return false;
        }

        let Some(conn) = self.find_home_connection() else {
            debug!("no home-automation server configured, skipping context fetch");
            return false;
        };

        let envelope = conn.lock().await.call_tool("GetLiveContext", Map::new()).await;
        if !envelope.success {
            warn!(error = ?envelope.error, "GetLiveContext failed");
            return false;
        }
        let raw = envelope.result.unwrap_or(Value::Null);
        let (devices, areas) = parse_live_context(&raw);

        let mut t = task.lock().await;
        t.log("INFO", format!("home context updated: {} devices", devices.len()));
        t.ctx_set(
            "home_live_context",
            json!({
                "timestamp": now,
                "devices": devices,
                "areas": areas,
                "raw_data": raw,
            }),
        );
        t.ctx_set("home_automation", json!(true));
        true
    }

    fn find_home_connection(&self) -> Option<SharedConnection> {
        self.connections
            .iter()
            .find(|(id, _)| {
                let id = id.to_lowercase();
                id.contains("home") || id.contains("hass")
            })
            .map(|(_, conn)| conn.clone())
    }

    // ── Legacy goal-driven mode ───────────────────────────────────────────────

    async fn execute_goal_driven(&self, task: SharedTask) -> anyhow::Result<()> {
        let (mut goal, user_intent, current_step, max_steps) = {
            let mut t = task.lock().await;
            let goal = match t.exec_str("goal").map(str::to_string) {
                Some(g) if !g.is_empty() => g,
                _ => {
                    t.transition_to(TaskStatus::Failed, "Validation failed: no goal");
                    return Ok(());
                }
            };
            let current_step = t
                .execution_data
                .get("current_step")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let max_steps = t
                .execution_data
                .get("max_steps")
                .and_then(Value::as_u64)
                .unwrap_or(10) as usize;
            let user_intent = t
                .exec_str("user_intent")
                .map(str::to_string)
                .unwrap_or_else(|| goal.clone());
            if current_step == 0 && t.ctx_str("task_intent_type").is_none() {
                let intent = classify_task_intent(&user_intent);
                t.ctx_set("task_intent_type", json!(intent.as_str()));
            }
            (goal, user_intent, current_step, max_steps)
        };

        if current_step >= max_steps {
            let mut t = task.lock().await;
            t.result = Some(json!({ "success": false, "error": "Max steps reached" }));
            t.transition_to(TaskStatus::Completed, "Max steps reached");
            return Ok(());
        }

        // Home context prefetch, with goal enrichment in this mode.
        let is_home = {
            let t = task.lock().await;
            self.is_home_automation_task(&t)
        };
        if is_home && self.ensure_home_context(&task).await {
            let mut t = task.lock().await;
            let devices = t
                .context
                .get("home_live_context")
                .and_then(|c| c.get("devices"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let enhanced = enhance_goal_with_devices(&goal, &devices);
            t.execution_data.insert("goal".into(), json!(enhanced.clone()));
            t.log("INFO", "goal enhanced with device information");
            goal = enhanced;
        }

        let router_context = {
            let t = task.lock().await;
            RouterContext {
                goal: goal.clone(),
                current_step,
                history: history_entries(&t.history),
                environment: t.context.clone(),
            }
        };
        let decision = self.router.route(&router_context).await;

        let Some(tool_name) = decision.tool.clone() else {
            let mut t = task.lock().await;
            if decision.confidence >= DECISION_CONFIDENCE_THRESHOLD {
                t.result = Some(json!({ "success": true, "reasoning": decision.reasoning.clone() }));
                let reason = if decision.reasoning.is_empty() {
                    "No more tools needed".to_string()
                } else {
                    decision.reasoning
                };
                t.transition_to(TaskStatus::Completed, reason);
            } else {
                t.result = Some(json!({
                    "success": false,
                    "error": format!("Cannot find suitable tool: {}", decision.reasoning),
                }));
                t.transition_to(
                    TaskStatus::Failed,
                    format!("Low confidence: {}", decision.confidence),
                );
            }
            return Ok(());
        };

        if decision.confidence < DECISION_CONFIDENCE_THRESHOLD {
            let mut t = task.lock().await;
            t.result = Some(json!({
                "success": false,
                "error": format!("Low confidence: {}", decision.confidence),
            }));
            t.transition_to(
                TaskStatus::Failed,
                format!("Low confidence: {}", decision.confidence),
            );
            return Ok(());
        }

        let envelope = self.execute_tool(&decision).await;
        {
            let mut t = task.lock().await;
            t.history.push(HistoryEvent::ToolCall {
                timestamp: now_ts(),
                step: current_step,
                server_id: decision.server_id.clone(),
                tool: tool_name.clone(),
                arguments: Value::Object(decision.arguments.clone()),
                result: envelope.clone(),
            });
        }

        let success = envelope["success"].as_bool().unwrap_or(false);
        if success {
            {
                let mut t = task.lock().await;
                extract_query_result_into_context(&mut t, &tool_name, &envelope);
            }

            let (intent, requested_tool) = {
                let t = task.lock().await;
                let intent = t
                    .ctx_str("task_intent_type")
                    .map(IntentKind::from_str)
                    .unwrap_or(IntentKind::Unknown);
                // Unknown intent is treated as an action task.
                let intent = if intent == IntentKind::Unknown { IntentKind::ActionTask } else { intent };
                (intent, t.ctx_str("user_requested_tool").map(str::to_string))
            };
            let completion =
                evaluate_completion(&tool_name, intent, requested_tool.as_deref(), &envelope);
            debug!(
                reason = completion.reason,
                confidence = completion.confidence,
                "completion evaluation"
            );

            if completion.completed
                && completion.confidence >= self.settings.completion_confidence_threshold
            {
                let mut t = task.lock().await;
                t.result = Some(json!({
                    "success": true,
                    "completion_reason": completion.reason,
                    "completion_confidence": completion.confidence,
                    "completion_analysis": completion.analysis,
                    "executed_steps": current_step + 1,
                    "tool_result": envelope,
                }));
                t.transition_to(TaskStatus::Completed, completion.analysis.clone());
            } else {
                let new_goal = evolve_goal(&user_intent, &tool_name, &envelope);
                task.lock()
                    .await
                    .transition_to(TaskStatus::Completed, format!("Step {current_step} completed"));
                self.spawn_goal_successor(&task, new_goal, current_step + 1, max_steps, &user_intent, false)
                    .await;
            }
        } else if task.lock().await.can_retry() {
            {
                let mut t = task.lock().await;
                t.increment_retry();
                let (retries, max) = (t.retry_count, t.max_retries);
                t.transition_to(TaskStatus::Retrying, format!("Retry {retries}/{max}"));
                t.transition_to(TaskStatus::Completed, "Retry task created");
            }
            let new_goal = evolve_goal(&user_intent, &tool_name, &envelope);
            self.spawn_goal_successor(&task, new_goal, current_step, max_steps, &user_intent, true)
                .await;
        } else {
            let mut t = task.lock().await;
            let error = envelope["error"].clone();
            t.result = Some(json!({ "success": false, "error": error }));
            t.transition_to(TaskStatus::Failed, "Max retries exceeded");
        }
        Ok(())
    }

    /// Legacy successor: fresh execution data carrying the evolved goal.
    async fn spawn_goal_successor(
        &self,
        task: &SharedTask,
        new_goal: String,
        next_step: usize,
        max_steps: usize,
        user_intent: &str,
        is_retry: bool,
    ) {
        let next = {
            let t = task.lock().await;
            let mut execution_data = Map::new();
            execution_data.insert("goal".into(), json!(new_goal));
            execution_data.insert("current_step".into(), json!(next_step));
            execution_data.insert("max_steps".into(), json!(max_steps));
            execution_data.insert("user_intent".into(), json!(user_intent));

            let mut context = t.context.clone();
            if is_retry {
                // A stale-identifier failure forces a device-context
                // refresh on the retry.
                if let Some(HistoryEvent::ToolCall { result, .. }) = t
                    .history
                    .iter()
                    .rev()
                    .find(|e| matches!(e, HistoryEvent::ToolCall { .. }))
                {
                    let error = result["error"].as_str().unwrap_or("");
                    let pattern = classify_error_pattern(error);
                    if matches!(
                        pattern,
                        ErrorPattern::ResourceNotFound | ErrorPattern::InvalidParameter
                    ) {
                        context.insert("force_refresh_home_context".into(), json!(true));
                    }
                }
            }

            let mut next = Task::new(TaskType::McpCall)
                .with_priority(t.priority)
                .with_timeout(t.timeout)
                .with_max_retries(t.max_retries)
                .with_context(context)
                .with_execution_data(execution_data);
            if is_retry {
                next.retry_count = t.retry_count;
            }
            next
        };
        let task_id = self.sink.enqueue(next).await;
        debug!(successor = %task_id, is_retry, "goal successor enqueued");
    }
}

#[async_trait]
impl TaskExecutor for McpExecutor {
    async fn execute(&self, task: SharedTask) -> anyhow::Result<()> {
        if self.settings.plan_mode {
            self.execute_plan_driven(task).await
        } else {
            self.execute_goal_driven(task).await
        }
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────────

/// Tool-call history condensed for the router prompt.
fn history_entries(history: &[HistoryEvent]) -> Vec<HistoryEntry> {
    history
        .iter()
        .filter_map(|event| match event {
            HistoryEvent::ToolCall { tool, result, .. } => Some(HistoryEntry {
                tool: tool.clone(),
                success: result["success"].as_bool().unwrap_or(false),
            }),
            _ => None,
        })
        .collect()
}

fn last_call_was_resource_not_found(history: &[HistoryEvent]) -> bool {
    if let Some(HistoryEvent::ToolCall { result, .. }) = history
        .iter()
        .rev()
        .find(|e| matches!(e, HistoryEvent::ToolCall { .. }))
    {
        if !result["success"].as_bool().unwrap_or(false) {
            let error = result["error"].as_str().unwrap_or("");
            return classify_error_pattern(error) == ErrorPattern::ResourceNotFound;
        }
    }
    false
}

/// Stash a query-class tool's payload into the context for later steps.
fn extract_query_result_into_context(task: &mut Task, tool_name: &str, envelope: &Value) {
    if classify_tool_kind(tool_name) != ToolKind::Query {
        return;
    }
    if !envelope["success"].as_bool().unwrap_or(false) {
        return;
    }
    let data = envelope
        .get("result")
        .or_else(|| envelope.get("content"))
        .cloned();
    if let Some(data) = data {
        task.ctx_set(&format!("{tool_name}_result"), data);
        task.log("INFO", format!("extracted query result to context: {tool_name}_result"));
    }
}

/// Parse `{steps: [{description, expected_tool}]}` out of a model reply.
fn parse_plan_steps(text: &str) -> Vec<PlanStep> {
    let Some(value) = extract_json_object(text) else {
        return Vec::new();
    };
    value["steps"]
        .as_array()
        .map(|steps| {
            steps
                .iter()
                .filter_map(|s| {
                    let description = s["description"].as_str()?.to_string();
                    let expected_tool = s["expected_tool"].as_str().map(str::to_string);
                    Some(PlanStep::new(description, expected_tool))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Final task result for a completed plan: the last Completed step's
/// output plus per-step summaries.
fn final_plan_result(plan: &Plan) -> Value {
    let mut step_results = Vec::new();
    let mut final_step_result: Option<Value> = None;
    for step in &plan.steps {
        if let Some(result) = &step.execution_result {
            step_results.push(json!({
                "description": step.description,
                "status": step.status,
                "result": result,
            }));
            if step.status == StepStatus::Completed {
                final_step_result = Some(result.clone());
            }
        }
    }
    let final_tool_output = final_step_result.as_ref().and_then(extract_tool_output);
    json!({
        "success": true,
        "plan_completed": true,
        "total_steps": plan.steps.len(),
        "revision_count": plan.revision_count,
        "step_results": step_results,
        "final_result": final_step_result,
        "result": final_tool_output.clone(),
        "formatted_output": final_tool_output,
    })
}

/// Legacy dynamic goal evolution: restate the user intent, summarize the
/// last result, and pick the next directive from the outcome.
fn evolve_goal(user_intent: &str, tool_name: &str, envelope: &Value) -> String {
    let summary = result_summary(tool_name, envelope);
    let success = envelope["success"].as_bool().unwrap_or(false);

    let directive = if success {
        if classify_tool_kind(tool_name) == ToolKind::Query {
            if tool_name.contains("LiveContext") {
                format!(
                    "Home device information gathered; now execute the user's request: {user_intent}\n\n\
                     Pick the right device from the gathered list, using actual entity_ids and area \
                     names; vague placeholders are forbidden."
                )
            } else {
                "Act on the query result".to_string()
            }
        } else {
            "Continue any remaining operations".to_string()
        }
    } else {
        let error = envelope["error"].as_str().unwrap_or("");
        match classify_error_pattern(error) {
            ErrorPattern::ResourceNotFound => {
                "Re-query the available resources, then retry with the correct identifier".into()
            }
            ErrorPattern::InvalidParameter => {
                "Analyze the parameter requirements, adjust them, and retry".into()
            }
            ErrorPattern::ToolUnsupported => {
                "Pick a functionally similar alternative tool and retry".into()
            }
            ErrorPattern::PermissionDenied => {
                "Insufficient permission; try another route or inform the user".into()
            }
            ErrorPattern::NetworkIssue => "Wait and retry later".to_string(),
            ErrorPattern::Unknown => "Analyze the failure and adjust the approach".into(),
        }
    };

    format!(
        "Current user intent: {user_intent}\n\
         Previous result summary: {summary}\n\
         This round's objective: {directive}"
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
