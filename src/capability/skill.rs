//! SkillExecutor：私有的 think → act → observe 循环
//!
//! 把技能指令注入自己的日志，然后按 Decision 循环调用白名单内的工具，直到模型给出完成信号
//! 或耗尽 max_steps。白名单之外的调用是该步的硬失败（error 条目），不会被静默跳过。

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::{
    CapabilityContext, CapabilityKind, ExecutionResult, StepRecord, SubExecution,
};
use crate::core::{AgentError, CapabilityError};
use crate::memory::{ContextLog, Entry, Snapshot, META_STEP};
use crate::react::{preview, Action, AgentEvent, Planner};
use crate::skills::SkillDefinition;

/// shared_memory 中的进度信号
pub const HAS_TANGIBLE_OUTPUT: &str = "has_tangible_output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillSettings {
    pub max_steps: usize,
    /// 模型/决策错误达到该数量即中止
    pub max_errors: usize,
    /// 超过该步数仍无实际产出时插入进度提醒
    pub progress_check_after: usize,
}

impl Default for SkillSettings {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_errors: 3,
            progress_check_after: 3,
        }
    }
}

pub struct SkillExecutor {
    ctx: CapabilityContext,
    log: ContextLog,
}

fn instruction_payload(skill: &SkillDefinition, tools_json: &str, args: &Value) -> String {
    let mut text = format!("# Skill: {} ({})\n\n{}\n", skill.name, skill.id, skill.instruction_text);
    text.push_str(&format!("\n## Allowed tools\n{tools_json}\n"));
    if !skill.resource_paths.is_empty() {
        text.push_str("\n## Resources\n");
        for p in &skill.resource_paths {
            text.push_str(&format!("- {}\n", p.display()));
        }
    }
    if args.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
        text.push_str(&format!("\n## Parameters\n{args}\n"));
    }
    text.push_str(
        "\nOnly use_tool with the allowed tools above. When the task is done, \
        reply with next_action \"finish\" and a short final_answer describing what was produced.",
    );
    text
}

fn progress_reminder(step: usize) -> String {
    format!(
        "Progress check at step {step}: no tangible output has been produced yet. \
        Use an allowed tool to actually produce the result now, or finish if the task is complete."
    )
}

fn cancelled(
    skill: &SkillDefinition,
    completed: usize,
    steps: Vec<StepRecord>,
    errors: Vec<String>,
    start: Instant,
) -> ExecutionResult {
    tracing::info!(skill = %skill.id, steps = completed, "skill cancelled");
    ExecutionResult::failed(
        "cancelled",
        format!("Skill '{}' cancelled after {} steps", skill.id, completed),
        steps,
        errors,
        start.elapsed(),
    )
}

impl SkillExecutor {
    pub fn new(ctx: CapabilityContext, snapshot: Snapshot) -> Self {
        let log = ctx.seeded_log(snapshot);
        Self { ctx, log }
    }

    fn source(&self, skill_id: &str) -> String {
        format!("skill:{skill_id}")
    }

    fn append(&mut self, entry: Entry) {
        if let Err(e) = self.log.append(entry) {
            tracing::warn!(log = %self.log.id(), error = %e, "skill entry rejected");
        }
    }

    fn has_tangible_output(&self) -> bool {
        self.log.get_shared(HAS_TANGIBLE_OUTPUT) == Some(&Value::Bool(true))
    }

    /// 运行一步白名单内的工具，返回该步记录
    async fn run_tool(
        &mut self,
        skill: &SkillDefinition,
        step: usize,
        name: &str,
        args: Value,
    ) -> StepRecord {
        if !skill.allows(name) {
            let err = CapabilityError::NotAllowed {
                name: name.to_string(),
                scope: format!("skill '{}'", skill.id),
            };
            self.append(Entry::error(err.code(), err.to_string()).with_metadata(META_STEP, step));
            return StepRecord::new(step, "use_tool", Some(name), false, err.to_string());
        }
        match self.ctx.tools.run(name, args).await {
            Ok(output) => {
                self.append(Entry::tool_result(name, output.clone()).with_metadata(META_STEP, step));
                self.log.set_shared(HAS_TANGIBLE_OUTPUT, true);
                StepRecord::new(step, "use_tool", Some(name), true, preview(&output, 500))
            }
            Err(e) => {
                self.append(Entry::error(e.code(), e.to_string()).with_metadata(META_STEP, step));
                StepRecord::new(step, "use_tool", Some(name), false, e.to_string())
            }
        }
    }

    async fn run_loop(&mut self, skill: &SkillDefinition, start: Instant) -> ExecutionResult {
        let settings = self.ctx.settings.skill;
        let max_steps = skill.max_steps.unwrap_or(settings.max_steps);
        let planner = Planner::new(self.ctx.llm.clone());
        let cancel = self.ctx.cancel.clone();
        let source = self.source(&skill.id);
        let mut steps = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut decision_errors = 0usize;

        for step in 1..=max_steps {
            if cancel.is_cancelled() {
                return cancelled(skill, step - 1, steps, errors, start);
            }
            self.log.compress_if_needed(self.ctx.settings.budget);

            if step > settings.progress_check_after && !self.has_tangible_output() {
                self.append(Entry::user(progress_reminder(step)));
            }

            let messages = self.log.render_messages();
            let decided = tokio::select! {
                _ = cancel.cancelled() => return cancelled(skill, step - 1, steps, errors, start),
                d = planner.decide(&messages) => d,
            };
            let decision = match decided.and_then(|d| d.action().map(|a| (d, a))) {
                Ok(pair) => pair,
                Err(e) => {
                    let fatal = matches!(&e, AgentError::ModelCall(m) if !m.is_transient());
                    errors.push(format!("Step {step}: {e}"));
                    decision_errors += 1;
                    self.append(Entry::error(e.code(), e.to_string()).with_metadata(META_STEP, step));
                    self.ctx.events.emit(AgentEvent::Error {
                        source: source.clone(),
                        code: e.code().to_string(),
                        text: e.to_string(),
                    });
                    steps.push(StepRecord::new(step, "decide", None, false, e.to_string()));
                    if fatal || decision_errors >= settings.max_errors {
                        return ExecutionResult::failed(
                            e.code(),
                            format!(
                                "Skill '{}' aborted after {} errors: {}",
                                skill.id,
                                errors.len(),
                                e
                            ),
                            steps,
                            errors,
                            start.elapsed(),
                        );
                    }
                    continue;
                }
            };
            let (decision, action) = decision;

            self.append(Entry::thought(decision.reasoning.clone()).with_metadata(META_STEP, step));
            if let Some(goals) = decision.updated_goals.clone().filter(|g| !g.is_empty()) {
                self.log.set_goals(goals);
            }
            self.ctx.events.emit(AgentEvent::Thinking {
                source: source.clone(),
                step,
                text: preview(&decision.reasoning, 300),
            });

            match action {
                Action::Finish(text) | Action::Respond(text) => {
                    self.append(Entry::assistant(text.clone()));
                    steps.push(StepRecord::new(step, "finish", None, true, text.clone()));
                    tracing::info!(skill = %skill.id, steps = step, "skill complete");
                    return ExecutionResult {
                        errors,
                        ..ExecutionResult::success(text, steps, start.elapsed())
                    };
                }
                Action::Think => {
                    steps.push(StepRecord::new(step, "think", None, true, String::new()));
                }
                Action::UseTool { name, args } => {
                    self.ctx.events.emit(AgentEvent::Action {
                        source: source.clone(),
                        action: "use_tool".to_string(),
                        target: Some(name.clone()),
                    });
                    let record = self.run_tool(skill, step, &name, args).await;
                    if !record.ok {
                        errors.push(format!("Step {step}: {}", record.output));
                    }
                    self.ctx.events.emit(AgentEvent::Result {
                        source: source.clone(),
                        ok: record.ok,
                        preview: preview(&record.output, 200),
                    });
                    steps.push(record);
                }
                Action::Delegate { kind, command, .. } => {
                    let err = CapabilityError::NotAllowed {
                        name: format!("{kind} {command}"),
                        scope: format!("skill '{}'", skill.id),
                    };
                    errors.push(format!("Step {step}: {err}"));
                    self.append(Entry::error(err.code(), err.to_string()).with_metadata(META_STEP, step));
                    steps.push(StepRecord::new(step, kind.as_str(), Some(&command), false, err.to_string()));
                }
            }
        }

        ExecutionResult::failed(
            "step_budget_exhausted",
            format!(
                "Skill '{}' stopped: step budget exhausted after {} steps",
                skill.id, max_steps
            ),
            steps,
            errors,
            start.elapsed(),
        )
    }
}

#[async_trait]
impl SubExecution for SkillExecutor {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Skill
    }

    async fn execute(&mut self, command: &str, args: Value) -> ExecutionResult {
        let start = Instant::now();
        let skill = match self.ctx.skills.load(command).await {
            Ok(skill) => skill,
            Err(e) => return ExecutionResult::from_error(&e, Vec::new(), start.elapsed()),
        };

        let missing: Vec<&str> = skill
            .allowed_capability_names
            .iter()
            .map(String::as_str)
            .filter(|name| !self.ctx.tools.registry().contains(name))
            .collect();
        if !missing.is_empty() {
            let err = CapabilityError::failed(
                format!("skill '{}'", skill.id),
                format!("required tools are not registered: {}", missing.join(", ")),
            );
            return ExecutionResult::from_error(&err, Vec::new(), start.elapsed());
        }

        let tools_json = self
            .ctx
            .tools
            .registry()
            .schema_json_filtered(|name| skill.allows(name));
        self.append(Entry::assistant(instruction_payload(&skill, &tools_json, &args)));
        let request = args
            .get("request")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| self.log.originating_request().map(String::from))
            .unwrap_or_else(|| skill.description.clone());
        self.log
            .set_goals(vec![format!("Complete skill '{}': {}", skill.id, request)]);

        self.ctx.events.emit(AgentEvent::Action {
            source: "skill".to_string(),
            action: "start".to_string(),
            target: Some(skill.id.clone()),
        });
        let result = self.run_loop(&skill, start).await;
        tracing::info!(
            skill = %skill.id,
            status = ?result.status,
            steps = result.steps.len(),
            duration_ms = result.duration.as_millis() as u64,
            "skill finished"
        );
        result
    }

    fn log(&self) -> &ContextLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::capability::ExecutorSettings;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{ContextLog, EntryKind};
    use crate::skills::InMemorySkillSource;
    use crate::tools::{EchoTool, ToolRegistry, ToolRunner};

    fn research_skill() -> SkillDefinition {
        SkillDefinition {
            id: "research".into(),
            name: "Research".into(),
            description: "Research a topic".into(),
            instruction_text: "Gather facts then finish.".into(),
            allowed_capability_names: vec!["echo".into()],
            resource_paths: vec![],
            max_steps: None,
        }
    }

    fn ctx(mock: Arc<ScriptedLlmClient>, settings: SkillSettings) -> CapabilityContext {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        CapabilityContext::new(
            mock,
            ToolRunner::new(Arc::new(registry), 5),
            Arc::new(InMemorySkillSource::new().with_skill(research_skill())),
            ExecutorSettings {
                skill: settings,
                ..ExecutorSettings::default()
            },
        )
    }

    fn parent_snapshot() -> Snapshot {
        let mut log = ContextLog::in_memory("S");
        log.record_request("find facts").unwrap();
        log.snapshot()
    }

    fn tool_call(name: &str) -> Value {
        json!({
            "reasoning": "call",
            "next_action": "use_tool",
            "tool_name": name,
            "tool_parameters": {"text": "fact"}
        })
    }

    #[tokio::test]
    async fn test_skill_runs_tools_and_finishes() {
        let mock = Arc::new(ScriptedLlmClient::with_decisions([
            tool_call("echo"),
            json!({"reasoning": "done", "next_action": "finish", "final_answer": "Done: wrote report.md"}),
        ]));
        let mut exec = SkillExecutor::new(ctx(mock.clone(), SkillSettings::default()), parent_snapshot());
        let result = exec.execute("research", json!({})).await;

        assert!(result.is_success());
        assert_eq!(result.summary, "Done: wrote report.md");
        assert_eq!(result.steps.len(), 2);
        assert_eq!(exec.log().get_shared(HAS_TANGIBLE_OUTPUT), Some(&Value::Bool(true)));
        assert!(mock.received()[0]
            .iter()
            .any(|m| m.content.contains("# Skill: Research")));
    }

    #[tokio::test]
    async fn test_disallowed_tool_is_step_failure() {
        let mock = Arc::new(ScriptedLlmClient::with_decisions([
            tool_call("file_write"),
            json!({"reasoning": "done", "next_action": "finish"}),
        ]));
        let mut exec = SkillExecutor::new(ctx(mock, SkillSettings::default()), parent_snapshot());
        let result = exec.execute("research", json!({})).await;

        assert!(!result.steps[0].ok);
        assert!(result.errors[0].contains("not allowed"));
        let err = exec.log().entries().iter().find(|e| e.is_error()).unwrap();
        assert_eq!(err.meta_str(crate::memory::META_ERROR_CODE), Some("capability_not_allowed"));
    }

    #[tokio::test]
    async fn test_step_budget_exhausted_is_failed_result() {
        let mock = Arc::new(ScriptedLlmClient::new());
        mock.set_fallback(crate::llm::ModelReply::Structured(
            json!({"reasoning": "hmm", "next_action": "think"}),
        ));
        let settings = SkillSettings {
            max_steps: 5,
            max_errors: 3,
            progress_check_after: 2,
        };
        let mut exec = SkillExecutor::new(ctx(mock.clone(), settings), parent_snapshot());
        let result = exec.execute("research", json!({})).await;

        assert!(!result.is_success());
        assert_eq!(result.error_code.as_deref(), Some("step_budget_exhausted"));
        assert!(result.summary.contains("step budget exhausted"));
        assert_eq!(mock.calls(), 5);
        let reminders = exec
            .log()
            .entries()
            .iter()
            .filter(|e| e.kind() == EntryKind::User && e.text().starts_with("Progress check"))
            .count();
        assert_eq!(reminders, 3);
    }

    #[tokio::test]
    async fn test_aborts_after_max_errors() {
        let mock = Arc::new(ScriptedLlmClient::new());
        for _ in 0..3 {
            mock.push_text("not json at all");
        }
        let mut exec = SkillExecutor::new(ctx(mock.clone(), SkillSettings::default()), parent_snapshot());
        let result = exec.execute("research", json!({})).await;
        assert!(!result.is_success());
        assert_eq!(result.errors.len(), 3);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_skill_is_not_found() {
        let mock = Arc::new(ScriptedLlmClient::new());
        let mut exec = SkillExecutor::new(ctx(mock.clone(), SkillSettings::default()), parent_snapshot());
        let result = exec.execute("poetry", json!({})).await;
        assert_eq!(result.error_code.as_deref(), Some("capability_not_found"));
        assert_eq!(mock.calls(), 0);
    }

    /// 取消令牌后永不返回的模型
    struct CancelThenHang(tokio_util::sync::CancellationToken);

    #[async_trait]
    impl crate::llm::LlmClient for CancelThenHang {
        async fn complete(
            &self,
            _messages: &[crate::memory::Message],
            _schema: Option<&Value>,
        ) -> Result<crate::llm::ModelReply, crate::llm::LlmError> {
            self.0.cancel();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_last_step_reports_cancelled() {
        let token = tokio_util::sync::CancellationToken::new();
        let mut context = ctx(
            Arc::new(ScriptedLlmClient::new()),
            SkillSettings {
                max_steps: 1,
                ..SkillSettings::default()
            },
        );
        context.llm = Arc::new(CancelThenHang(token.clone()));
        context.cancel = token;

        let mut exec = SkillExecutor::new(context, parent_snapshot());
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            exec.execute("research", json!({})),
        )
        .await
        .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.error_code.as_deref(), Some("cancelled"));
        assert!(result.summary.contains("cancelled after 0 steps"));
    }
}
