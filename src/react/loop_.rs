//! Orchestrator 主循环
//!
//! 每轮：compress_if_needed → render_messages → 模型给出 Decision → 记录 thought → 分派：
//! use_tool 直接调用工具并写入结果条目；use_skill / call_chain 取快照交给子执行器，只把 summary 写回；
//! think 继续下一轮；respond_to_user / finish 结束。全局 max_steps 兜底，取消在每轮开头与每个挂起点检查。

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::capability::{
    CapabilityContext, CapabilityKind, ExecutionResult, SubExecution, ToolExecutor,
};
use crate::core::{AgentError, AgentPhase, ContextError, RecoveryAction, RecoveryEngine};
use crate::memory::{ContextLog, Entry, META_STEP};
use crate::react::{preview, Action, AgentEvent, EventSink, Planner};

const SOURCE: &str = "orchestrator";
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 300;
/// 结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_steps: usize,
    /// 根日志的压缩预算
    pub budget: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_steps: 10,
            budget: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    StepBudgetExhausted,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::StepBudgetExhausted => "step_budget_exhausted",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// 一次 run 的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub response: String,
    /// 实际执行的迭代数
    pub steps: usize,
}

/// 单个会话的编排器：独占一个根 ContextLog
pub struct Orchestrator {
    log: ContextLog,
    planner: Planner,
    ctx: CapabilityContext,
    recovery: RecoveryEngine,
    settings: OrchestratorSettings,
    phase: AgentPhase,
}

impl Orchestrator {
    pub fn new(log: ContextLog, ctx: CapabilityContext, settings: OrchestratorSettings) -> Self {
        Self {
            log,
            planner: Planner::new(ctx.llm.clone()),
            ctx,
            recovery: RecoveryEngine::new(),
            settings,
            phase: AgentPhase::Idle,
        }
    }

    pub fn log(&self) -> &ContextLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut ContextLog {
        &mut self.log
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// 每个请求换一个取消令牌（子执行器共享同一个）
    pub fn set_cancel_token(&mut self, token: CancellationToken) {
        self.ctx.cancel = token;
    }

    pub fn set_event_sink(&mut self, events: EventSink) {
        self.ctx.events = events;
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.planner.token_usage()
    }

    fn append(&mut self, entry: Entry) {
        if let Err(e) = self.log.append(entry) {
            tracing::warn!(log = %self.log.id(), error = %e, "entry rejected");
        }
    }

    fn emit(&self, event: AgentEvent) {
        self.ctx.events.emit(event);
    }

    fn cancelled(&mut self, steps: usize) -> RunOutcome {
        let text = format!("Request cancelled after {steps} steps");
        self.append(Entry::assistant(text.clone()));
        self.phase = AgentPhase::Cancelled;
        tracing::info!(steps, "run cancelled");
        self.emit(AgentEvent::Complete {
            status: RunStatus::Cancelled.as_str().to_string(),
            text: text.clone(),
            steps,
        });
        RunOutcome {
            status: RunStatus::Cancelled,
            response: text,
            steps,
        }
    }

    /// 可恢复错误写成 error 条目并继续；致命错误返回 Err
    fn recover(&mut self, step: usize, err: AgentError) -> Result<(), AgentError> {
        let action = self.recovery.handle(&err);
        let code = err.code();
        self.emit(AgentEvent::Error {
            source: SOURCE.to_string(),
            code: code.to_string(),
            text: err.to_string(),
        });
        match action {
            RecoveryAction::RecordAndContinue(prompt) => {
                tracing::warn!(step, code, error = %err, "recoverable error");
                self.append(Entry::error(code, prompt).with_metadata(META_STEP, step));
                Ok(())
            }
            RecoveryAction::Abort => {
                tracing::error!(step, code, error = %err, "fatal error, aborting run");
                self.append(Entry::error(code, err.to_string()).with_metadata(META_STEP, step));
                self.phase = AgentPhase::Failed;
                Err(err)
            }
        }
    }

    /// 直接工具调用：无需快照，结果作为 tool_result / error 条目写入根日志
    async fn use_tool(&mut self, step: usize, name: &str, args: Value) -> Option<ExecutionResult> {
        let cancel = self.ctx.cancel.clone();
        let mut exec = ToolExecutor::new(self.ctx.tools.clone(), None);
        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            r = exec.execute(name, args) => r,
        };
        let entry = if result.is_success() {
            Entry::tool_result(name, result.summary.clone())
        } else {
            let code = result.error_code.as_deref().unwrap_or("capability_execution_failed");
            Entry::error(code, result.summary.clone())
        };
        self.append(entry.with_metadata(META_STEP, step));
        Some(result)
    }

    /// 委派：快照 → 子执行器 → 只写回 summary
    async fn delegate(
        &mut self,
        step: usize,
        kind: CapabilityKind,
        command: &str,
        args: Value,
    ) -> Option<ExecutionResult> {
        let cancel = self.ctx.cancel.clone();
        let snapshot = self.log.snapshot();
        let result = match self.ctx.spawn(kind, snapshot) {
            Ok(mut child) => {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    r = child.execute(command, args) => r,
                }
            }
            Err(e) => ExecutionResult::from_error(&e, Vec::new(), std::time::Duration::ZERO),
        };
        let entry = match result.error_code.as_deref() {
            Some(code @ ("capability_not_found" | "capability_not_allowed" | "capability_invalid_parameters")) => {
                Entry::error(code, result.summary.clone())
            }
            _ => Entry::assistant(result.summary.clone()),
        };
        self.append(entry.with_metadata(META_STEP, step));
        Some(result)
    }

    /// 处理一个请求直到终止决定、步数耗尽或取消；结束后保存会话
    pub async fn run(&mut self, request: &str) -> Result<RunOutcome, AgentError> {
        let outcome = self.run_steps(request).await;
        self.persist();
        outcome
    }

    /// 会话存档失败不影响本次结果
    fn persist(&self) {
        if let Err(e) = self.log.save_session() {
            tracing::warn!(log = %self.log.id(), error = %e, "failed to save session");
        }
    }

    async fn run_steps(&mut self, request: &str) -> Result<RunOutcome, AgentError> {
        let cancel = self.ctx.cancel.clone();
        let max_steps = self.settings.max_steps;
        self.log.record_request(request)?;
        self.log.set_goals(vec![format!("Complete: {request}")]);
        tracing::info!(log = %self.log.id(), max_steps, "run started");

        for step in 1..=max_steps {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(step - 1));
            }

            self.phase = AgentPhase::Thinking;
            self.log.compress_if_needed(self.settings.budget);
            let messages = self.log.render_messages();

            self.phase = AgentPhase::Deciding;
            let decided = tokio::select! {
                _ = cancel.cancelled() => return Ok(self.cancelled(step - 1)),
                d = self.planner.decide(&messages) => d,
            };
            let decision = match decided {
                Ok(d) => d,
                Err(e) => {
                    self.recover(step, e)?;
                    continue;
                }
            };

            self.append(Entry::thought(decision.reasoning.clone()).with_metadata(META_STEP, step));
            if let Some(goals) = decision.updated_goals.clone().filter(|g| !g.is_empty()) {
                self.log.set_goals(goals);
            }
            self.emit(AgentEvent::Thinking {
                source: SOURCE.to_string(),
                step,
                text: preview(&decision.reasoning, THINKING_PREVIEW_CHARS),
            });

            let action = match decision.action() {
                Ok(a) => a,
                Err(e) => {
                    self.recover(step, e)?;
                    continue;
                }
            };
            let action_name = action.name();
            tracing::debug!(step, action = action_name, "decision");

            let result = match action {
                Action::Think => continue,
                Action::Respond(text) | Action::Finish(text) => {
                    self.phase = AgentPhase::Responding;
                    self.append(Entry::assistant(text.clone()));
                    self.phase = AgentPhase::Finished;
                    tracing::info!(step, "run completed");
                    self.emit(AgentEvent::Complete {
                        status: RunStatus::Completed.as_str().to_string(),
                        text: text.clone(),
                        steps: step,
                    });
                    return Ok(RunOutcome {
                        status: RunStatus::Completed,
                        response: text,
                        steps: step,
                    });
                }
                Action::UseTool { name, args } => {
                    self.phase = AgentPhase::Delegating;
                    self.emit(AgentEvent::Action {
                        source: SOURCE.to_string(),
                        action: "use_tool".to_string(),
                        target: Some(name.clone()),
                    });
                    self.use_tool(step, &name, args).await
                }
                Action::Delegate { kind, command, args } => {
                    self.phase = AgentPhase::Delegating;
                    self.emit(AgentEvent::Action {
                        source: SOURCE.to_string(),
                        action: action_name.to_string(),
                        target: Some(preview(&command, RESULT_PREVIEW_CHARS)),
                    });
                    self.delegate(step, kind, &command, args).await
                }
            };

            match result {
                None => return Ok(self.cancelled(step)),
                Some(result) => {
                    tracing::info!(
                        step,
                        ok = result.is_success(),
                        code = result.error_code.as_deref().unwrap_or(""),
                        "action finished"
                    );
                    self.emit(AgentEvent::Result {
                        source: SOURCE.to_string(),
                        ok: result.is_success(),
                        preview: preview(&result.summary, RESULT_PREVIEW_CHARS),
                    });
                }
            }
        }

        let text = format!("Step budget exhausted after {max_steps} steps without a final answer");
        self.append(Entry::error("step_budget_exhausted", text.clone()));
        self.phase = AgentPhase::Finished;
        tracing::warn!(max_steps, "step budget exhausted");
        self.emit(AgentEvent::Complete {
            status: RunStatus::StepBudgetExhausted.as_str().to_string(),
            text: text.clone(),
            steps: max_steps,
        });
        Ok(RunOutcome {
            status: RunStatus::StepBudgetExhausted,
            response: text,
            steps: max_steps,
        })
    }

    /// 清空会话（活动条目归档，system 前缀保留）；归档失败时会话原样保留
    pub fn clear(&mut self) -> Result<(), ContextError> {
        self.log.clear()?;
        self.phase = AgentPhase::Idle;
        self.persist();
        Ok(())
    }
}
