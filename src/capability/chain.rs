//! ChainExecutor：按顺序执行一组步骤
//!
//! 命令是 JSON 数组 `[{"type": "tool"|"skill"|"chain", "command": "...", "parameters": {...}}]`。
//! 每一步都从链日志的最新快照构造子执行器；上一步的 summary 既会替换参数中的 `{{previous}}`，
//! 也会作为条目写入链日志从而出现在下一步的种子里。首个失败的步骤中止整条链，已完成的步骤记录保留。

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::{
    CapabilityContext, CapabilityKind, ExecutionResult, StepRecord, SubExecution,
};
use crate::core::CapabilityError;
use crate::memory::{ContextLog, Entry, Snapshot, META_STEP};
use crate::react::{preview, AgentEvent};

/// 参数中引用上一步输出的占位符
pub const PREVIOUS_PLACEHOLDER: &str = "{{previous}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSettings {
    /// 单条链的最大步骤数
    pub max_steps: usize,
    /// 链嵌套深度上限
    pub max_depth: usize,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            max_steps: 16,
            max_depth: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    #[serde(rename = "type")]
    pub kind: CapabilityKind,
    pub command: String,
    #[serde(default)]
    pub parameters: Value,
}

/// 解析步骤：command 为 JSON 数组，或 args 中带 `steps` 数组
pub fn parse_steps(command: &str, args: &Value) -> Result<Vec<ChainStep>, CapabilityError> {
    let trimmed = command.trim();
    let steps: Vec<ChainStep> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| CapabilityError::invalid("chain", format!("malformed chain: {e}")))?
    } else if let Some(steps) = args.get("steps") {
        serde_json::from_value(steps.clone())
            .map_err(|e| CapabilityError::invalid("chain", format!("malformed chain: {e}")))?
    } else {
        return Err(CapabilityError::invalid(
            "chain",
            "command must be a JSON array of steps",
        ));
    };
    if steps.is_empty() {
        return Err(CapabilityError::invalid("chain", "chain has no steps"));
    }
    Ok(steps)
}

/// 把参数里的 `{{previous}}` 替换为上一步的 summary
fn substitute_previous(value: Value, previous: Option<&str>) -> Value {
    let Some(previous) = previous else {
        return value;
    };
    match value {
        Value::String(s) if s.contains(PREVIOUS_PLACEHOLDER) => {
            Value::String(s.replace(PREVIOUS_PLACEHOLDER, previous))
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| substitute_previous(v, Some(previous)))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_previous(v, Some(previous))))
                .collect(),
        ),
        other => other,
    }
}

pub struct ChainExecutor {
    ctx: CapabilityContext,
    log: ContextLog,
}

impl ChainExecutor {
    pub fn new(ctx: CapabilityContext, snapshot: Snapshot) -> Self {
        let log = ctx.seeded_log(snapshot);
        Self { ctx, log }
    }

    fn append(&mut self, entry: Entry) {
        if let Err(e) = self.log.append(entry) {
            tracing::warn!(log = %self.log.id(), error = %e, "chain entry rejected");
        }
    }
}

#[async_trait]
impl SubExecution for ChainExecutor {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Chain
    }

    async fn execute(&mut self, command: &str, args: Value) -> ExecutionResult {
        let start = Instant::now();
        let steps = match parse_steps(command, &args) {
            Ok(steps) => steps,
            Err(e) => return ExecutionResult::from_error(&e, Vec::new(), start.elapsed()),
        };
        let max_steps = self.ctx.settings.chain.max_steps;
        if steps.len() > max_steps {
            let err = CapabilityError::invalid(
                "chain",
                format!("chain has {} steps, limit is {max_steps}", steps.len()),
            );
            return ExecutionResult::from_error(&err, Vec::new(), start.elapsed());
        }

        let total = steps.len();
        let depth = self.ctx.depth();
        let mut records: Vec<StepRecord> = Vec::with_capacity(total);
        let mut previous: Option<String> = None;

        for (i, step) in steps.into_iter().enumerate() {
            let index = i + 1;
            if self.ctx.cancel.is_cancelled() {
                return ExecutionResult::failed(
                    "cancelled",
                    format!("Chain cancelled before step {index}/{total}"),
                    records,
                    vec!["cancelled".to_string()],
                    start.elapsed(),
                );
            }

            let params = match &step.parameters {
                Value::Null => Value::Object(Default::default()),
                p => substitute_previous(p.clone(), previous.as_deref()),
            };
            self.ctx.events.emit(AgentEvent::Action {
                source: "chain".to_string(),
                action: step.kind.as_str().to_string(),
                target: Some(step.command.clone()),
            });
            tracing::debug!(depth, step = index, kind = %step.kind, command = %step.command, "chain step");

            let result = match self.ctx.spawn(step.kind, self.log.snapshot()) {
                Ok(mut child) => child.execute(&step.command, params).await,
                Err(e) => ExecutionResult::from_error(&e, Vec::new(), start.elapsed()),
            };
            records.push(StepRecord::new(
                index,
                step.kind.as_str(),
                Some(&step.command),
                result.is_success(),
                result.summary.clone(),
            ));
            self.ctx.events.emit(AgentEvent::Result {
                source: "chain".to_string(),
                ok: result.is_success(),
                preview: preview(&result.summary, 200),
            });

            if !result.is_success() {
                let code = result
                    .error_code
                    .clone()
                    .unwrap_or_else(|| "capability_execution_failed".to_string());
                self.append(Entry::error(&code, result.summary.clone()).with_metadata(META_STEP, index));
                let mut errors = result.errors.clone();
                if errors.is_empty() {
                    errors.push(result.summary.clone());
                }
                return ExecutionResult::failed(
                    &code,
                    format!(
                        "Chain aborted at step {index}/{total} ({} {}): {}",
                        step.kind, step.command, result.summary
                    ),
                    records,
                    errors,
                    start.elapsed(),
                );
            }

            self.append(
                Entry::assistant(format!(
                    "Step {index} ({} {}) result:\n{}",
                    step.kind, step.command, result.summary
                ))
                .with_metadata(META_STEP, index),
            );
            previous = Some(result.summary);
        }

        let last = previous.unwrap_or_default();
        ExecutionResult::success(
            format!("Chain completed {total} steps.\n{last}"),
            records,
            start.elapsed(),
        )
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
    use crate::skills::InMemorySkillSource;
    use crate::tools::{EchoTool, ToolRegistry, ToolRunner};

    fn ctx(mock: Arc<ScriptedLlmClient>) -> CapabilityContext {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        CapabilityContext::new(
            mock,
            ToolRunner::new(Arc::new(registry), 5),
            Arc::new(InMemorySkillSource::new()),
            ExecutorSettings::default(),
        )
    }

    fn snapshot() -> Snapshot {
        ContextLog::in_memory("S").snapshot()
    }

    #[test]
    fn test_parse_steps_errors() {
        assert!(parse_steps("[]", &json!({})).is_err());
        assert!(parse_steps("[{\"type\": \"tool\"", &json!({})).is_err());
        assert!(parse_steps("research", &json!({})).is_err());
        let steps = parse_steps("", &json!({"steps": [{"type": "tool", "command": "echo"}]})).unwrap();
        assert_eq!(steps[0].kind, CapabilityKind::Tool);
        assert_eq!(steps[0].parameters, Value::Null);
    }

    #[test]
    fn test_substitute_previous_nested() {
        let v = substitute_previous(
            json!({"text": "{{previous}}", "list": ["a {{previous}}", 1]}),
            Some("X"),
        );
        assert_eq!(v, json!({"text": "X", "list": ["a X", 1]}));
    }

    #[tokio::test]
    async fn test_chain_feeds_previous_result_forward() {
        let mock = Arc::new(ScriptedLlmClient::new());
        let mut chain = ChainExecutor::new(ctx(mock).nested(), snapshot());
        let command = json!([
            {"type": "tool", "command": "echo", "parameters": {"text": "first"}},
            {"type": "tool", "command": "echo", "parameters": {"text": "got {{previous}}"}}
        ])
        .to_string();
        let result = chain.execute(&command, json!({})).await;

        assert!(result.is_success());
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].output, "got first");
        assert!(result.summary.ends_with("got first"));
    }

    #[tokio::test]
    async fn test_first_failure_aborts_and_keeps_records() {
        let mock = Arc::new(ScriptedLlmClient::new());
        let mut chain = ChainExecutor::new(ctx(mock).nested(), snapshot());
        let command = json!([
            {"type": "tool", "command": "echo", "parameters": {"text": "ok"}},
            {"type": "tool", "command": "missing_tool", "parameters": {}},
            {"type": "tool", "command": "echo", "parameters": {"text": "never"}}
        ])
        .to_string();
        let result = chain.execute(&command, json!({})).await;

        assert!(!result.is_success());
        assert_eq!(result.error_code.as_deref(), Some("capability_not_found"));
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps[0].ok);
        assert!(!result.steps[1].ok);
        assert!(result.summary.contains("step 2/3"));
    }

    #[tokio::test]
    async fn test_nested_chain_depth_is_bounded() {
        let mock = Arc::new(ScriptedLlmClient::new());
        let base = ctx(mock);
        let max_depth = base.settings.chain.max_depth;
        let mut deep = base.clone();
        for _ in 0..max_depth {
            deep = deep.nested();
        }
        let mut chain = ChainExecutor::new(deep, snapshot());
        let inner = json!([{"type": "tool", "command": "echo", "parameters": {"text": "x"}}]).to_string();
        let command = json!([{"type": "chain", "command": inner}]).to_string();
        let result = chain.execute(&command, json!({})).await;
        assert_eq!(result.error_code.as_deref(), Some("capability_not_allowed"));
    }
}
