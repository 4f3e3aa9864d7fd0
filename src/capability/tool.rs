//! ToolExecutor：一次原子能力调用
//!
//! 没有内部推理循环；summary 直接是工具的输出或错误描述。调用同时以 tool_result / error
//! 条目记入执行器自己的日志（审计用）。

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::{CapabilityKind, ExecutionResult, StepRecord, SubExecution};
use crate::memory::{ContextLog, Entry};
use crate::tools::ToolRunner;

const TOOL_PREFIX: &str = "Tool execution context.";

pub struct ToolExecutor {
    runner: ToolRunner,
    log: ContextLog,
}

impl ToolExecutor {
    /// seed 为 None 时使用一个只含固定前缀的空日志（直接工具调用无需快照）
    pub fn new(runner: ToolRunner, seed: Option<ContextLog>) -> Self {
        Self {
            runner,
            log: seed.unwrap_or_else(|| ContextLog::in_memory(TOOL_PREFIX)),
        }
    }
}

#[async_trait]
impl SubExecution for ToolExecutor {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Tool
    }

    async fn execute(&mut self, command: &str, args: Value) -> ExecutionResult {
        let start = Instant::now();
        let outcome = self.runner.run(command, args).await;
        let (entry, result) = match outcome {
            Ok(output) => {
                let step = StepRecord::new(1, "use_tool", Some(command), true, output.clone());
                (
                    Entry::tool_result(command, output.clone()),
                    ExecutionResult::success(output, vec![step], start.elapsed()),
                )
            }
            Err(e) => {
                let step = StepRecord::new(1, "use_tool", Some(command), false, e.to_string());
                (
                    Entry::error(e.code(), e.to_string()),
                    ExecutionResult::from_error(&e, vec![step], start.elapsed()),
                )
            }
        };
        if let Err(e) = self.log.append(entry) {
            tracing::warn!(tool = command, error = %e, "tool audit entry rejected");
        }
        result
    }

    fn log(&self) -> &ContextLog {
        &self.log
    }
}
