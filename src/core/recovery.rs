//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 ReAct 循环决定是记录后继续还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Capability(e) => RecoveryAction::RecordAndContinue(format!(
                "{e}. Check the capability name and parameters, then try again or choose another action."
            )),
            AgentError::DecisionParse(raw) => RecoveryAction::RecordAndContinue(format!(
                "The previous output was not a valid decision: {raw}. \
                Respond with a single JSON object matching the decision schema."
            )),
            AgentError::ModelCall(e) if e.is_transient() => {
                RecoveryAction::RecordAndContinue(format!("Model call failed temporarily: {e}"))
            }
            AgentError::Context(e) => RecoveryAction::RecordAndContinue(e.to_string()),
            AgentError::ModelCall(_)
            | AgentError::StepBudgetExhausted(_)
            | AgentError::Config(_)
            | AgentError::Cancelled => RecoveryAction::Abort,
        }
    }
}
