//! 错误分类与恢复动作
//!
//! 能力级错误（capability_*）在本地恢复：写成 error 条目后循环继续；
//! 只有永久性的模型调用失败会终止整个会话。与 RecoveryEngine 配合使用。

use thiserror::Error;

use crate::llm::LlmError;

/// 上下文日志错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// 畸形输入（缺少 kind、重复的 system 条目等）
    #[error("Invalid entry: {0}")]
    Validation(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// 能力执行错误：每种失败一个变体，便于区分可恢复与致命情况
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters for {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Capability {name} failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Capability {name} timed out after {secs}s")]
    Timeout { name: String, secs: u64 },

    /// 技能白名单之外的调用
    #[error("Capability {name} is not allowed in {scope}")]
    NotAllowed { name: String, scope: String },
}

impl CapabilityError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        CapabilityError::InvalidParameters {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        CapabilityError::ExecutionFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CapabilityError::NotFound(_) => "capability_not_found",
            CapabilityError::InvalidParameters { .. } => "capability_invalid_parameters",
            CapabilityError::ExecutionFailed { .. } => "capability_execution_failed",
            CapabilityError::Timeout { .. } => "capability_timeout",
            CapabilityError::NotAllowed { .. } => "capability_not_allowed",
        }
    }
}

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Step budget exhausted after {0} steps")]
    StepBudgetExhausted(usize),

    #[error("Model call failed: {0}")]
    ModelCall(#[from] LlmError),

    /// 模型输出无法解析为 Decision
    #[error("Decision parse error: {0}")]
    DecisionParse(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Capability(e) => e.code(),
            AgentError::StepBudgetExhausted(_) => "step_budget_exhausted",
            AgentError::ModelCall(e) if e.is_transient() => "model_call_failed_transient",
            AgentError::ModelCall(_) => "model_call_failed",
            AgentError::DecisionParse(_) => "decision_parse_failed",
            AgentError::Context(_) => "context_invalid",
            AgentError::Config(_) => "config_invalid",
            AgentError::Cancelled => "cancelled",
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 写成 error 条目并继续（内容作为下一轮的纠错提示）
    RecordAndContinue(String),
    /// 终止当前会话
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_codes_are_distinct() {
        let errs = [
            CapabilityError::NotFound("x".into()),
            CapabilityError::invalid("x", "missing path"),
            CapabilityError::failed("x", "boom"),
            CapabilityError::Timeout {
                name: "x".into(),
                secs: 1,
            },
            CapabilityError::NotAllowed {
                name: "x".into(),
                scope: "skill research".into(),
            },
        ];
        let mut codes: Vec<&str> = errs.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }

    #[test]
    fn test_agent_error_codes() {
        let err = AgentError::from(LlmError::Permanent("401".into()));
        assert_eq!(err.code(), "model_call_failed");
        let err = AgentError::from(LlmError::Transient("429".into()));
        assert_eq!(err.code(), "model_call_failed_transient");
        assert_eq!(AgentError::StepBudgetExhausted(3).code(), "step_budget_exhausted");
        assert_eq!(
            AgentError::from(CapabilityError::NotFound("nope".into())).code(),
            "capability_not_found"
        );
    }
}
