//! 子执行结果
//!
//! ExecutionResult 是唯一从子执行回到父日志的产物；父日志只取 summary。

use std::time::Duration;

use serde::Serialize;

use crate::core::CapabilityError;

/// summary 上限（字符）
pub const MAX_SUMMARY_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// 子执行中的一步
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    /// use_tool / use_skill / call_chain / think / finish ...
    pub action: String,
    pub target: Option<String>,
    pub ok: bool,
    pub output: String,
}

impl StepRecord {
    pub fn new(index: usize, action: impl Into<String>, target: Option<&str>, ok: bool, output: impl Into<String>) -> Self {
        Self {
            index,
            action: action.into(),
            target: target.map(String::from),
            ok,
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub summary: String,
    pub steps: Vec<StepRecord>,
    pub errors: Vec<String>,
    pub duration: Duration,
    /// 失败时的错误分类（capability_not_found / step_budget_exhausted ...）
    pub error_code: Option<String>,
}

fn bound_summary(summary: String) -> String {
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        summary.chars().take(MAX_SUMMARY_CHARS).collect::<String>() + "\n...[truncated]"
    } else {
        summary
    }
}

impl ExecutionResult {
    pub fn success(summary: impl Into<String>, steps: Vec<StepRecord>, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Success,
            summary: bound_summary(summary.into()),
            steps,
            errors: Vec::new(),
            duration,
            error_code: None,
        }
    }

    pub fn failed(
        code: &str,
        summary: impl Into<String>,
        steps: Vec<StepRecord>,
        errors: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            summary: bound_summary(summary.into()),
            steps,
            errors,
            duration,
            error_code: Some(code.to_string()),
        }
    }

    /// 由单个能力错误构造失败结果
    pub fn from_error(err: &CapabilityError, steps: Vec<StepRecord>, duration: Duration) -> Self {
        Self::failed(err.code(), err.to_string(), steps, vec![err.to_string()], duration)
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
