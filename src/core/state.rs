//! Orchestrator 阶段
//!
//! Idle → Thinking → Deciding → {Delegating → Thinking} | Responding → Finished；
//! 取消与致命错误分别落在 Cancelled / Failed。

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    #[default]
    Idle,
    Thinking,
    Deciding,
    Delegating,
    Responding,
    Finished,
    Cancelled,
    Failed,
}

impl AgentPhase {
    /// 是否为终止阶段（本次 run 已结束）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentPhase::Finished | AgentPhase::Cancelled | AgentPhase::Failed
        )
    }
}
