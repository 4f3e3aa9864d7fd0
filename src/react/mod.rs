//! 认知层：Decision 模型、Planner、Orchestrator 主循环与过程事件

pub mod decision;
pub mod events;
pub mod loop_;
pub mod planner;

pub use decision::{Action, Decision, NextAction};
pub use events::{preview, AgentEvent, EventSink};
pub use loop_::{Orchestrator, OrchestratorSettings, RunOutcome, RunStatus};
pub use planner::{parse_decision, Planner};
