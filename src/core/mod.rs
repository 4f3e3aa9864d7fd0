//! 核心编排层：错误与恢复、阶段状态、会话监管、命令驱动的运行时

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{AgentError, CapabilityError, ContextError, RecoveryAction};
pub use orchestrator::{create_agent, AgentHandle, Command};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::AgentPhase;
