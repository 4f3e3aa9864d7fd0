//! 能力执行器：Tool / Skill / Chain
//!
//! 每个执行器由（快照，能力配置）构造，持有自己新建的私有 ContextLog（以快照为种子，
//! 从不包裹父日志），运行结束后只把 ExecutionResult 交回父级。

pub mod chain;
pub mod result;
pub mod skill;
pub mod tool;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::CapabilityError;
use crate::llm::LlmClient;
use crate::memory::{ContextLog, InMemoryArchive, LogSettings, Snapshot};
use crate::react::EventSink;
use crate::skills::SkillSource;
use crate::tools::ToolRunner;

pub use chain::{ChainExecutor, ChainSettings, ChainStep};
pub use result::{ExecutionResult, ExecutionStatus, StepRecord, MAX_SUMMARY_CHARS};
pub use skill::{SkillExecutor, SkillSettings, HAS_TANGIBLE_OUTPUT};
pub use tool::ToolExecutor;

/// 能力类型（Decision 与链步骤共用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Tool,
    Skill,
    Chain,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Skill => "skill",
            CapabilityKind::Chain => "chain",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 子执行抽象
#[async_trait]
pub trait SubExecution: Send {
    fn kind(&self) -> CapabilityKind;

    /// 运行到结束；能力级失败体现在 ExecutionResult.status 中，不以 Err 抛出
    async fn execute(&mut self, command: &str, args: Value) -> ExecutionResult;

    /// 私有日志（仅供审计，父级从不读取）
    fn log(&self) -> &ContextLog;
}

/// 执行器参数
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub log: LogSettings,
    /// 子日志的压缩预算
    pub budget: usize,
    pub skill: SkillSettings,
    pub chain: ChainSettings,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            budget: 8000,
            skill: SkillSettings::default(),
            chain: ChainSettings::default(),
        }
    }
}

/// 构造执行器所需的共享依赖；克隆成本低（全部为 Arc / 句柄）
#[derive(Clone)]
pub struct CapabilityContext {
    pub llm: Arc<dyn LlmClient>,
    pub tools: ToolRunner,
    pub skills: Arc<dyn SkillSource>,
    pub settings: ExecutorSettings,
    pub cancel: CancellationToken,
    pub events: EventSink,
    depth: usize,
}

impl CapabilityContext {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolRunner,
        skills: Arc<dyn SkillSource>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            llm,
            tools,
            skills,
            settings,
            cancel: CancellationToken::new(),
            events: EventSink::none(),
            depth: 0,
        }
    }

    /// 当前链嵌套深度
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn nested(&self) -> Self {
        let mut ctx = self.clone();
        ctx.depth += 1;
        ctx
    }

    /// 以快照为种子新建私有日志
    pub fn seeded_log(&self, snapshot: Snapshot) -> ContextLog {
        ContextLog::seeded_from(snapshot, Arc::new(InMemoryArchive::new()), self.settings.log)
    }

    /// 按类型构造执行器；链嵌套超过 max_depth 时拒绝
    pub fn spawn(
        &self,
        kind: CapabilityKind,
        snapshot: Snapshot,
    ) -> Result<Box<dyn SubExecution>, CapabilityError> {
        match kind {
            CapabilityKind::Tool => Ok(Box::new(ToolExecutor::new(
                self.tools.clone(),
                Some(self.seeded_log(snapshot)),
            ))),
            CapabilityKind::Skill => Ok(Box::new(SkillExecutor::new(self.clone(), snapshot))),
            CapabilityKind::Chain => {
                if self.depth >= self.settings.chain.max_depth {
                    return Err(CapabilityError::NotAllowed {
                        name: "chain".to_string(),
                        scope: format!("nesting depth {}", self.depth),
                    });
                }
                Ok(Box::new(ChainExecutor::new(self.nested(), snapshot)))
            }
        }
    }
}
