//! 集成测试共用的装配函数

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hive::capability::{CapabilityContext, ExecutorSettings};
use hive::llm::ScriptedLlmClient;
use hive::memory::{ArchiveSink, ContextLog, InMemoryArchive};
use hive::react::{Orchestrator, OrchestratorSettings};
use hive::skills::{InMemorySkillSource, SkillDefinition};
use hive::tools::{EchoTool, FileReadTool, FileWriteTool, SafeFs, Tool, ToolRegistry, ToolRunner};

/// 睡眠很久的工具，用来制造可以被取消的挂起点
pub struct SleepyTool;

#[async_trait]
impl Tool for SleepyTool {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn description(&self) -> &str {
        "sleeps for a minute"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("woke up".into())
    }
}

pub fn research_skill() -> SkillDefinition {
    SkillDefinition {
        id: "research".to_string(),
        name: "Research".to_string(),
        description: "Write a short report".to_string(),
        instruction_text: "Write the report to report.md, then finish.".to_string(),
        allowed_capability_names: vec!["file_write".to_string(), "file_read".to_string()],
        resource_paths: vec![PathBuf::from("templates/report.md")],
        max_steps: None,
    }
}

pub fn tools(root: &Path) -> ToolRunner {
    let fs = SafeFs::new(root);
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(FileReadTool::new(fs.clone()));
    registry.register(FileWriteTool::new(fs));
    registry.register(SleepyTool);
    ToolRunner::new(Arc::new(registry), 120)
}

pub fn context(mock: Arc<ScriptedLlmClient>, root: &Path) -> CapabilityContext {
    CapabilityContext::new(
        mock,
        tools(root),
        Arc::new(InMemorySkillSource::new().with_skill(research_skill())),
        ExecutorSettings::default(),
    )
}

pub fn orchestrator(
    mock: Arc<ScriptedLlmClient>,
    root: &Path,
    archive: Arc<dyn ArchiveSink>,
    settings: OrchestratorSettings,
) -> Orchestrator {
    let log = ContextLog::new("You are a test agent.", archive);
    Orchestrator::new(log, context(mock, root), settings)
}

pub fn in_memory_archive() -> Arc<InMemoryArchive> {
    Arc::new(InMemoryArchive::new())
}
