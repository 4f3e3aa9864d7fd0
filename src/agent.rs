//! Headless Agent 运行时
//!
//! create_agent_components 按配置构建 LLM / 工具 / 技能 / 归档，多个会话可共享；
//! new_session 为每个会话新建独立的根 ContextLog 与 Orchestrator（可从归档恢复上次的会话）；
//! process_request 对单条请求跑完整个编排循环并返回结果。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::capability::CapabilityContext;
use crate::config::AppConfig;
use crate::core::orchestrator::create_llm_from_config;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{ArchiveSink, ContextLog, JsonlArchive};
use crate::react::{Orchestrator, RunOutcome};
use crate::skills::{SkillLoader, SkillSource};
use crate::tools::{
    EchoTool, FileListTool, FileReadTool, FileWriteTool, SafeFs, ToolRegistry, ToolRunner,
    WebFetchTool,
};

const DEFAULT_SYSTEM_PROMPT: &str = "You are Hive, a task agent. Decide one step at a time.\n\n\
Tools:\n{{tools}}\n\nSkills:\n{{skills}}\n\n\
Use `use_tool` for a single tool call, `use_skill` to delegate a multi-step task to a skill, \
`call_chain` to run a fixed sequence of steps, `think` to reason further, and \
`respond_to_user` or `finish` when you have the final answer.";

/// 预构建的 Agent 组件，可多会话共享
pub struct AgentComponents {
    pub config: AppConfig,
    pub workspace: PathBuf,
    pub llm: Arc<dyn LlmClient>,
    pub tools: ToolRunner,
    pub skills: Arc<SkillLoader>,
    pub archive: Arc<dyn ArchiveSink>,
    pub system_prompt: String,
}

/// 把工具 schema 与技能摘要填入提示词模板（`{{tools}}` / `{{skills}}`）
pub fn build_system_prompt(template: &str, tools_schema: &str, skill_summaries: &[String]) -> String {
    let skills = if skill_summaries.is_empty() {
        "(none)".to_string()
    } else {
        skill_summaries
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    template
        .replace("{{tools}}", tools_schema)
        .replace("{{skills}}", &skills)
}

fn read_prompt_template(cfg: &AppConfig) -> String {
    let candidates: Vec<PathBuf> = match &cfg.app.system_prompt_path {
        Some(p) => vec![p.clone()],
        None => vec![
            PathBuf::from("config/prompts/system.txt"),
            PathBuf::from("../config/prompts/system.txt"),
        ],
    };
    candidates
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 注册内置工具：echo、file_*（沙箱于 filesystem_root）、web_fetch
pub fn default_tools(cfg: &AppConfig, workspace: &Path) -> ToolRunner {
    let fs_root = cfg
        .tools
        .filesystem_root
        .clone()
        .unwrap_or_else(|| workspace.to_path_buf());
    let fs = SafeFs::new(&fs_root);

    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(FileReadTool::new(fs.clone()));
    registry.register(FileWriteTool::new(fs.clone()));
    registry.register(FileListTool::new(fs));
    registry.register(WebFetchTool::new(
        cfg.tools.fetch.allowed_domains.clone(),
        cfg.tools.fetch.timeout_secs,
        cfg.tools.fetch.max_result_chars,
    ));
    ToolRunner::new(Arc::new(registry), cfg.tools.tool_timeout_secs)
}

/// 创建 Agent 组件：工作目录、归档、LLM、工具、技能与系统提示词
pub async fn create_agent_components(cfg: AppConfig) -> anyhow::Result<AgentComponents> {
    let workspace = cfg.app.workspace_root.clone();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("create workspace {}", workspace.display()))?;
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    let archive_dir = cfg.archive_dir(&workspace);
    let archive = JsonlArchive::new(&archive_dir)
        .with_context(|| format!("open archive {}", archive_dir.display()))?;

    let llm = create_llm_from_config(&cfg);
    let tools = default_tools(&cfg, &workspace);

    let skills = Arc::new(SkillLoader::new(&cfg.skills.dir));
    skills.load_all().await.context("load skills")?;

    let system_prompt = build_system_prompt(
        &read_prompt_template(&cfg),
        &tools.registry().to_schema_json(),
        &skills.summaries().await,
    );
    tracing::info!(
        workspace = %workspace.display(),
        tools = tools.tool_names().len(),
        "agent components ready"
    );

    Ok(AgentComponents {
        config: cfg,
        workspace,
        llm,
        tools,
        skills,
        archive: Arc::new(archive),
        system_prompt,
    })
}

impl AgentComponents {
    /// 新会话：独立的根日志，共享 LLM / 工具 / 技能 / 归档。
    /// 开启 resume_session 时先恢复存档；存档损坏只记警告，从空会话开始
    pub fn new_session(&self) -> Orchestrator {
        let mut log = ContextLog::new(self.system_prompt.clone(), self.archive.clone())
            .with_settings(self.config.log_settings());
        if self.config.context.resume_session {
            if let Err(e) = log.restore_session() {
                tracing::warn!(error = %e, "failed to restore session, starting fresh");
            }
        }
        let ctx = CapabilityContext::new(
            self.llm.clone(),
            self.tools.clone(),
            self.skills.clone(),
            self.config.executor_settings(),
        );
        Orchestrator::new(log, ctx, self.config.orchestrator_settings())
    }
}

/// 处理单条请求：跑编排循环，返回结果
pub async fn process_request(
    orchestrator: &mut Orchestrator,
    request: &str,
) -> Result<RunOutcome, AgentError> {
    let outcome = orchestrator.run(request).await?;
    let (prompt, completion, total) = orchestrator.token_usage();
    tracing::info!(
        status = outcome.status.as_str(),
        steps = outcome.steps,
        prompt_tokens = prompt,
        completion_tokens = completion,
        total_tokens = total,
        "request processed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::RunStatus;

    #[test]
    fn test_build_system_prompt() {
        let prompt = build_system_prompt(
            "T:\n{{tools}}\nS:\n{{skills}}",
            "[]",
            &["[research] Research: reports".to_string()],
        );
        assert_eq!(prompt, "T:\n[]\nS:\n- [research] Research: reports");
        assert!(build_system_prompt("{{skills}}", "", &[]).contains("(none)"));
    }

    #[tokio::test]
    async fn test_components_from_config_run_with_mock_llm() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = dir.path().join("ws");
        cfg.skills.dir = dir.path().join("skills");
        cfg.llm.provider = "mock".to_string();

        let components = create_agent_components(cfg).await.unwrap();
        assert!(components.workspace.join("archive").exists());
        assert!(components.system_prompt.contains("file_read"));

        let mut session = components.new_session();
        let outcome = process_request(&mut session, "hello").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.response.contains("No language model is configured"));
    }

    #[tokio::test]
    async fn test_new_session_resumes_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = dir.path().join("ws");
        cfg.skills.dir = dir.path().join("skills");
        cfg.llm.provider = "mock".to_string();

        let components = create_agent_components(cfg.clone()).await.unwrap();
        let mut first = components.new_session();
        process_request(&mut first, "remember me").await.unwrap();
        assert!(components.workspace.join("archive").join("session.json").exists());

        // 重新构建组件，模拟进程重启
        let components = create_agent_components(cfg.clone()).await.unwrap();
        let resumed = components.new_session();
        assert_eq!(resumed.log().id(), first.log().id());
        assert_eq!(resumed.log().entries(), first.log().entries());
        assert_eq!(resumed.log().originating_request(), Some("remember me"));

        cfg.context.resume_session = false;
        let components = create_agent_components(cfg).await.unwrap();
        assert!(components.new_session().log().is_empty());
    }
}
