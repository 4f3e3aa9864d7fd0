//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::capability::{ChainSettings, ExecutorSettings, SkillSettings};
use crate::llm::RetryConfig;
use crate::memory::{BudgetUnit, LogSettings};
use crate::react::OrchestratorSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub context: ContextSection,
    pub agent: AgentSection,
    pub skills: SkillsSection,
    pub chain: ChainSection,
    pub tools: ToolsSection,
    pub llm: LlmSection,
}

/// [app] 段：应用名、工作目录、系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 沙箱根目录
    pub workspace_root: PathBuf,
    /// 系统提示词模板；未设置时依次尝试 config/prompts/system.txt、../config/prompts/system.txt
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            workspace_root: PathBuf::from("./workspace"),
            system_prompt_path: None,
        }
    }
}

/// [context] 段：压缩预算与快照窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub budget: usize,
    pub budget_unit: BudgetUnit,
    pub keep_recent: usize,
    pub snapshot_tail: usize,
    /// 归档目录，未设置时为 `<workspace>/archive`
    pub archive_dir: Option<PathBuf>,
    /// 新会话从归档目录的 session.json 恢复上次的活动会话
    pub resume_session: bool,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            budget: 8000,
            budget_unit: BudgetUnit::Chars,
            keep_recent: 10,
            snapshot_tail: 20,
            archive_dir: None,
            resume_session: true,
        }
    }
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单次请求的全局步数上限
    pub max_steps: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self { max_steps: 10 }
    }
}

/// [skills] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkillsSection {
    pub dir: PathBuf,
    pub max_steps: usize,
    pub max_errors: usize,
    pub progress_check_after: usize,
}

impl Default for SkillsSection {
    fn default() -> Self {
        let s = SkillSettings::default();
        Self {
            dir: PathBuf::from("config/skills"),
            max_steps: s.max_steps,
            max_errors: s.max_errors,
            progress_check_after: s.progress_check_after,
        }
    }
}

/// [chain] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    pub max_steps: usize,
    pub max_depth: usize,
}

impl Default for ChainSection {
    fn default() -> Self {
        let c = ChainSettings::default();
        Self {
            max_steps: c.max_steps,
            max_depth: c.max_depth,
        }
    }
}

/// [tools] 段：文件系统根、工具超时、web_fetch 域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 文件工具的根目录，未设置时与 workspace 相同
    pub filesystem_root: Option<PathBuf>,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub fetch: FetchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            filesystem_root: None,
            tool_timeout_secs: 30,
            fetch: FetchSection::default(),
        }
    }
}

/// [tools.fetch] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "docs.rs".into(),
        "crates.io".into(),
        "doc.rust-lang.org".into(),
        "github.com".into(),
        "raw.githubusercontent.com".into(),
        "en.wikipedia.org".into(),
        "arxiv.org".into(),
        "developer.mozilla.org".into(),
        "news.ycombinator.com".into(),
    ]
}

/// [llm] 段：后端选择与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock；openai 缺少 OPENAI_API_KEY 时退回 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            budget_unit: self.context.budget_unit,
            keep_recent: self.context.keep_recent,
            snapshot_tail: self.context.snapshot_tail,
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            log: self.log_settings(),
            budget: self.context.budget,
            skill: SkillSettings {
                max_steps: self.skills.max_steps,
                max_errors: self.skills.max_errors,
                progress_check_after: self.skills.progress_check_after,
            },
            chain: ChainSettings {
                max_steps: self.chain.max_steps,
                max_depth: self.chain.max_depth,
            },
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_steps: self.agent.max_steps,
            budget: self.context.budget,
        }
    }

    /// 归档目录（相对 workspace 解析）
    pub fn archive_dir(&self, workspace: &std::path::Path) -> PathBuf {
        self.context
            .archive_dir
            .clone()
            .unwrap_or_else(|| workspace.join("archive"))
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
