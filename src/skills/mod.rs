//! 技能系统
//!
//! 技能（Skill）是一段较长的指令文本 + 可调用工具白名单 + 资源文件，
//! 由 SkillExecutor 在构造时按 id 取得。
//!
//! 目录结构：
//! ```text
//! config/skills/
//! ├── research/
//! │   ├── skill.toml      # 技能元数据（id、name、description、allowed_tools、max_steps）
//! │   ├── capability.md   # 指令文本
//! │   └── ...             # 其余文件均作为资源路径
//! └── ...
//! ```

mod loader;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::CapabilityError;

pub use loader::SkillLoader;

/// 技能定义
#[derive(Debug, Clone, PartialEq)]
pub struct SkillDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub instruction_text: String,
    pub allowed_capability_names: Vec<String>,
    pub resource_paths: Vec<PathBuf>,
    /// 覆盖全局的技能步数上限
    pub max_steps: Option<usize>,
}

impl SkillDefinition {
    /// 用于 LLM 选择的简短描述
    pub fn summary(&self) -> String {
        format!("[{}] {}: {}", self.id, self.name, self.description)
    }

    pub fn allows(&self, capability: &str) -> bool {
        self.allowed_capability_names.iter().any(|n| n == capability)
    }
}

/// 技能定义来源
#[async_trait]
pub trait SkillSource: Send + Sync {
    /// 不存在时返回 CapabilityError::NotFound
    async fn load(&self, id: &str) -> Result<SkillDefinition, CapabilityError>;

    /// 所有技能的摘要（按 id 排序）
    async fn summaries(&self) -> Vec<String>;
}

/// 内存技能源（测试与嵌入式使用）
#[derive(Debug, Default, Clone)]
pub struct InMemorySkillSource {
    skills: BTreeMap<String, SkillDefinition>,
}

impl InMemorySkillSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skill(mut self, skill: SkillDefinition) -> Self {
        self.skills.insert(skill.id.clone(), skill);
        self
    }
}

#[async_trait]
impl SkillSource for InMemorySkillSource {
    async fn load(&self, id: &str) -> Result<SkillDefinition, CapabilityError> {
        self.skills
            .get(id)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(format!("skill '{id}'")))
    }

    async fn summaries(&self) -> Vec<String> {
        self.skills.values().map(SkillDefinition::summary).collect()
    }
}
