//! 技能加载器
//!
//! 从 config/skills/ 目录加载技能并缓存；skill.toml 解析失败的目录会被跳过并记录警告。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::core::CapabilityError;
use crate::skills::{SkillDefinition, SkillSource};

const META_FILE: &str = "skill.toml";
const INSTRUCTION_FILE: &str = "capability.md";

/// 技能元数据（skill.toml 中的 [skill] 表）
#[derive(Debug, Clone, Deserialize)]
struct SkillMeta {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    max_steps: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SkillToml {
    skill: SkillMeta,
}

pub struct SkillLoader {
    skills_dir: PathBuf,
    cache: Arc<RwLock<BTreeMap<String, SkillDefinition>>>,
}

impl SkillLoader {
    pub fn new(skills_dir: impl AsRef<Path>) -> Self {
        Self {
            skills_dir: skills_dir.as_ref().to_path_buf(),
            cache: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    /// 扫描目录并刷新缓存；目录不存在时为空
    pub async fn load_all(&self) -> anyhow::Result<usize> {
        let mut loaded = BTreeMap::new();
        if self.skills_dir.exists() {
            for entry in std::fs::read_dir(&self.skills_dir)?.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                match Self::load_skill(&path) {
                    Ok(Some(skill)) => {
                        loaded.insert(skill.id.clone(), skill);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(dir = %path.display(), error = %e, "skip skill"),
                }
            }
        }
        let count = loaded.len();
        *self.cache.write().await = loaded;
        tracing::info!(count, dir = %self.skills_dir.display(), "skills loaded");
        Ok(count)
    }

    fn load_skill(dir: &Path) -> anyhow::Result<Option<SkillDefinition>> {
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta: SkillToml = toml::from_str(&std::fs::read_to_string(&meta_path)?)?;
        let meta = meta.skill;
        let instruction_text =
            std::fs::read_to_string(dir.join(INSTRUCTION_FILE)).unwrap_or_default();

        let mut resource_paths: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                !(p.parent() == Some(dir) && (name == META_FILE || name == INSTRUCTION_FILE))
            })
            .collect();
        resource_paths.sort();

        Ok(Some(SkillDefinition {
            id: meta.id,
            name: meta.name,
            description: meta.description,
            instruction_text,
            allowed_capability_names: meta.allowed_tools,
            resource_paths,
            max_steps: meta.max_steps,
        }))
    }
}

#[async_trait]
impl SkillSource for SkillLoader {
    async fn load(&self, id: &str) -> Result<SkillDefinition, CapabilityError> {
        self.cache
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(format!("skill '{id}'")))
    }

    async fn summaries(&self) -> Vec<String> {
        self.cache
            .read()
            .await
            .values()
            .map(SkillDefinition::summary)
            .collect()
    }
}
