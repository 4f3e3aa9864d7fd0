//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 与绝对路径逃逸）；
//! file_read / file_write / file_list 基于 SafeFs。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

/// 沙箱文件系统：绑定根目录，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn root_canon(&self) -> PathBuf {
        self.root_dir
            .canonicalize()
            .unwrap_or_else(|_| self.root_dir.clone())
    }

    /// 解析已存在的路径
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| format!("Path not found: {path}"))?;
        if canonical.starts_with(self.root_canon()) {
            Ok(canonical)
        } else {
            Err(format!("Path escapes workspace: {path}"))
        }
    }

    /// 解析写入目标（文件可以不存在，但不能含 `..` 或绝对路径）
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, String> {
        let rel = Path::new(path.trim_start_matches("./"));
        if rel.as_os_str().is_empty() {
            return Err("Empty path".to_string());
        }
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(format!("Path escapes workspace: {path}"));
        }
        Ok(self.root_canon().join(rel))
    }

    pub fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed: {e}"))
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<usize, String> {
        let target = self.resolve_for_write(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("Create dir failed: {e}"))?;
        }
        std::fs::write(&target, content).map_err(|e| format!("Write failed: {e}"))?;
        Ok(content.len())
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(|e| format!("List failed: {e}"))? {
            let e = e.map_err(|e| e.to_string())?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let suffix = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{name}{suffix}"));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

fn path_arg(args: &Value) -> &str {
    args.get("path").and_then(|v| v.as_str()).unwrap_or("")
}

pub struct FileReadTool {
    fs: SafeFs,
}

impl FileReadTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Args: {\"path\": \"relative path\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = path_arg(&args);
        tracing::debug!(path = %path, "file_read");
        self.fs.read_file(path)
    }
}

pub struct FileWriteTool {
    fs: SafeFs,
}

impl FileWriteTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text to a file in the workspace (creates parent dirs, overwrites). Args: {\"path\": \"relative path\", \"content\": \"text\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = path_arg(&args);
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
        tracing::debug!(path = %path, bytes = content.len(), "file_write");
        let written = self.fs.write_file(path, content)?;
        Ok(format!("Wrote {written} bytes to {path}"))
    }
}

pub struct FileListTool {
    fs: SafeFs,
}

impl FileListTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List a workspace directory. Args: {\"path\": \"directory, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let entries = self.fs.list_dir(path)?;
        if entries.is_empty() {
            return Ok("(empty)".to_string());
        }
        Ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path());

        let out = FileWriteTool::new(fs.clone())
            .execute(serde_json::json!({"path": "notes/report.md", "content": "# Report"}))
            .await
            .unwrap();
        assert!(out.contains("notes/report.md"));

        let text = FileReadTool::new(fs.clone())
            .execute(serde_json::json!({"path": "notes/report.md"}))
            .await
            .unwrap();
        assert_eq!(text, "# Report");

        let listing = FileListTool::new(fs)
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(listing, "notes/");
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let inner = dir.path().join("root");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "s").unwrap();
        let fs = SafeFs::new(&inner);

        assert!(fs.read_file("../secret.txt").unwrap_err().contains("escapes"));
        assert!(fs.write_file("../evil.txt", "x").is_err());
        assert!(fs.write_file("/etc/evil.txt", "x").is_err());
        assert!(!dir.path().join("evil.txt").exists());
    }
}
