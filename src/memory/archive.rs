//! 压缩归档与会话存档
//!
//! 压缩时被移出活动窗口的条目按原顺序写入只追加的归档；error 条目另写一份错误日志。
//! 每个批次与错误记录都带 log_id，多个会话共用一个 sink 时仍能按日志还原。
//! 另外保存一份活动会话（窗口、goals、shared_memory），启动时可据此恢复。
//! 格式对核心不透明：InMemoryArchive 供子执行与测试，JsonlArchive 每行一个 JSON 对象。

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ContextError;
use crate::memory::Entry;

/// 一次压缩产生的归档批次（带时间戳，条目保持原顺序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBatch {
    pub log_id: String,
    pub archived_at: DateTime<Utc>,
    pub entries: Vec<Entry>,
}

impl ArchiveBatch {
    pub fn new(log_id: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            log_id: log_id.into(),
            archived_at: Utc::now(),
            entries,
        }
    }
}

/// errors.jsonl 中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub log_id: String,
    pub recorded_at: DateTime<Utc>,
    pub entry: Entry,
}

/// 活动会话的存档：恢复后日志沿用原 id，归档批次仍能对上
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub log_id: String,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub shared_memory: BTreeMap<String, Value>,
    #[serde(default)]
    pub originating_request: Option<String>,
}

/// 归档 sink：批次追加 + 错误条目单独记录 + 可选的会话存档
pub trait ArchiveSink: Send + Sync {
    fn append_batch(&self, batch: &ArchiveBatch) -> Result<(), ContextError>;

    fn record_error(&self, log_id: &str, entry: &Entry) -> Result<(), ContextError>;

    /// 已写入的批次数（不支持统计的实现返回 None）
    fn batch_count(&self) -> Option<usize> {
        None
    }

    /// 覆盖保存活动会话；默认不持久化
    fn save_session(&self, _state: &SessionState) -> Result<(), ContextError> {
        Ok(())
    }

    fn load_session(&self) -> Result<Option<SessionState>, ContextError> {
        Ok(None)
    }
}

fn poisoned() -> ContextError {
    ContextError::Archive("archive lock poisoned".to_string())
}

/// 内存归档
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    batches: Mutex<Vec<ArchiveBatch>>,
    errors: Mutex<Vec<ErrorRecord>>,
    session: Mutex<Option<SessionState>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<ArchiveBatch> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// 所有批次按写入顺序展开
    pub fn entries(&self) -> Vec<Entry> {
        self.batches()
            .into_iter()
            .flat_map(|b| b.entries)
            .collect()
    }

    /// 只展开某个日志的批次
    pub fn entries_for(&self, log_id: &str) -> Vec<Entry> {
        self.batches()
            .into_iter()
            .filter(|b| b.log_id == log_id)
            .flat_map(|b| b.entries)
            .collect()
    }

    pub fn errors(&self) -> Vec<Entry> {
        self.error_records().into_iter().map(|r| r.entry).collect()
    }

    pub fn error_records(&self) -> Vec<ErrorRecord> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ArchiveSink for InMemoryArchive {
    fn append_batch(&self, batch: &ArchiveBatch) -> Result<(), ContextError> {
        self.batches.lock().map_err(|_| poisoned())?.push(batch.clone());
        Ok(())
    }

    fn record_error(&self, log_id: &str, entry: &Entry) -> Result<(), ContextError> {
        self.errors.lock().map_err(|_| poisoned())?.push(ErrorRecord {
            log_id: log_id.to_string(),
            recorded_at: Utc::now(),
            entry: entry.clone(),
        });
        Ok(())
    }

    fn batch_count(&self) -> Option<usize> {
        self.batches.lock().ok().map(|b| b.len())
    }

    fn save_session(&self, state: &SessionState) -> Result<(), ContextError> {
        *self.session.lock().map_err(|_| poisoned())? = Some(state.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<SessionState>, ContextError> {
        Ok(self.session.lock().map_err(|_| poisoned())?.clone())
    }
}

/// JSON Lines 文件归档：dir/archive.jsonl 存批次，dir/errors.jsonl 存错误条目，
/// dir/session.json 存最近一次保存的活动会话
#[derive(Debug)]
pub struct JsonlArchive {
    archive_path: PathBuf,
    errors_path: PathBuf,
    session_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlArchive {
    /// 目录不存在时自动创建
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ContextError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| ContextError::Archive(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            archive_path: dir.join("archive.jsonl"),
            errors_path: dir.join("errors.jsonl"),
            session_path: dir.join("session.json"),
            write_lock: Mutex::new(()),
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn errors_path(&self) -> &Path {
        &self.errors_path
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<(), ContextError> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ContextError::Archive(format!("open {}: {e}", path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| ContextError::Archive(format!("write {}: {e}", path.display())))
    }

    /// 读取全部批次（文件不存在时为空）
    pub fn load_batches(&self) -> Result<Vec<ArchiveBatch>, ContextError> {
        if !self.archive_path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.archive_path)
            .map_err(|e| ContextError::Archive(e.to_string()))?;
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| ContextError::Archive(e.to_string())))
            .collect()
    }

    /// 某个日志的全部批次（按写入顺序）
    pub fn load_batches_for(&self, log_id: &str) -> Result<Vec<ArchiveBatch>, ContextError> {
        Ok(self
            .load_batches()?
            .into_iter()
            .filter(|b| b.log_id == log_id)
            .collect())
    }
}

impl ArchiveSink for JsonlArchive {
    fn append_batch(&self, batch: &ArchiveBatch) -> Result<(), ContextError> {
        let line =
            serde_json::to_string(batch).map_err(|e| ContextError::Archive(e.to_string()))?;
        self.append_line(&self.archive_path, &line)
    }

    fn record_error(&self, log_id: &str, entry: &Entry) -> Result<(), ContextError> {
        let record = ErrorRecord {
            log_id: log_id.to_string(),
            recorded_at: Utc::now(),
            entry: entry.clone(),
        };
        let line =
            serde_json::to_string(&record).map_err(|e| ContextError::Archive(e.to_string()))?;
        self.append_line(&self.errors_path, &line)
    }

    fn batch_count(&self) -> Option<usize> {
        self.load_batches().ok().map(|b| b.len())
    }

    /// 先写临时文件再 rename，写到一半崩溃不会留下半个会话
    fn save_session(&self, state: &SessionState) -> Result<(), ContextError> {
        let data = serde_json::to_string_pretty(state)
            .map_err(|e| ContextError::Archive(e.to_string()))?;
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let tmp = self.session_path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .map_err(|e| ContextError::Archive(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.session_path).map_err(|e| {
            ContextError::Archive(format!("rename {}: {e}", self.session_path.display()))
        })
    }

    fn load_session(&self) -> Result<Option<SessionState>, ContextError> {
        if !self.session_path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.session_path)
            .map_err(|e| ContextError::Archive(e.to_string()))?;
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| ContextError::Archive(format!("parse {}: {e}", self.session_path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_archive_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let archive = JsonlArchive::new(dir.path().join("archive")).unwrap();

        archive
            .append_batch(&ArchiveBatch::new("log-a", vec![Entry::user("one"), Entry::user("two")]))
            .unwrap();
        archive
            .append_batch(&ArchiveBatch::new("log-a", vec![Entry::assistant("three")]))
            .unwrap();

        let batches = archive.load_batches().unwrap();
        assert_eq!(batches.len(), 2);
        let texts: Vec<String> = batches
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.text()))
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_jsonl_archive_records_errors_separately() {
        let dir = TempDir::new().unwrap();
        let archive = JsonlArchive::new(dir.path()).unwrap();
        archive
            .record_error("log-a", &Entry::error("capability_timeout", "file_read timed out"))
            .unwrap();
        let content = std::fs::read_to_string(archive.errors_path()).unwrap();
        let record: ErrorRecord = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(record.log_id, "log-a");
        assert_eq!(record.entry.text(), "file_read timed out");
        assert!(!archive.archive_path().exists());
    }

    #[test]
    fn test_batches_from_two_logs_stay_separable() {
        let dir = TempDir::new().unwrap();
        let archive = JsonlArchive::new(dir.path()).unwrap();
        archive
            .append_batch(&ArchiveBatch::new("log-a", vec![Entry::user("a1")]))
            .unwrap();
        archive
            .append_batch(&ArchiveBatch::new("log-b", vec![Entry::user("b1")]))
            .unwrap();
        archive
            .append_batch(&ArchiveBatch::new("log-a", vec![Entry::user("a2")]))
            .unwrap();

        let first_line = std::fs::read_to_string(archive.archive_path()).unwrap();
        let first: Value = serde_json::from_str(first_line.lines().next().unwrap()).unwrap();
        assert_eq!(first["log_id"], "log-a");

        let texts: Vec<String> = archive
            .load_batches_for("log-a")
            .unwrap()
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.text()))
            .collect();
        assert_eq!(texts, vec!["a1", "a2"]);
        assert_eq!(archive.batch_count(), Some(3));
    }

    #[test]
    fn test_session_file_overwrites() {
        let dir = TempDir::new().unwrap();
        let archive = JsonlArchive::new(dir.path()).unwrap();
        assert!(archive.load_session().unwrap().is_none());

        let mut state = SessionState {
            log_id: "log-a".to_string(),
            saved_at: Utc::now(),
            entries: vec![Entry::user("first")],
            goals: vec![],
            shared_memory: BTreeMap::new(),
            originating_request: None,
        };
        archive.save_session(&state).unwrap();
        state.entries.push(Entry::assistant("second"));
        archive.save_session(&state).unwrap();

        assert_eq!(archive.load_session().unwrap(), Some(state));
        assert!(!archive.session_path().with_extension("json.tmp").exists());
    }
}
