//! Context Log：单个会话的有界、缓存友好的推理记录
//!
//! 结构：一条固定的 system 前缀（构造时设定，永不替换/驱逐）+ 追加式条目窗口 +
//! 两块元状态（goals 与 shared_memory，均不是条目）。
//!
//! render_messages 输出 `[system_prefix] + 窗口 + [goals]`，不含时间戳，同一状态下逐字节稳定；
//! compress_if_needed 与 clear 是仅有的会把条目移出窗口的操作，被移出的条目先按原顺序写入归档，
//! 归档写失败时条目留在窗口里。save_session / restore_session 经由同一个归档 sink 存取活动会话。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::core::ContextError;
use crate::memory::{
    ArchiveBatch, ArchiveSink, BudgetUnit, Entry, EntryContent, EntryKind, InMemoryArchive,
    Message, SessionState, Snapshot,
};

/// 窗口与快照参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub budget_unit: BudgetUnit,
    /// 压缩后保留的最近条目数（超预算时几何收缩）
    pub keep_recent: usize,
    /// 快照携带的最近条目上限
    pub snapshot_tail: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            budget_unit: BudgetUnit::Chars,
            keep_recent: 10,
            snapshot_tail: 20,
        }
    }
}

/// 一次 compress_if_needed 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CompressionReport {
    pub evicted: usize,
    pub kept: usize,
    pub size_before: usize,
    pub size_after: usize,
    /// 压缩后仍超出预算（前缀与 goals 永不丢弃，正确性优先于预算）
    pub over_budget: bool,
}

/// 日志概况
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub entries: usize,
    pub rendered_size: usize,
    pub goals: usize,
    pub shared_keys: usize,
    pub archived_batches: usize,
}

pub struct ContextLog {
    id: String,
    system_prefix: Entry,
    entries: Vec<Entry>,
    goals: Vec<String>,
    shared_memory: BTreeMap<String, Value>,
    originating_request: Option<String>,
    archive: Arc<dyn ArchiveSink>,
    settings: LogSettings,
    archived_batches: usize,
}

impl std::fmt::Debug for ContextLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLog")
            .field("id", &self.id)
            .field("entries", &self.entries.len())
            .field("goals", &self.goals)
            .field("archived_batches", &self.archived_batches)
            .finish()
    }
}

impl ContextLog {
    pub fn new(system_prompt: impl Into<EntryContent>, archive: Arc<dyn ArchiveSink>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            system_prefix: Entry::system(system_prompt),
            entries: Vec::new(),
            goals: Vec::new(),
            shared_memory: BTreeMap::new(),
            originating_request: None,
            archive,
            settings: LogSettings::default(),
            archived_batches: 0,
        }
    }

    /// 使用内存归档（子执行的私有日志默认如此，用后即弃）
    pub fn in_memory(system_prompt: impl Into<EntryContent>) -> Self {
        Self::new(system_prompt, Arc::new(InMemoryArchive::new()))
    }

    pub fn with_settings(mut self, settings: LogSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 以快照为种子新建一个私有日志：新的 system 前缀对象、goals/shared_memory 副本、
    /// 依次追加快照中的最近条目。与源日志没有任何共享的可变结构。
    pub fn seeded_from(
        snapshot: Snapshot,
        archive: Arc<dyn ArchiveSink>,
        settings: LogSettings,
    ) -> Self {
        let Snapshot {
            system_prefix,
            goals,
            shared_memory,
            recent_entries,
            originating_request,
        } = snapshot;
        let mut log = Self::new(system_prefix.content().clone(), archive).with_settings(settings);
        log.goals = goals;
        log.shared_memory = shared_memory;
        log.originating_request = originating_request;
        log.entries = recent_entries
            .into_iter()
            .filter(|e| e.kind() != EntryKind::System)
            .collect();
        log
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> LogSettings {
        self.settings
    }

    pub fn system_prefix(&self) -> &Entry {
        &self.system_prefix
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 追加到尾部；第二条 system 条目属于畸形输入，直接拒绝。
    /// error 条目同时写入归档的错误 sink。
    pub fn append(&mut self, entry: Entry) -> Result<(), ContextError> {
        if entry.kind() == EntryKind::System {
            return Err(ContextError::Validation(
                "system prefix is fixed at construction; cannot append a system entry".to_string(),
            ));
        }
        if entry.is_error() {
            if let Err(e) = self.archive.record_error(&self.id, &entry) {
                tracing::warn!(log = %self.id, error = %e, "failed to record error entry");
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// 从外部 JSON 追加（缺少 kind 时返回校验错误）
    pub fn append_value(&mut self, value: &Value) -> Result<(), ContextError> {
        let entry = Entry::from_value(value)?;
        self.append(entry)
    }

    /// 记录本次会话的原始请求并以 user 条目追加
    pub fn record_request(&mut self, request: &str) -> Result<(), ContextError> {
        self.originating_request = Some(request.to_string());
        self.append(Entry::user(request))
    }

    pub fn originating_request(&self) -> Option<&str> {
        self.originating_request.as_deref()
    }

    /// 整体替换目标列表（注意力引导，不是历史）
    pub fn set_goals(&mut self, goals: Vec<String>) {
        self.goals = goals;
    }

    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    pub fn get_shared(&self, key: &str) -> Option<&Value> {
        self.shared_memory.get(key)
    }

    /// 后写覆盖，返回旧值
    pub fn set_shared(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.shared_memory.insert(key.into(), value.into())
    }

    pub fn shared_memory(&self) -> &BTreeMap<String, Value> {
        &self.shared_memory
    }

    fn goals_message(&self) -> Option<Message> {
        if self.goals.is_empty() {
            return None;
        }
        let mut content = String::from("# Current Goals\n\n");
        for (i, goal) in self.goals.iter().enumerate() {
            content.push_str(&format!("{}. {}\n", i + 1, goal));
        }
        content.push_str("\nKeep these goals in mind.");
        Some(Message::system(content))
    }

    /// 模型调用层的输入：`[system_prefix] + 窗口 + [goals]`
    pub fn render_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.entries.len() + 2);
        messages.push(self.system_prefix.render());
        messages.extend(self.entries.iter().map(Entry::render));
        if let Some(goals) = self.goals_message() {
            messages.push(goals);
        }
        messages
    }

    /// 当前渲染结果的大小（按配置的预算单位）
    pub fn measure(&self) -> usize {
        self.settings.budget_unit.measure(&self.render_messages())
    }

    /// 只保留最近 tail 条时的渲染大小
    fn measure_with_tail(&self, tail: usize) -> usize {
        let unit = self.settings.budget_unit;
        let start = self.entries.len().saturating_sub(tail);
        let prefix = unit.measure_text(&self.system_prefix.render().content);
        let window: usize = self.entries[start..]
            .iter()
            .map(|e| unit.measure_text(&e.render().content))
            .sum();
        let goals = self
            .goals_message()
            .map(|m| unit.measure_text(&m.content))
            .unwrap_or(0);
        prefix + window + goals
    }

    /// 超出预算时把旧条目归档并移出窗口。永不报错：
    /// 保留窗口本身超预算时几何收缩；归档写失败则不驱逐任何条目。
    pub fn compress_if_needed(&mut self, budget: usize) -> CompressionReport {
        let size_before = self.measure();
        let total = self.entries.len();
        if size_before <= budget {
            return CompressionReport {
                evicted: 0,
                kept: total,
                size_before,
                size_after: size_before,
                over_budget: false,
            };
        }

        let mut keep = self.settings.keep_recent.min(total);
        while keep > 0 && self.measure_with_tail(keep) > budget {
            keep /= 2;
        }

        let evict_count = total - keep;
        if evict_count == 0 {
            return CompressionReport {
                evicted: 0,
                kept: total,
                size_before,
                size_after: size_before,
                over_budget: true,
            };
        }

        let batch = ArchiveBatch::new(self.id.clone(), self.entries[..evict_count].to_vec());
        if let Err(e) = self.archive.append_batch(&batch) {
            tracing::warn!(log = %self.id, error = %e, "archive write failed; skipping eviction");
            return CompressionReport {
                evicted: 0,
                kept: total,
                size_before,
                size_after: size_before,
                over_budget: true,
            };
        }
        self.entries.drain(..evict_count);
        self.archived_batches += 1;

        let size_after = self.measure();
        tracing::info!(
            log = %self.id,
            evicted = evict_count,
            kept = keep,
            size_before,
            size_after,
            "context compressed"
        );
        CompressionReport {
            evicted: evict_count,
            kept: keep,
            size_before,
            size_after,
            over_budget: size_after > budget,
        }
    }

    /// 深拷贝出快照：system 前缀、goals、shared_memory、有界的最近条目、原始请求
    pub fn snapshot(&self) -> Snapshot {
        let start = self.entries.len().saturating_sub(self.settings.snapshot_tail);
        Snapshot {
            system_prefix: self.system_prefix.clone(),
            goals: self.goals.clone(),
            shared_memory: self.shared_memory.clone(),
            recent_entries: self.entries[start..].to_vec(),
            originating_request: self.originating_request.clone(),
        }
    }

    /// 清空会话：活动条目先归档再移除，goals 清空；system 前缀与 shared_memory 保留。
    /// 归档写失败时什么都不动并返回错误。
    pub fn clear(&mut self) -> Result<(), ContextError> {
        if !self.entries.is_empty() {
            let batch = ArchiveBatch::new(self.id.clone(), self.entries.clone());
            self.archive.append_batch(&batch)?;
            self.archived_batches += 1;
        }
        self.entries.clear();
        self.goals.clear();
        self.originating_request = None;
        Ok(())
    }

    pub fn stats(&self) -> LogStats {
        LogStats {
            entries: self.entries.len(),
            rendered_size: self.measure(),
            goals: self.goals.len(),
            shared_keys: self.shared_memory.len(),
            archived_batches: self.archived_batches,
        }
    }

    /// 当前活动会话的存档形式（不含 system 前缀，前缀由构造方决定）
    pub fn session_state(&self) -> SessionState {
        SessionState {
            log_id: self.id.clone(),
            saved_at: chrono::Utc::now(),
            entries: self.entries.clone(),
            goals: self.goals.clone(),
            shared_memory: self.shared_memory.clone(),
            originating_request: self.originating_request.clone(),
        }
    }

    pub fn save_session(&self) -> Result<(), ContextError> {
        self.archive.save_session(&self.session_state())
    }

    /// 从归档 sink 恢复上次保存的会话；沿用存档里的 log id。没有存档时返回 false
    pub fn restore_session(&mut self) -> Result<bool, ContextError> {
        let Some(state) = self.archive.load_session()? else {
            return Ok(false);
        };
        self.id = state.log_id;
        self.entries = state
            .entries
            .into_iter()
            .filter(|e| e.kind() != EntryKind::System)
            .collect();
        self.goals = state.goals;
        self.shared_memory = state.shared_memory;
        self.originating_request = state.originating_request;
        tracing::info!(log = %self.id, entries = self.entries.len(), "session restored");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_archive() -> (ContextLog, Arc<InMemoryArchive>) {
        let archive = Arc::new(InMemoryArchive::new());
        let log = ContextLog::new("S", archive.clone());
        (log, archive)
    }

    fn twenty_chars(i: usize) -> String {
        format!("entry-{i:02}-xxxxxxxxxxx")
    }

    #[test]
    fn test_append_rejects_system_entry() {
        let (mut log, _) = log_with_archive();
        let err = log.append(Entry::system("second prefix")).unwrap_err();
        assert!(matches!(err, ContextError::Validation(_)));
        assert!(log.append_value(&serde_json::json!({"content": "no kind"})).is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn test_render_order_and_goals_last() {
        let (mut log, _) = log_with_archive();
        log.append(Entry::user("hello")).unwrap();
        log.append(Entry::thought("thinking")).unwrap();
        log.set_goals(vec!["write report".to_string()]);

        let msgs = log.render_messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], Message::system("S"));
        assert_eq!(msgs[1], Message::user("hello"));
        assert!(msgs[3].content.contains("1. write report"));

        log.set_goals(vec!["a".to_string(), "b".to_string()]);
        let msgs = log.render_messages();
        assert!(!msgs.last().unwrap().content.contains("write report"));
        assert_eq!(msgs.len(), 4);
    }

    #[test]
    fn test_render_is_deterministic() {
        let (mut log, _) = log_with_archive();
        log.append(Entry::user("x")).unwrap();
        log.append(Entry::assistant(serde_json::json!({"z": 1, "a": [1, 2]}))).unwrap();
        log.set_goals(vec!["g".to_string()]);
        assert_eq!(log.render_messages(), log.render_messages());
    }

    #[test]
    fn test_compress_budget_scenario() {
        let (mut log, archive) = log_with_archive();
        let mut appended = Vec::new();
        for i in 0..50 {
            let entry = Entry::user(twenty_chars(i));
            assert_eq!(entry.text().chars().count(), 20);
            appended.push(entry.clone());
            log.append(entry).unwrap();
        }
        assert_eq!(log.measure(), 1001);

        let report = log.compress_if_needed(500);
        assert!(report.evicted > 0);
        assert!(!report.over_budget);
        assert!(log.measure() <= 500);
        assert_eq!(log.render_messages()[0].content, "S");

        let archived = archive.entries();
        assert_eq!(archived, appended[..report.evicted].to_vec());

        let mut all = archived;
        all.extend(log.entries().iter().cloned());
        assert_eq!(all, appended);
    }

    #[test]
    fn test_compress_under_budget_is_noop() {
        let (mut log, archive) = log_with_archive();
        log.append(Entry::user("short")).unwrap();
        let report = log.compress_if_needed(1000);
        assert_eq!(report.evicted, 0);
        assert!(archive.batches().is_empty());
    }

    #[test]
    fn test_compress_shrinks_keep_geometrically() {
        let (mut log, archive) = log_with_archive();
        for _ in 0..12 {
            log.append(Entry::user("y".repeat(100))).unwrap();
        }
        log.set_goals(vec!["keep me".to_string()]);

        let report = log.compress_if_needed(300);
        // keep: 10 -> 5 -> 2 (2*100 + 前缀 + goals 在预算内)
        assert_eq!(report.kept, 2);
        assert_eq!(report.evicted, 10);
        assert_eq!(archive.entries().len(), 10);
        assert_eq!(log.goals(), &["keep me".to_string()]);
        assert_eq!(log.render_messages()[0].content, "S");
    }

    #[test]
    fn test_compress_never_drops_prefix_when_impossible() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut log = ContextLog::new("a very long system prompt", archive.clone());
        log.append(Entry::user("z".repeat(50))).unwrap();

        let report = log.compress_if_needed(5);
        assert_eq!(report.kept, 0);
        assert!(report.over_budget);
        assert_eq!(log.render_messages()[0].content, "a very long system prompt");
        assert_eq!(archive.entries().len(), 1);
    }

    #[test]
    fn test_error_entry_survives_compression_cycles() {
        let (mut log, archive) = log_with_archive();
        let err = Entry::error("capability_execution_failed", "disk full");
        log.append(err.clone()).unwrap();
        for round in 0..5 {
            for i in 0..15 {
                log.append(Entry::assistant(format!("round {round} item {i:02} padding"))).unwrap();
            }
            log.compress_if_needed(200);
        }
        assert!(archive.entries().contains(&err));
        assert_eq!(archive.errors(), vec![err]);
    }

    #[test]
    fn test_snapshot_is_deep_copy() {
        let (mut log, _) = log_with_archive();
        log.append(Entry::user("req")).unwrap();
        log.set_shared("has_tangible_output", false);
        log.set_goals(vec!["goal".to_string()]);

        let before = log.render_messages();
        let snapshot = log.snapshot();
        let mut child = ContextLog::seeded_from(
            snapshot,
            Arc::new(InMemoryArchive::new()),
            LogSettings::default(),
        );
        child.append(Entry::assistant("child step")).unwrap();
        child.set_shared("has_tangible_output", true);
        child.set_goals(vec!["child goal".to_string()]);

        assert_eq!(log.render_messages(), before);
        assert_eq!(log.get_shared("has_tangible_output"), Some(&Value::Bool(false)));
        assert_eq!(child.render_messages()[0], before[0]);
    }

    #[test]
    fn test_snapshot_tail_is_bounded() {
        let archive = Arc::new(InMemoryArchive::new());
        let settings = LogSettings {
            snapshot_tail: 3,
            ..LogSettings::default()
        };
        let mut log = ContextLog::new("S", archive).with_settings(settings);
        for i in 0..10 {
            log.append(Entry::user(format!("m{i}"))).unwrap();
        }
        let snap = log.snapshot();
        let texts: Vec<String> = snap.recent_entries().iter().map(|e| e.text()).collect();
        assert_eq!(texts, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn test_clear_archives_and_keeps_prefix() {
        let (mut log, archive) = log_with_archive();
        log.append(Entry::user("a")).unwrap();
        log.set_goals(vec!["g".to_string()]);
        log.clear().unwrap();
        assert!(log.is_empty());
        assert!(log.goals().is_empty());
        assert_eq!(log.render_messages(), vec![Message::system("S")]);
        assert_eq!(archive.entries().len(), 1);
        assert_eq!(log.stats().archived_batches, 1);
    }

    struct FailingArchive;

    impl ArchiveSink for FailingArchive {
        fn append_batch(&self, _batch: &ArchiveBatch) -> Result<(), ContextError> {
            Err(ContextError::Archive("disk full".to_string()))
        }

        fn record_error(&self, _log_id: &str, _entry: &Entry) -> Result<(), ContextError> {
            Err(ContextError::Archive("disk full".to_string()))
        }
    }

    #[test]
    fn test_clear_keeps_entries_when_archive_fails() {
        let mut log = ContextLog::new("S", Arc::new(FailingArchive));
        log.append(Entry::user("precious")).unwrap();
        log.set_goals(vec!["g".to_string()]);

        let err = log.clear().unwrap_err();
        assert!(matches!(err, ContextError::Archive(_)));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].text(), "precious");
        assert_eq!(log.goals(), &["g".to_string()]);
        assert_eq!(log.stats().archived_batches, 0);
    }

    #[test]
    fn test_compress_keeps_entries_when_archive_fails() {
        let mut log = ContextLog::new("S", Arc::new(FailingArchive));
        for i in 0..20 {
            log.append(Entry::user(twenty_chars(i))).unwrap();
        }
        let report = log.compress_if_needed(100);
        assert_eq!(report.evicted, 0);
        assert!(report.over_budget);
        assert_eq!(log.len(), 20);
    }

    #[test]
    fn test_batches_carry_log_id_and_stats_count_own_batches() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut a = ContextLog::new("S", archive.clone());
        let mut b = ContextLog::new("S", archive.clone());
        for i in 0..12 {
            a.append(Entry::user(twenty_chars(i))).unwrap();
            b.append(Entry::user(twenty_chars(i + 100))).unwrap();
        }
        a.compress_if_needed(100);
        b.compress_if_needed(100);
        b.append(Entry::error("capability_timeout", "slow")).unwrap();

        let batches = archive.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].log_id, a.id());
        assert_eq!(batches[1].log_id, b.id());
        assert_eq!(archive.error_records()[0].log_id, b.id());
        assert_eq!(a.stats().archived_batches, 1);
        assert_eq!(b.stats().archived_batches, 1);

        // 每个日志：归档 + 窗口 = 全部追加过的条目
        let mut all_a = archive.entries_for(a.id());
        all_a.extend(a.entries().iter().cloned());
        let texts: Vec<String> = all_a.iter().map(Entry::text).collect();
        let expected: Vec<String> = (0..12).map(twenty_chars).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_save_and_restore_session() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut log = ContextLog::new("S", archive.clone());
        log.record_request("write the report").unwrap();
        log.append(Entry::thought("outline first")).unwrap();
        log.set_goals(vec!["Complete: write the report".to_string()]);
        log.set_shared("has_tangible_output", true);
        log.save_session().unwrap();

        let mut restored = ContextLog::new("S", archive);
        assert!(restored.restore_session().unwrap());
        assert_eq!(restored.id(), log.id());
        assert_eq!(restored.entries(), log.entries());
        assert_eq!(restored.goals(), log.goals());
        assert_eq!(restored.shared_memory(), log.shared_memory());
        assert_eq!(restored.originating_request(), Some("write the report"));
        assert_eq!(restored.render_messages(), log.render_messages());
    }

    #[test]
    fn test_restore_without_saved_session_is_noop() {
        let (mut log, _) = log_with_archive();
        log.append(Entry::user("live")).unwrap();
        assert!(!log.restore_session().unwrap());
        assert_eq!(log.len(), 1);
    }
}
