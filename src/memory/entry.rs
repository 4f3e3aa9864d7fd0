//! 上下文条目（Entry）
//!
//! 一条不可变的会话状态：kind + content + created_at + metadata。
//! 错误是一等的 kind（而非结果字符串里的标记），因此能跨压缩保留并被检索。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ContextError;
use crate::memory::Message;

/// metadata 中记录工具名的键
pub const META_TOOL_NAME: &str = "tool_name";
/// metadata 中记录错误码的键
pub const META_ERROR_CODE: &str = "error_code";
/// metadata 中记录步数的键
pub const META_STEP: &str = "step";

/// 条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    System,
    User,
    Assistant,
    ToolResult,
    Thought,
    Error,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::System => "system",
            EntryKind::User => "user",
            EntryKind::Assistant => "assistant",
            EntryKind::ToolResult => "tool_result",
            EntryKind::Thought => "thought",
            EntryKind::Error => "error",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(EntryKind::System),
            "user" => Ok(EntryKind::User),
            "assistant" => Ok(EntryKind::Assistant),
            "tool_result" => Ok(EntryKind::ToolResult),
            "thought" => Ok(EntryKind::Thought),
            "error" => Ok(EntryKind::Error),
            other => Err(ContextError::Validation(format!("unknown entry kind: {other}"))),
        }
    }
}

/// 条目内容：纯文本或结构化 JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryContent {
    Text(String),
    Structured(Value),
}

impl EntryContent {
    /// 渲染为文本；结构化内容使用紧凑 JSON（serde_json 的 Map 有序，输出稳定）
    pub fn as_text(&self) -> String {
        match self {
            EntryContent::Text(s) => s.clone(),
            EntryContent::Structured(v) => v.to_string(),
        }
    }
}

impl From<String> for EntryContent {
    fn from(s: String) -> Self {
        EntryContent::Text(s)
    }
}

impl From<&str> for EntryContent {
    fn from(s: &str) -> Self {
        EntryContent::Text(s.to_string())
    }
}

impl From<Value> for EntryContent {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => EntryContent::Text(s),
            other => EntryContent::Structured(other),
        }
    }
}

/// 单条上下文条目；字段私有，创建后不可修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    kind: EntryKind,
    content: EntryContent,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl Entry {
    pub fn new(kind: EntryKind, content: impl Into<EntryContent>) -> Self {
        Self {
            kind,
            content: content.into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn system(content: impl Into<EntryContent>) -> Self {
        Self::new(EntryKind::System, content)
    }

    pub fn user(content: impl Into<EntryContent>) -> Self {
        Self::new(EntryKind::User, content)
    }

    pub fn assistant(content: impl Into<EntryContent>) -> Self {
        Self::new(EntryKind::Assistant, content)
    }

    pub fn thought(content: impl Into<EntryContent>) -> Self {
        Self::new(EntryKind::Thought, content)
    }

    pub fn tool_result(tool: &str, content: impl Into<EntryContent>) -> Self {
        Self::new(EntryKind::ToolResult, content).with_metadata(META_TOOL_NAME, tool)
    }

    /// 错误条目：code 为错误分类（如 capability_not_found）
    pub fn error(code: &str, content: impl Into<EntryContent>) -> Self {
        Self::new(EntryKind::Error, content).with_metadata(META_ERROR_CODE, code)
    }

    pub fn builder() -> EntryBuilder {
        EntryBuilder::default()
    }

    /// 从外部 JSON 构造：`{"kind": "...", "content": ..., "metadata": {...}}`；缺少 kind 即拒绝
    pub fn from_value(value: &Value) -> Result<Self, ContextError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ContextError::Validation("entry must be a JSON object".to_string()))?;
        let mut builder = Entry::builder();
        if let Some(kind) = obj.get("kind") {
            let kind = kind
                .as_str()
                .ok_or_else(|| ContextError::Validation("entry kind must be a string".to_string()))?;
            builder = builder.kind(kind.parse()?);
        }
        if let Some(content) = obj.get("content") {
            builder = builder.content(content.clone());
        }
        if let Some(meta) = obj.get("metadata") {
            let meta = meta.as_object().ok_or_else(|| {
                ContextError::Validation("entry metadata must be an object".to_string())
            })?;
            for (k, v) in meta {
                builder = builder.metadata(k.clone(), v.clone());
            }
        }
        builder.build()
    }

    /// 构造期附加 metadata（条目进入日志后只以 &Entry 暴露）
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn content(&self) -> &EntryContent {
        &self.content
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.kind == EntryKind::Error
    }

    /// 渲染为模型消息；不包含时间戳，保证同一状态下输出逐字节一致
    pub fn render(&self) -> Message {
        let text = self.text();
        match self.kind {
            EntryKind::System => Message::system(text),
            EntryKind::User => Message::user(text),
            EntryKind::Assistant => Message::assistant(text),
            EntryKind::Thought => Message::assistant(format!("[THOUGHT] {text}")),
            EntryKind::ToolResult => {
                let tool = self.meta_str(META_TOOL_NAME).unwrap_or("tool");
                Message::assistant(format!("[{tool}] {text}"))
            }
            EntryKind::Error => {
                let code = self.meta_str(META_ERROR_CODE).unwrap_or("error");
                Message::assistant(format!("[ERROR {code}] {text}"))
            }
        }
    }
}

/// Entry 构造器：kind 必填，content 缺省为空文本
#[derive(Debug, Default)]
pub struct EntryBuilder {
    kind: Option<EntryKind>,
    content: Option<EntryContent>,
    metadata: BTreeMap<String, Value>,
}

impl EntryBuilder {
    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn content(mut self, content: impl Into<EntryContent>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Entry, ContextError> {
        let kind = self
            .kind
            .ok_or_else(|| ContextError::Validation("entry is missing kind".to_string()))?;
        Ok(Entry {
            kind,
            content: self.content.unwrap_or_else(|| EntryContent::Text(String::new())),
            created_at: Utc::now(),
            metadata: self.metadata,
        })
    }
}
