//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序回放预置的回复/错误，并记录每次收到的消息列表，便于断言隔离性与确定性。
//! 队列耗尽后使用 fallback（未设置时返回永久错误）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, ModelReply};
use crate::memory::Message;

#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    fallback: Mutex<Option<ModelReply>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次回放的结构化回复
    pub fn with_decisions(decisions: impl IntoIterator<Item = Value>) -> Self {
        let client = Self::new();
        for d in decisions {
            client.push_decision(d);
        }
        client
    }

    pub fn push_decision(&self, value: Value) {
        self.push(Ok(ModelReply::Structured(value)));
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Ok(ModelReply::Text(text.into())));
    }

    pub fn push_error(&self, err: LlmError) {
        self.push(Err(err));
    }

    fn push(&self, item: Result<ModelReply, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    /// 队列耗尽后每次都返回该回复
    pub fn set_fallback(&self, reply: ModelReply) {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = Some(reply);
        }
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 每次调用收到的完整消息列表
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _schema: Option<&Value>,
    ) -> Result<ModelReply, LlmError> {
        if let Ok(mut received) = self.received.lock() {
            received.push(messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(item) => item,
            None => self
                .fallback
                .lock()
                .ok()
                .and_then(|f| f.clone())
                .ok_or_else(|| LlmError::Permanent("mock script exhausted".to_string())),
        }
    }
}
