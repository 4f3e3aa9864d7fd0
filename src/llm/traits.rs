//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：`complete(messages, schema?)`。
//! 传入 schema 时期望结构化 JSON 回复；瞬时失败（网络、限流）由 RetryingLlmClient 退避重试，
//! 永久失败（鉴权、schema 非法）直接上抛。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;

/// 模型调用错误：瞬时 / 永久
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

/// 模型回复：结构化 JSON 或纯文本
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Structured(Value),
    Text(String),
}

impl ModelReply {
    pub fn as_text(&self) -> String {
        match self {
            ModelReply::Structured(v) => v.to_string(),
            ModelReply::Text(s) => s.clone(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        schema: Option<&Value>,
    ) -> Result<ModelReply, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(
        &self,
        messages: &[Message],
        schema: Option<&Value>,
    ) -> Result<ModelReply, LlmError> {
        (**self).complete(messages, schema).await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        (**self).token_usage()
    }
}

/// 重试参数（指数退避 + 少量抖动）
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试前的等待（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay_ms);
        // 抖动上限为 10%
        let jitter_span = capped / 10;
        let jitter = if jitter_span == 0 {
            0
        } else {
            u64::from(chrono::Utc::now().timestamp_subsec_nanos()) % jitter_span
        };
        Duration::from_millis(capped + jitter)
    }
}

/// 对瞬时错误做退避重试的包装客户端
pub struct RetryingLlmClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: LlmClient> RetryingLlmClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlmClient<C> {
    async fn complete(
        &self,
        messages: &[Message],
        schema: Option<&Value>,
    ) -> Result<ModelReply, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.complete(messages, schema).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
