//! Planner：模型 → Decision
//!
//! 把渲染后的消息连同 Decision schema 交给模型调用层；结构化回复直接反序列化，
//! 文本回复先提取 JSON 再解析。

use std::sync::Arc;

use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{extract_json, LlmClient, ModelReply};
use crate::memory::Message;
use crate::react::Decision;

/// 解析模型回复为 Decision
pub fn parse_decision(reply: ModelReply) -> Result<Decision, AgentError> {
    match reply {
        ModelReply::Structured(value) => Decision::from_value(value),
        ModelReply::Text(text) => {
            let value = extract_json(&text).ok_or_else(|| {
                AgentError::DecisionParse(format!("no JSON object in reply: {}", text.trim()))
            })?;
            Decision::from_value(value)
        }
    }
}

#[derive(Clone)]
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    schema: Value,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            schema: Decision::schema(),
        }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn decide(&self, messages: &[Message]) -> Result<Decision, AgentError> {
        let reply = self.llm.complete(messages, Some(&self.schema)).await?;
        parse_decision(reply)
    }
}
