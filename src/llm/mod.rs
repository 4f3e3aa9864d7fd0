//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、退避重试

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, ModelReply, RetryConfig, RetryingLlmClient};

use serde_json::Value;

/// 从模型文本中提取 JSON（```json ... ``` 代码块或首个 `{` 到末个 `}`）
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    let candidate = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end < start {
            return None;
        }
        &trimmed[start..=end]
    };
    serde_json::from_str(candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(
            extract_json(r#"{"a": 1}"#),
            Some(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            extract_json("Sure:\n```json\n{\"next_action\": \"finish\"}\n```"),
            Some(serde_json::json!({"next_action": "finish"}))
        );
        assert_eq!(
            extract_json("I will call {\"x\": [1, 2]} now"),
            Some(serde_json::json!({"x": [1, 2]}))
        );
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }
}
