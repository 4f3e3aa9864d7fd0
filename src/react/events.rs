//! 过程事件：思考、动作、结果、完成、错误
//!
//! 供展示层（CLI / 传输层）订阅；没有订阅者时事件直接丢弃，循环的正确性不依赖它们。

use serde::Serialize;
use tokio::sync::mpsc;

/// 单个过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// source 为 "orchestrator" 或 "skill:<id>" / "chain"
    Thinking {
        source: String,
        step: usize,
        text: String,
    },
    Action {
        source: String,
        action: String,
        target: Option<String>,
    },
    /// 动作结果（预览，避免过长）
    Result {
        source: String,
        ok: bool,
        preview: String,
    },
    Complete {
        status: String,
        text: String,
        steps: usize,
    },
    Error {
        source: String,
        code: String,
        text: String,
    },
}

/// 事件发送端；None 表示无人订阅
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// 截断为预览文本
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = AgentEvent::Action {
            source: "orchestrator".into(),
            action: "use_tool".into(),
            target: Some("echo".into()),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "action");
        assert_eq!(json["target"], "echo");
    }

    #[tokio::test]
    async fn test_sink_delivers_and_none_drops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.emit(AgentEvent::Complete {
            status: "completed".into(),
            text: "ok".into(),
            steps: 1,
        });
        assert!(matches!(rx.recv().await, Some(AgentEvent::Complete { .. })));

        EventSink::none().emit(AgentEvent::Complete {
            status: "completed".into(),
            text: "ok".into(),
            steps: 1,
        });
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
