//! 工具调用边界
//!
//! ToolRunner 持有 ToolRegistry 与全局超时：查找 → 参数校验 → 限时执行，
//! 失败映射为具名的 CapabilityError；每次调用输出一条结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::CapabilityError;
use crate::tools::{validate_args, Tool, ToolRegistry};

#[derive(Clone)]
pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub async fn run(&self, tool_name: &str, args: Value) -> Result<String, CapabilityError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match self.registry.get(tool_name) {
            None => Err(CapabilityError::NotFound(tool_name.to_string())),
            Some(tool) => match validate_args(&tool.parameters_schema(), &args) {
                Err(reason) => Err(CapabilityError::invalid(tool_name, reason)),
                Ok(()) => match timeout(self.timeout, tool.execute(args)).await {
                    Ok(Ok(content)) => Ok(content),
                    Ok(Err(e)) => Err(CapabilityError::failed(tool_name, e)),
                    Err(_) => Err(CapabilityError::Timeout {
                        name: tool_name.to_string(),
                        secs: self.timeout.as_secs(),
                    }),
                },
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("disk full".into())
        }
    }

    fn runner() -> ToolRunner {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        registry.register(FailingTool);
        ToolRunner::new(Arc::new(registry), 30).with_timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_run_ok() {
        let out = runner()
            .run("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_run_error_kinds() {
        let r = runner();
        let err = r.run("nope", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.code(), "capability_not_found");

        let err = r.run("echo", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.code(), "capability_invalid_parameters");

        let err = r.run("fail", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, CapabilityError::failed("fail", "disk full"));

        let err = r.run("slow", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.code(), "capability_timeout");
    }
}
