//! 会话运行时：命令驱动的后台任务
//!
//! 负责：按配置创建 LLM 客户端；建立 cmd / event / phase 三通道，
//! 在后台任务中消费用户命令（Submit / Cancel / Clear / Quit）并驱动 Orchestrator。
//! 运行中也持续读取命令：Cancel 打断正在进行的请求，Submit / Clear 排队到请求结束后处理。

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::{AgentPhase, SessionSupervisor};
use crate::llm::{LlmClient, ModelReply, OpenAiClient, RetryingLlmClient, ScriptedLlmClient};
use crate::react::{AgentEvent, EventSink, Orchestrator};

/// 发往运行时的用户命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 提交一个请求
    Submit(String),
    /// 取消当前请求
    Cancel,
    /// 清空会话（活动条目归档，system 前缀保留）
    Clear,
    /// 退出运行时
    Quit,
}

/// 运行时句柄
pub struct AgentHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<AgentEvent>,
    pub phase: watch::Receiver<AgentPhase>,
    pub task: JoinHandle<()>,
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock），统一包一层退避重试
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!(model = %cfg.llm.model, "using OpenAI-compatible LLM");
            let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key));
            Arc::new(RetryingLlmClient::new(client, cfg.llm.retry))
        }
        _ => {
            tracing::warn!(provider = %provider, "no API key set or provider is mock, using scripted LLM");
            let mock = ScriptedLlmClient::new();
            mock.set_fallback(ModelReply::Structured(serde_json::json!({
                "reasoning": "No language model is configured.",
                "next_action": "finish",
                "final_answer": "No language model is configured. Set OPENAI_API_KEY and llm.provider = \"openai\"."
            })));
            Arc::new(RetryingLlmClient::new(mock, cfg.llm.retry))
        }
    }
}

/// 启动会话运行时：后台任务独占 Orchestrator，按顺序处理命令
pub fn create_agent(mut orchestrator: Orchestrator) -> AgentHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<AgentEvent>();
    let (phase_tx, phase_rx) = watch::channel(AgentPhase::Idle);

    let supervisor = SessionSupervisor::new();
    orchestrator.set_event_sink(EventSink::new(event_tx));

    let task = tokio::spawn(async move {
        tracing::info!(session = %supervisor.session_id(), "agent runtime started");
        let mut quit = false;
        let mut pending: VecDeque<Command> = VecDeque::new();

        while !quit {
            let cmd = match pending.pop_front() {
                Some(cmd) => cmd,
                None => match cmd_rx.recv().await {
                    Some(cmd) => cmd,
                    None => break,
                },
            };
            match cmd {
                Command::Submit(input) => {
                    orchestrator.set_cancel_token(supervisor.child_token());
                    let _ = phase_tx.send(AgentPhase::Thinking);

                    let result = {
                        let run = orchestrator.run(&input);
                        tokio::pin!(run);
                        loop {
                            tokio::select! {
                                r = &mut run => break r,
                                Some(cmd) = cmd_rx.recv() => match cmd {
                                    Command::Cancel => supervisor.cancel(),
                                    Command::Quit => {
                                        supervisor.cancel();
                                        quit = true;
                                    }
                                    queued @ (Command::Submit(_) | Command::Clear) => {
                                        pending.push_back(queued)
                                    }
                                },
                            }
                        }
                    };

                    if let Err(e) = result {
                        tracing::error!(code = e.code(), error = %e, "request failed");
                    }
                    if supervisor.is_cancelled() {
                        supervisor.reset();
                    }
                    let _ = phase_tx.send(orchestrator.phase());
                }
                // 空闲时没有可取消的请求
                Command::Cancel => {}
                Command::Clear => match orchestrator.clear() {
                    Ok(()) => {
                        let _ = phase_tx.send(AgentPhase::Idle);
                    }
                    Err(e) => tracing::warn!(error = %e, "clear failed; session kept"),
                },
                Command::Quit => quit = true,
            }
        }
        tracing::info!(session = %supervisor.session_id(), "agent runtime stopped");
    });

    AgentHandle {
        commands: cmd_tx,
        events: event_rx,
        phase: phase_rx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::capability::{CapabilityContext, ExecutorSettings};
    use crate::memory::ContextLog;
    use crate::react::OrchestratorSettings;
    use crate::skills::InMemorySkillSource;
    use crate::tools::{EchoTool, ToolRegistry, ToolRunner};

    fn orchestrator(mock: Arc<ScriptedLlmClient>) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let ctx = CapabilityContext::new(
            mock,
            ToolRunner::new(Arc::new(registry), 5),
            Arc::new(InMemorySkillSource::new()),
            ExecutorSettings::default(),
        );
        Orchestrator::new(ContextLog::in_memory("S"), ctx, OrchestratorSettings::default())
    }

    #[tokio::test]
    async fn test_submit_then_quit() {
        let mock = Arc::new(ScriptedLlmClient::with_decisions([
            json!({"reasoning": "easy", "next_action": "respond_to_user", "final_answer": "hello"}),
        ]));
        let mut handle = create_agent(orchestrator(mock));
        handle.commands.send(Command::Submit("hi".into())).unwrap();

        let mut completed = None;
        while let Some(ev) = handle.events.recv().await {
            if let AgentEvent::Complete { status, text, .. } = ev {
                completed = Some((status, text));
                break;
            }
        }
        assert_eq!(
            completed,
            Some(("completed".to_string(), "hello".to_string()))
        );

        handle.commands.send(Command::Quit).unwrap();
        handle.task.await.unwrap();
        assert_eq!(*handle.phase.borrow(), AgentPhase::Finished);
    }

    #[test]
    fn test_llm_factory_falls_back_to_mock() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        let llm = create_llm_from_config(&cfg);
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }
}
