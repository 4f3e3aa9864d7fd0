//! Hive - Rust 任务智能体
//!
//! 入口：初始化日志、加载配置、构建组件。
//! `hive "<request>"` 单次运行并打印结果；无参数时从 stdin 逐行读取请求，
//! `/cancel`、`/clear`、`/quit` 分别对应运行时命令。

use anyhow::Context;
use hive::agent::{create_agent_components, process_request};
use hive::config::{load_config, AppConfig};
use hive::core::{create_agent, Command};
use hive::react::AgentEvent;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let components = create_agent_components(cfg)
        .await
        .context("Failed to create agent")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let request = args.join(" ");
        let mut session = components.new_session();
        let outcome = process_request(&mut session, &request)
            .await
            .context("Request failed")?;
        println!("{}", outcome.response);
        return Ok(());
    }

    let mut handle = create_agent(components.new_session());
    // stdin 结束后关闭命令通道：排队的请求处理完运行时自行退出
    let mut commands = Some(handle.commands);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line(), if commands.is_some() => {
                let Some(line) = line.context("read stdin")? else {
                    commands = None;
                    continue;
                };
                let cmd = match line.trim() {
                    "" => continue,
                    "/cancel" => Command::Cancel,
                    "/clear" => Command::Clear,
                    "/quit" => Command::Quit,
                    request => Command::Submit(request.to_string()),
                };
                if let Some(tx) = &commands {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
            }
            ev = handle.events.recv() => match ev {
                Some(AgentEvent::Thinking { source, text, .. }) => eprintln!("[{source}] {text}"),
                Some(AgentEvent::Action { source, action, target }) => {
                    eprintln!("[{source}] {action} {}", target.unwrap_or_default())
                }
                Some(AgentEvent::Result { source, ok, preview }) => {
                    eprintln!("[{source}] {} {preview}", if ok { "ok" } else { "failed" })
                }
                Some(AgentEvent::Error { source, code, text }) => eprintln!("[{source}] {code}: {text}"),
                Some(AgentEvent::Complete { status, text, .. }) => println!("({status}) {text}"),
                None => break,
            },
        }
    }

    handle.task.await.context("agent runtime panicked")?;
    Ok(())
}
