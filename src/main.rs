//! Wren - Rust 桌面助手
//!
//! 入口：加载配置、初始化日志、构建 Agent 组件，然后运行命令行对话循环。
//! 每轮结束后打印本轮执行过的动作；Ctrl+C 只取消当前这一轮。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use wren::agent::{AgentComponents, Session};
use wren::config::load_config;
use wren::react::ReactEvent;

const EXIT_WORDS: &[&str] = &["exit", "quit", "bye"];

fn print_banner(name: &str) {
    println!("{name} - Calendar & Mail assistant");
    println!("Type a request, or 'exit' / 'quit' / 'bye' to leave. Ctrl+C cancels the current request.");
    println!();
}

/// 过程事件打印到 stderr，不干扰最终回答
fn print_event(ev: &ReactEvent) {
    match ev {
        ReactEvent::ToolInvoked { name, args } => eprintln!("  -> {name} {args}"),
        ReactEvent::ToolResult { name, ok, summary } => {
            let mark = if *ok { "ok" } else { "failed" };
            eprintln!("  <- {name} [{mark}] {summary}");
        }
        ReactEvent::Recovery { action, detail } => eprintln!("  .. {action}: {detail}"),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    wren::observability::init(cfg.bridge.debug);

    let components = AgentComponents::from_config(&cfg).context("Failed to create agent")?;
    let mut session = Session::new();

    let supervisor = session.supervisor();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            supervisor.cancel_turn();
        }
    });

    print_banner(cfg.app.name.as_deref().unwrap_or("Wren"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&input.to_lowercase().as_str()) {
            break;
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(ev) = event_rx.recv().await {
                print_event(&ev);
            }
        });
        let result = session
            .process_message_stream(&components, input, event_tx)
            .await;
        let _ = printer.await;

        match result {
            Ok(outcome) => {
                println!("{}", outcome.answer);
                if !outcome.actions.is_empty() {
                    println!();
                    println!("Actions taken:");
                    for action in &outcome.actions {
                        let mark = if action.ok { "ok" } else { "failed" };
                        println!("  - {} [{mark}] {}", action.tool, action.summary);
                    }
                }
            }
            Err(e) => println!("Error: {e}"),
        }
        println!();
    }

    println!("Bye.");
    Ok(())
}
