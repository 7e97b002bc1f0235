//! Wren - Rust 桌面助手
//!
//! 模块划分：
//! - **agent**: 无头运行时（命令行与 HTTP 前端共用）
//! - **bridge**: 自动化桥：Operation → AppleScript → osascript 子进程 → ExecutionResult
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、恢复策略、会话阶段、会话监管
//! - **filter**: 日历可见性过滤策略
//! - **llm**: 规划器后端（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 单个会话的对话状态
//! - **react**: Planner 与逐步执行主循环
//! - **tools**: Tool Catalog 与执行器

pub mod agent;
pub mod bridge;
pub mod config;
pub mod core;
pub mod filter;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
