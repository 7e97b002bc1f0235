//! Automation Bridge：把 Operation 渲染为 AppleScript，经 osascript 执行，并把输出解析为 ExecutionResult

pub mod automation;
pub mod operation;
pub mod parse;
pub mod result;
pub mod runner;
pub mod script;

pub use automation::{AutomationBridge, Diagnostics, TracedExecution};
pub use operation::{Action, Application, ArgValue, Operation};
pub use result::{ExecutionResult, Failure, FailureKind, Payload, Record};
pub use runner::{ProcessRunner, RawOutput, RunnerError, ScriptRunner};
pub use script::{applescript_string, render, OutputShape, RenderError, ScriptProgram};
