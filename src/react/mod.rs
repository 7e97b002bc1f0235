//! 编排层：Planner、逐步执行主循环、过程事件、系统上下文

pub mod events;
pub mod loop_;
pub mod planner;
pub mod system_context;

pub use events::ReactEvent;
pub use loop_::{react_loop, ActionRecord, ReactSession, TurnOutcome, DEFAULT_MAX_STEPS};
pub use planner::{
    load_system_prompt_template, parse_planner_reply, Planner, PlannerReply, ToolCall,
    DEFAULT_SYSTEM_PROMPT,
};
pub use system_context::{system_context, system_context_at};
