//! 系统上下文：规划器 prompt 中的当前日期时间，便于模型把「明天上午 9 点」换算成具体时间

use chrono::{Local, NaiveDateTime};

/// 例如 `Today: 2026-10-18 (Sunday) at 14:03:00`
pub fn system_context_at(now: NaiveDateTime) -> String {
    format!(
        "Today: {} ({}) at {}",
        now.format("%Y-%m-%d"),
        now.format("%A"),
        now.format("%H:%M:%S")
    )
}

pub fn system_context() -> String {
    system_context_at(Local::now().naive_local())
}
