//! Operation：经 Catalog 校验后的、完整指定的单次应用操作
//!
//! 目标应用与动作都是封闭枚举；参数是「名字 -> 原始值」的映射，构造后不可变。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// 目标应用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Application {
    Calendar,
    Mail,
}

impl Application {
    /// 脚本中 `tell application "..."` 使用的应用名
    pub fn app_name(self) -> &'static str {
        match self {
            Application::Calendar => "Calendar",
            Application::Mail => "Mail",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Application::Calendar => "calendar",
            Application::Mail => "mail",
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 动作（封闭集合；新增动作 = Catalog 表中加一项 + Bridge 中加一个 renderer）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Calendars,
    List,
    Search,
    Create,
    Delete,
    Accounts,
    Mailboxes,
    Get,
    Send,
    Reply,
    Count,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Calendars => "calendars",
            Action::List => "list",
            Action::Search => "search",
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Accounts => "accounts",
            Action::Mailboxes => "mailboxes",
            Action::Get => "get",
            Action::Send => "send",
            Action::Reply => "reply",
            Action::Count => "count",
        }
    }

    /// 有副作用的动作：成功时 stderr 应为空，超时后也不自动重试
    pub fn is_side_effecting(self) -> bool {
        matches!(
            self,
            Action::Create | Action::Delete | Action::Send | Action::Reply
        )
    }

    pub fn is_read_only(self) -> bool {
        !self.is_side_effecting()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 参数原始值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Text(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Text(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Integer(v)
    }
}

impl From<NaiveDate> for ArgValue {
    fn from(v: NaiveDate) -> Self {
        ArgValue::Date(v)
    }
}

impl From<NaiveDateTime> for ArgValue {
    fn from(v: NaiveDateTime) -> Self {
        ArgValue::DateTime(v)
    }
}

/// 单次操作：目标应用 + 动作 + 参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    target: Application,
    action: Action,
    args: BTreeMap<String, ArgValue>,
}

impl Operation {
    pub fn new(target: Application, action: Action) -> Self {
        Self {
            target,
            action,
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn target(&self) -> Application {
        self.target
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn args(&self) -> &BTreeMap<String, ArgValue> {
        &self.args
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.args.get(name) {
            Some(ArgValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.args.get(name) {
            Some(ArgValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.args.get(name) {
            Some(ArgValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn datetime(&self, name: &str) -> Option<NaiveDateTime> {
        match self.args.get(name) {
            Some(ArgValue::DateTime(d)) => Some(*d),
            _ => None,
        }
    }

    /// 日历枚举类操作：必须经过 FilterPolicy
    pub fn is_calendar_enumeration(&self) -> bool {
        self.target == Application::Calendar
            && matches!(self.action, Action::Calendars | Action::List | Action::Search)
    }

    /// 日志用的简短描述，如 `calendar.create`
    pub fn label(&self) -> String {
        format!("{}.{}", self.target, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let op = Operation::new(Application::Calendar, Action::List)
            .with_arg("calendar_name", "Work")
            .with_arg("limit", 20i64)
            .with_arg("start_date", day);
        assert_eq!(op.text("calendar_name"), Some("Work"));
        assert_eq!(op.integer("limit"), Some(20));
        assert_eq!(op.date("start_date"), Some(day));
        assert_eq!(op.text("limit"), None);
        assert!(op.is_calendar_enumeration());
        assert_eq!(op.label(), "calendar.list");
    }

    #[test]
    fn test_side_effecting_actions() {
        assert!(Action::Create.is_side_effecting());
        assert!(Action::Send.is_side_effecting());
        assert!(Action::Search.is_read_only());
        assert!(Action::Count.is_read_only());
    }

    #[test]
    fn test_mail_is_not_calendar_enumeration() {
        let op = Operation::new(Application::Mail, Action::Search);
        assert!(!op.is_calendar_enumeration());
    }
}
