//! Tool Catalog：规划器可见的工具表
//!
//! 每个工具名对应一个 (Application, Action) 组合与一组带类型的参数。resolve 把规划器给出的
//! `name + arguments` 校验、补全默认值后转成 Operation；校验失败时一次性返回全部问题。
//! 新增工具只需要在 TOOLS 表中加一项（以及 Bridge 中对应的 renderer）。

use std::fmt;

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::bridge::{Action, Application, ArgValue, Operation};

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Integer,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM-DDTHH:MM[:SS]`（也接受空格分隔）
    DateTime,
}

impl ParamKind {
    fn as_str(self) -> &'static str {
        match self {
            ParamKind::Text => "text",
            ParamKind::Integer => "integer",
            ParamKind::Date => "date (YYYY-MM-DD)",
            ParamKind::DateTime => "datetime (YYYY-MM-DDTHH:MM[:SS])",
        }
    }
}

/// 参数默认值；日期类默认值相对「今天」计算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Text(&'static str),
    Integer(i64),
    /// 今天 + N 天
    DaysFromToday(i64),
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub minimum: Option<i64>,
    pub description: &'static str,
}

const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        default: None,
        minimum: None,
        description,
    }
}

const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default: None,
        minimum: None,
        description,
    }
}

impl ParamSpec {
    const fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    const fn at_least(mut self, minimum: i64) -> Self {
        self.minimum = Some(minimum);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub target: Application,
    pub action: Action,
    pub params: &'static [ParamSpec],
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_calendars",
        description: "List the names of the visible calendars.",
        target: Application::Calendar,
        action: Action::Calendars,
        params: &[],
    },
    ToolSpec {
        name: "list_events",
        description: "List events in a date range across visible calendars (or one named calendar), sorted by start time.",
        target: Application::Calendar,
        action: Action::List,
        params: &[
            optional("calendar_name", ParamKind::Text, "Only list events from this calendar"),
            optional("start_date", ParamKind::Date, "First day of the range (default: today)")
                .with_default(DefaultValue::DaysFromToday(0)),
            optional("end_date", ParamKind::Date, "Last day of the range (default: today + 30 days)")
                .with_default(DefaultValue::DaysFromToday(30)),
            optional("limit", ParamKind::Integer, "Maximum number of events to return")
                .with_default(DefaultValue::Integer(20))
                .at_least(1),
        ],
    },
    ToolSpec {
        name: "search_events",
        description: "Search events whose title or description contains a keyword (case-insensitive).",
        target: Application::Calendar,
        action: Action::Search,
        params: &[
            required("keyword", ParamKind::Text, "Text to look for in title or description"),
            optional("calendar_name", ParamKind::Text, "Only search this calendar"),
            optional("start_date", ParamKind::Date, "First day of the range (default: today)")
                .with_default(DefaultValue::DaysFromToday(0)),
            optional("end_date", ParamKind::Date, "Last day of the range (default: today + 30 days)")
                .with_default(DefaultValue::DaysFromToday(30)),
            optional("limit", ParamKind::Integer, "Maximum number of events to return")
                .with_default(DefaultValue::Integer(50))
                .at_least(1),
        ],
    },
    ToolSpec {
        name: "create_event",
        description: "Create a calendar event. Returns the new event_id.",
        target: Application::Calendar,
        action: Action::Create,
        params: &[
            required("title", ParamKind::Text, "Event title"),
            required("start", ParamKind::DateTime, "Start time, local time"),
            optional("end", ParamKind::DateTime, "End time; if omitted, start + duration_minutes"),
            optional("duration_minutes", ParamKind::Integer, "Length of the event when end is omitted")
                .with_default(DefaultValue::Integer(30))
                .at_least(1),
            optional("calendar_name", ParamKind::Text, "Calendar to create the event in (default: first writable visible calendar)"),
            optional("description", ParamKind::Text, "Event notes")
                .with_default(DefaultValue::Text("")),
        ],
    },
    ToolSpec {
        name: "delete_event",
        description: "Delete the first event whose title matches exactly.",
        target: Application::Calendar,
        action: Action::Delete,
        params: &[
            required("title", ParamKind::Text, "Exact event title"),
            optional("calendar_name", ParamKind::Text, "Only look in this calendar"),
        ],
    },
    ToolSpec {
        name: "list_accounts",
        description: "List the Mail accounts.",
        target: Application::Mail,
        action: Action::Accounts,
        params: &[],
    },
    ToolSpec {
        name: "list_mailboxes",
        description: "List mailboxes, for one account or all accounts.",
        target: Application::Mail,
        action: Action::Mailboxes,
        params: &[optional("account_name", ParamKind::Text, "Only list mailboxes of this account")],
    },
    ToolSpec {
        name: "search_mail",
        description: "Search messages whose subject or sender contains the query; newest first. An empty query lists the latest messages.",
        target: Application::Mail,
        action: Action::Search,
        params: &[
            optional("query", ParamKind::Text, "Text to look for in subject or sender")
                .with_default(DefaultValue::Text("")),
            optional("mailbox", ParamKind::Text, "Mailbox name")
                .with_default(DefaultValue::Text("INBOX")),
            optional("account_name", ParamKind::Text, "Account to search (default: all inboxes)"),
            optional("limit", ParamKind::Integer, "Maximum number of messages to return")
                .with_default(DefaultValue::Integer(10))
                .at_least(1),
        ],
    },
    ToolSpec {
        name: "get_email",
        description: "Get the full content of one message by message_id.",
        target: Application::Mail,
        action: Action::Get,
        params: &[
            required("message_id", ParamKind::Integer, "message_id from search_mail"),
            optional("mailbox", ParamKind::Text, "Mailbox name")
                .with_default(DefaultValue::Text("INBOX")),
            optional("account_name", ParamKind::Text, "Account of the mailbox"),
        ],
    },
    ToolSpec {
        name: "send_email",
        description: "Send a new email. Separate several recipients with commas.",
        target: Application::Mail,
        action: Action::Send,
        params: &[
            required("to", ParamKind::Text, "Recipient address(es)"),
            required("subject", ParamKind::Text, "Subject line"),
            required("body", ParamKind::Text, "Plain text body"),
            optional("account_name", ParamKind::Text, "Account to send from"),
        ],
    },
    ToolSpec {
        name: "reply_email",
        description: "Reply to a message by message_id.",
        target: Application::Mail,
        action: Action::Reply,
        params: &[
            required("message_id", ParamKind::Integer, "message_id from search_mail"),
            required("body", ParamKind::Text, "Plain text reply"),
            optional("mailbox", ParamKind::Text, "Mailbox name")
                .with_default(DefaultValue::Text("INBOX")),
            optional("account_name", ParamKind::Text, "Account of the mailbox"),
        ],
    },
    ToolSpec {
        name: "count_unread_mail",
        description: "Count unread messages in a mailbox.",
        target: Application::Mail,
        action: Action::Count,
        params: &[
            optional("mailbox", ParamKind::Text, "Mailbox name")
                .with_default(DefaultValue::Text("INBOX")),
            optional("account_name", ParamKind::Text, "Account of the mailbox (default: all inboxes)"),
        ],
    },
];

/// 单个参数问题
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Problem {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// 校验失败：列出全部问题（按字段名排序），由 Orchestrator 原样回传给规划器
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("invalid call to {tool}: {}", format_problems(.problems))]
pub struct ValidationError {
    pub tool: String,
    pub problems: Vec<Problem>,
}

fn format_problems(problems: &[Problem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    fn single(tool: &str, field: &str, reason: &str) -> Self {
        Self {
            tool: tool.to_string(),
            problems: vec![Problem {
                field: field.to_string(),
                reason: reason.to_string(),
            }],
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
}

fn convert(spec: &ParamSpec, value: &Value) -> Result<ArgValue, String> {
    let expected = || format!("expected {}", spec.kind.as_str());
    match spec.kind {
        ParamKind::Text => {
            let s = value.as_str().ok_or_else(expected)?;
            if spec.required && s.trim().is_empty() {
                return Err("must not be empty".to_string());
            }
            Ok(ArgValue::Text(s.to_string()))
        }
        ParamKind::Integer => {
            let n = value.as_i64().ok_or_else(expected)?;
            if let Some(min) = spec.minimum {
                if n < min {
                    return Err(format!("must be >= {min}"));
                }
            }
            Ok(ArgValue::Integer(n))
        }
        ParamKind::Date => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            .map(ArgValue::Date)
            .ok_or_else(expected),
        ParamKind::DateTime => value
            .as_str()
            .and_then(parse_datetime)
            .map(ArgValue::DateTime)
            .ok_or_else(expected),
    }
}

fn default_value(spec: &ParamSpec, today: NaiveDate) -> Option<ArgValue> {
    match spec.default? {
        DefaultValue::Text(s) => Some(ArgValue::Text(s.to_string())),
        DefaultValue::Integer(n) => Some(ArgValue::Integer(n)),
        DefaultValue::DaysFromToday(days) => today
            .checked_add_signed(chrono::TimeDelta::days(days))
            .map(ArgValue::Date),
    }
}

impl ToolSpec {
    fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 参数的 JSON Schema（注入到规划器 prompt 中）
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in self.params {
            let mut prop = Map::new();
            let (ty, format) = match p.kind {
                ParamKind::Text => ("string", None),
                ParamKind::Integer => ("integer", None),
                ParamKind::Date => ("string", Some("date")),
                ParamKind::DateTime => ("string", Some("date-time")),
            };
            prop.insert("type".into(), ty.into());
            if let Some(format) = format {
                prop.insert("format".into(), format.into());
            }
            prop.insert("description".into(), p.description.into());
            match p.default {
                Some(DefaultValue::Text(s)) => {
                    prop.insert("default".into(), s.into());
                }
                Some(DefaultValue::Integer(n)) => {
                    prop.insert("default".into(), n.into());
                }
                Some(DefaultValue::DaysFromToday(_)) | None => {}
            }
            if let Some(min) = p.minimum {
                prop.insert("minimum".into(), min.into());
            }
            properties.insert(p.name.to_string(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// 工具表（只读，进程内共享）
#[derive(Debug, Clone, Copy, Default)]
pub struct Catalog;

impl Catalog {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, name: &str) -> Option<&'static ToolSpec> {
        TOOLS.iter().find(|t| t.name == name)
    }

    pub fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    /// 以本地日期作为「今天」解析
    pub fn resolve(&self, name: &str, args: &Value) -> Result<Operation, ValidationError> {
        self.resolve_at(name, args, Local::now().date_naive())
    }

    /// 校验并补全默认值，得到完整的 Operation；不访问任何外部状态
    pub fn resolve_at(
        &self,
        name: &str,
        args: &Value,
        today: NaiveDate,
    ) -> Result<Operation, ValidationError> {
        let spec = self
            .get(name)
            .ok_or_else(|| ValidationError::single(name, "tool", "unknown tool"))?;

        let empty = Map::new();
        let args = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(ValidationError::single(name, "arguments", "must be a JSON object")),
        };

        let mut problems = Vec::new();
        for (key, value) in args {
            if !value.is_null() && spec.param(key).is_none() {
                problems.push(Problem {
                    field: key.clone(),
                    reason: "unknown argument".to_string(),
                });
            }
        }

        let mut op = Operation::new(spec.target, spec.action);
        for p in spec.params {
            match args.get(p.name).filter(|v| !v.is_null()) {
                Some(value) => match convert(p, value) {
                    Ok(v) => op = op.with_arg(p.name, v),
                    Err(reason) => problems.push(Problem {
                        field: p.name.to_string(),
                        reason,
                    }),
                },
                None if p.required => problems.push(Problem {
                    field: p.name.to_string(),
                    reason: "required".to_string(),
                }),
                None => {
                    if let Some(v) = default_value(p, today) {
                        op = op.with_arg(p.name, v);
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(op)
        } else {
            problems.sort();
            Err(ValidationError {
                tool: name.to_string(),
                problems,
            })
        }
    }

    /// 规划器 prompt 中的工具列表：名称、说明、参数 schema
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = TOOLS
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
