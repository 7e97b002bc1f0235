//! AppleScript 渲染
//!
//! 每个受支持的 (Application, Action) 组合对应一个 renderer，把 Operation 渲染成完整的脚本文本。
//! 同一个 Operation + FilterPolicy 总是得到逐字节相同的脚本。
//!
//! 脚本输出协议：记录之间用 RS（character id 30）分隔，字段之间用 US（character id 31）分隔；
//! 脚本内先把字段文本中的 RS/US 替换为空格，日期统一由 `isoDate` 输出为 `YYYY-MM-DDTHH:MM:SS`。

use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

use super::operation::{Action, Application, Operation};
use crate::filter::FilterPolicy;

/// 字段值类型，决定解析时如何校验
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    DateTime,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

pub const CALENDAR_FIELDS: &[Field] = &[field("name", FieldKind::Text)];

pub const EVENT_FIELDS: &[Field] = &[
    field("event_id", FieldKind::Text),
    field("calendar", FieldKind::Text),
    field("title", FieldKind::Text),
    field("start", FieldKind::DateTime),
    field("end", FieldKind::DateTime),
    field("description", FieldKind::Text),
];

pub const ACCOUNT_FIELDS: &[Field] = &[field("name", FieldKind::Text)];

pub const MAILBOX_FIELDS: &[Field] = &[
    field("account", FieldKind::Text),
    field("name", FieldKind::Text),
];

pub const MESSAGE_FIELDS: &[Field] = &[
    field("message_id", FieldKind::Integer),
    field("account", FieldKind::Text),
    field("mailbox", FieldKind::Text),
    field("subject", FieldKind::Text),
    field("sender", FieldKind::Text),
    field("date", FieldKind::DateTime),
    field("read", FieldKind::Bool),
];

pub const MESSAGE_CONTENT_FIELDS: &[Field] = &[
    field("message_id", FieldKind::Integer),
    field("account", FieldKind::Text),
    field("mailbox", FieldKind::Text),
    field("subject", FieldKind::Text),
    field("sender", FieldKind::Text),
    field("date", FieldKind::DateTime),
    field("content", FieldKind::Text),
];

/// 脚本 stdout 的预期形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// 0..n 条记录
    Records(&'static [Field]),
    /// 恰好一条记录
    Single(&'static [Field]),
    /// 单个标识符，放进以 key 命名的字段
    Identifier(&'static str),
    /// 状态令牌 `ok`
    Status,
    /// 非负整数
    Count,
}

/// 渲染好的脚本：文本 + 超时 + 输出形状
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptProgram {
    pub text: String,
    pub timeout: Duration,
    pub shape: OutputShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unsupported operation: {target}.{action}")]
    Unsupported { target: Application, action: Action },

    #[error("operation {operation} is missing argument '{name}'")]
    MissingArgument {
        operation: String,
        name: &'static str,
    },

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },
}

const STATUS_OK: &str = "ok";
const DEFAULT_DURATION_MINUTES: i64 = 30;

/// 把任意文本渲染成 AppleScript 字符串表达式
///
/// 反斜杠、双引号、换行、回车、制表符用反斜杠转义；其余控制字符用 `character id N` 拼接。
/// 返回值始终是一个完整的表达式，可以直接放在赋值或属性记录里。
pub fn applescript_string(value: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::from("\"");
    for ch in value.chars() {
        match ch {
            '\\' => current.push_str("\\\\"),
            '"' => current.push_str("\\\""),
            '\n' => current.push_str("\\n"),
            '\r' => current.push_str("\\r"),
            '\t' => current.push_str("\\t"),
            c if c.is_control() => {
                current.push('"');
                parts.push(std::mem::replace(&mut current, String::from("\"")));
                parts.push(format!("(character id {})", c as u32));
            }
            c => current.push(c),
        }
    }
    current.push('"');
    parts.push(current);

    if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("({})", parts.join(" & "))
    }
}

/// 带缩进的脚本拼装器
struct ScriptWriter {
    buf: String,
    depth: usize,
}

impl ScriptWriter {
    fn new() -> Self {
        Self {
            buf: String::new(),
            depth: 0,
        }
    }

    fn line(&mut self, text: impl AsRef<str>) -> &mut Self {
        for _ in 0..self.depth {
            self.buf.push('\t');
        }
        self.buf.push_str(text.as_ref());
        self.buf.push('\n');
        self
    }

    fn open(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.line(text);
        self.depth += 1;
        self
    }

    fn close(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.depth = self.depth.saturating_sub(1);
        self.line(text)
    }

    fn blank(&mut self) -> &mut Self {
        self.buf.push('\n');
        self
    }

    fn finish(self) -> String {
        self.buf
    }
}

fn text_list(items: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let rendered: Vec<String> = items
        .into_iter()
        .map(|s| applescript_string(s.as_ref()))
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

/// 所有脚本共用的 handler：字段清洗、拼接、ISO 日期
fn write_common_handlers(w: &mut ScriptWriter) {
    w.open("on cleanText(v)")
        .line("if v is missing value then return \"\"")
        .line("set s to v as text")
        .line("set savedDelims to AppleScript's text item delimiters")
        .line("set AppleScript's text item delimiters to {character id 30, character id 31}")
        .line("set parts to text items of s")
        .line("set AppleScript's text item delimiters to \" \"")
        .line("set s to parts as text")
        .line("set AppleScript's text item delimiters to savedDelims")
        .line("return s")
        .close("end cleanText")
        .blank();

    w.open("on joinFields(values)")
        .line("set cleaned to {}")
        .open("repeat with v in values")
        .line("set end of cleaned to my cleanText(contents of v)")
        .close("end repeat")
        .line("set savedDelims to AppleScript's text item delimiters")
        .line("set AppleScript's text item delimiters to character id 31")
        .line("set joined to cleaned as text")
        .line("set AppleScript's text item delimiters to savedDelims")
        .line("return joined")
        .close("end joinFields")
        .blank();

    w.open("on joinRecords(recs)")
        .line("set savedDelims to AppleScript's text item delimiters")
        .line("set AppleScript's text item delimiters to character id 30")
        .line("set joined to recs as text")
        .line("set AppleScript's text item delimiters to savedDelims")
        .line("return joined")
        .close("end joinRecords")
        .blank();

    w.open("on pad(n)")
        .line("return text -2 thru -1 of (\"0\" & (n as integer))")
        .close("end pad")
        .blank();

    w.open("on isoDate(d)")
        .line("if d is missing value then return \"\"")
        .line("set t to time of d")
        .line("return ((year of d) as text) & \"-\" & my pad(month of d as integer) & \"-\" & my pad(day of d) & \"T\" & my pad(t div 3600) & \":\" & my pad((t mod 3600) div 60) & \":\" & my pad(t mod 60)")
        .close("end isoDate")
        .blank();
}

/// 由 FilterPolicy 渲染出的 isVisible handler，判定顺序与 `FilterPolicy::classify` 一致
fn write_visibility_handler(w: &mut ScriptWriter, policy: &FilterPolicy) {
    w.open("on isVisible(calName)");
    let patterns = policy.lowercase_skip_patterns();
    if !patterns.is_empty() {
        // AppleScript 的 contains 默认不区分大小写
        w.open(format!("repeat with p in {}", text_list(&patterns)))
            .line("if calName contains (contents of p) then return false")
            .close("end repeat");
    }
    w.open("considering case");
    if !policy.disabled_calendars.is_empty() {
        w.line(format!(
            "if {} contains {{calName}} then return false",
            text_list(&policy.disabled_calendars)
        ));
    }
    if !policy.enabled_calendars.is_empty() {
        w.line(format!(
            "if {} contains {{calName}} then return true",
            text_list(&policy.enabled_calendars)
        ));
        w.line("return false");
    } else {
        w.line(format!("return {}", policy.default_enabled));
    }
    w.close("end considering");
    w.close("end isVisible").blank();
}

/// 生成把变量设为指定本地时间的语句（先把 day 设为 1，避免换月时溢出）
fn write_date(w: &mut ScriptWriter, var: &str, at: NaiveDateTime) {
    let seconds = at.time().num_seconds_from_midnight();
    w.line(format!("set {var} to current date"))
        .line(format!("set day of {var} to 1"))
        .line(format!("set year of {var} to {}", at.year()))
        .line(format!("set month of {var} to {}", at.month()))
        .line(format!("set day of {var} to {}", at.day()))
        .line(format!("set time of {var} to {seconds}"));
}

fn start_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_hms_opt(23, 59, 59)
        .unwrap_or_else(|| day.and_time(NaiveTime::MIN))
}

struct Renderer<'a> {
    op: &'a Operation,
    policy: &'a FilterPolicy,
}

impl<'a> Renderer<'a> {
    fn missing(&self, name: &'static str) -> RenderError {
        RenderError::MissingArgument {
            operation: self.op.label(),
            name,
        }
    }

    fn text(&self, name: &'static str) -> Result<&'a str, RenderError> {
        self.op.text(name).ok_or_else(|| self.missing(name))
    }

    fn date(&self, name: &'static str) -> Result<NaiveDate, RenderError> {
        self.op.date(name).ok_or_else(|| self.missing(name))
    }

    fn datetime(&self, name: &'static str) -> Result<NaiveDateTime, RenderError> {
        self.op.datetime(name).ok_or_else(|| self.missing(name))
    }

    fn integer(&self, name: &'static str) -> Result<i64, RenderError> {
        self.op.integer(name).ok_or_else(|| self.missing(name))
    }

    fn calendar_list_expr(&self) -> String {
        match self.op.text("calendar_name") {
            Some(name) => format!("{{calendar {}}}", applescript_string(name)),
            None => "calendars".to_string(),
        }
    }

    /// 在 Mail 的 tell 块内设置 mbs：要查找的邮箱列表
    ///
    /// 指定账户时只有该账户的邮箱；未指定账户时 INBOX 用统一收件箱，其他邮箱名在每个账户里各找一次。
    fn write_mailbox_list(&self, w: &mut ScriptWriter) {
        let mailbox = self.op.text("mailbox").unwrap_or("INBOX");
        match self.op.text("account_name") {
            Some(account) => {
                w.line(format!(
                    "set mbs to {{mailbox {} of account {}}}",
                    applescript_string(mailbox),
                    applescript_string(account)
                ));
            }
            None if mailbox.eq_ignore_ascii_case("INBOX") => {
                w.line("set mbs to {inbox}");
            }
            None => {
                w.line("set mbs to {}")
                    .open("repeat with acct in accounts")
                    .open("try")
                    .line(format!("set end of mbs to mailbox {} of acct", applescript_string(mailbox)))
                    .close("end try")
                    .close("end repeat");
            }
        }
    }

    /// 在 mbs 中按 id 找到邮件并存入 msg，找不到时报 -1728
    fn write_message_lookup(&self, w: &mut ScriptWriter, id: i64) {
        w.line("set msg to missing value")
            .open("repeat with mbRef in mbs")
            .line(format!("set found to (messages of (contents of mbRef) whose id is {id})"))
            .open("if found is not {} then")
            .line("set msg to item 1 of found")
            .line("exit repeat")
            .close("end if")
            .close("end repeat")
            .line(format!("if msg is missing value then error \"message not found: {id}\" number -1728"));
    }

    fn calendars(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        w.line("set out to {}");
        w.open("tell application \"Calendar\"")
            .open("repeat with cal in calendars")
            .line("set calName to name of cal")
            .open("if my isVisible(calName) then")
            .line("set end of out to my joinFields({calName})")
            .close("end if")
            .close("end repeat")
            .close("end tell");
        w.line("return my joinRecords(out)");
        Ok(OutputShape::Records(CALENDAR_FIELDS))
    }

    /// List 与 Search 共用：按日期区间取事件（区间相交即可），关键字过滤与排序在解析后完成
    fn events(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let start = start_of_day(self.date("start_date")?);
        let end = end_of_day(self.date("end_date")?);
        if end < start {
            return Err(RenderError::InvalidArgument {
                name: "end_date",
                reason: "must not be before start_date".to_string(),
            });
        }
        write_date(w, "rangeStart", start);
        write_date(w, "rangeEnd", end);
        w.line("set out to {}");
        w.open("tell application \"Calendar\"")
            .open(format!("repeat with cal in {}", self.calendar_list_expr()))
            .line("set calName to name of cal")
            .open("if my isVisible(calName) then")
            .line("set evs to (every event of cal whose start date < rangeEnd and end date > rangeStart)")
            .open("repeat with ev in evs")
            .line("set end of out to my joinFields({uid of ev, calName, summary of ev, my isoDate(start date of ev), my isoDate(end date of ev), description of ev})")
            .close("end repeat")
            .close("end if")
            .close("end repeat")
            .close("end tell");
        w.line("return my joinRecords(out)");
        Ok(OutputShape::Records(EVENT_FIELDS))
    }

    fn create_event(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let title = self.text("title")?;
        let start = self.datetime("start")?;
        let end = match self.op.datetime("end") {
            Some(end) => end,
            None => {
                let minutes = self
                    .op
                    .integer("duration_minutes")
                    .unwrap_or(DEFAULT_DURATION_MINUTES);
                chrono::TimeDelta::try_minutes(minutes)
                    .and_then(|d| start.checked_add_signed(d))
                    .ok_or_else(|| RenderError::InvalidArgument {
                        name: "duration_minutes",
                        reason: "out of range".to_string(),
                    })?
            }
        };
        if end <= start {
            return Err(RenderError::InvalidArgument {
                name: "end",
                reason: "must be after start".to_string(),
            });
        }
        let description = self.op.text("description").unwrap_or("");

        write_date(w, "startDate", start);
        write_date(w, "endDate", end);
        w.open("tell application \"Calendar\"");
        match self.op.text("calendar_name") {
            Some(name) => {
                w.line(format!("set targetCal to calendar {}", applescript_string(name)));
            }
            None => {
                // 未指定日历时取第一个可写且可见的日历
                w.line("set targetCal to missing value")
                    .open("repeat with cal in calendars")
                    .open("if writable of cal and my isVisible(name of cal) then")
                    .line("set targetCal to contents of cal")
                    .line("exit repeat")
                    .close("end if")
                    .close("end repeat")
                    .line("if targetCal is missing value then error \"no writable calendar available\" number 1728");
            }
        }
        w.open("tell targetCal")
            .line(format!(
                "set newEvent to make new event with properties {{summary:{}, start date:startDate, end date:endDate, description:{}}}",
                applescript_string(title),
                applescript_string(description)
            ))
            .close("end tell")
            .line("return uid of newEvent")
            .close("end tell");
        Ok(OutputShape::Identifier("event_id"))
    }

    fn delete_event(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let title = applescript_string(self.text("title")?);
        w.line(format!("set targetTitle to {title}"));
        w.open("tell application \"Calendar\"").line("set matches to {}");
        match self.op.text("calendar_name") {
            Some(name) => {
                w.line(format!(
                    "set matches to (every event of calendar {} whose summary is targetTitle)",
                    applescript_string(name)
                ));
            }
            None => {
                w.open("repeat with cal in calendars")
                    .open("if my isVisible(name of cal) then")
                    .line("set matches to matches & (every event of cal whose summary is targetTitle)")
                    .close("end if")
                    .close("end repeat");
            }
        }
        w.line("if (count of matches) is 0 then error \"event not found: \" & targetTitle number 1728")
            .line("delete (item 1 of matches)")
            .close("end tell");
        w.line(format!("return \"{STATUS_OK}\""));
        Ok(OutputShape::Status)
    }

    fn accounts(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        w.line("set out to {}");
        w.open("tell application \"Mail\"")
            .open("repeat with acc in accounts")
            .line("set end of out to my joinFields({name of acc})")
            .close("end repeat")
            .close("end tell");
        w.line("return my joinRecords(out)");
        Ok(OutputShape::Records(ACCOUNT_FIELDS))
    }

    fn mailboxes(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let accounts = match self.op.text("account_name") {
            Some(name) => format!("{{account {}}}", applescript_string(name)),
            None => "accounts".to_string(),
        };
        w.line("set out to {}");
        w.open("tell application \"Mail\"")
            .open(format!("repeat with acc in {accounts}"))
            .line("set accName to name of acc")
            .open("repeat with mb in mailboxes of acc")
            .line("set end of out to my joinFields({accName, name of mb})")
            .close("end repeat")
            .close("end repeat")
            .close("end tell");
        w.line("return my joinRecords(out)");
        Ok(OutputShape::Records(MAILBOX_FIELDS))
    }

    fn search_mail(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let limit = self.integer("limit")?;
        let query = self.op.text("query").unwrap_or("");
        w.line("set out to {}");
        w.open("tell application \"Mail\"");
        self.write_mailbox_list(w);
        if !query.is_empty() {
            w.line(format!("set q to {}", applescript_string(query)));
        }
        w.line("set msgs to {}").open("repeat with mbRef in mbs");
        if query.is_empty() {
            w.line("set msgs to msgs & (messages of (contents of mbRef))");
        } else {
            // 主题或发件人包含关键字（contains 默认不区分大小写）
            w.line("set msgs to msgs & (every message of (contents of mbRef) whose subject contains q or sender contains q)");
        }
        w.close("end repeat")
            .line("set total to count of msgs")
            .line(format!("if total > {limit} then set total to {limit}"))
            .open("repeat with i from 1 to total")
            .line("set msg to item i of msgs")
            .line("set end of out to my joinFields({id of msg, name of account of mailbox of msg, name of mailbox of msg, subject of msg, sender of msg, my isoDate(date received of msg), read status of msg})")
            .close("end repeat")
            .close("end tell");
        w.line("return my joinRecords(out)");
        Ok(OutputShape::Records(MESSAGE_FIELDS))
    }

    fn get_email(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let id = self.integer("message_id")?;
        w.open("tell application \"Mail\"");
        self.write_mailbox_list(w);
        self.write_message_lookup(w, id);
        w.line("return my joinFields({id of msg, name of account of mailbox of msg, name of mailbox of msg, subject of msg, sender of msg, my isoDate(date received of msg), content of msg})")
            .close("end tell");
        Ok(OutputShape::Single(MESSAGE_CONTENT_FIELDS))
    }

    fn send_email(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let to = self.text("to")?;
        let recipients: Vec<&str> = to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(RenderError::InvalidArgument {
                name: "to",
                reason: "at least one recipient address is required".to_string(),
            });
        }
        let subject = self.text("subject")?;
        let body = self.text("body")?;

        w.open("tell application \"Mail\"")
            .line(format!(
                "set newMessage to make new outgoing message with properties {{subject:{}, content:{}, visible:false}}",
                applescript_string(subject),
                applescript_string(body)
            ));
        if let Some(account) = self.op.text("account_name") {
            w.line(format!(
                "set sender of newMessage to item 1 of (email addresses of account {})",
                applescript_string(account)
            ));
        }
        w.open("tell newMessage");
        for address in recipients {
            w.line(format!(
                "make new to recipient at end of to recipients with properties {{address:{}}}",
                applescript_string(address)
            ));
        }
        w.close("end tell")
            .line("set didSend to send newMessage")
            .line("if didSend is false then error \"Mail did not send the message\"")
            .close("end tell");
        w.line(format!("return \"{STATUS_OK}\""));
        Ok(OutputShape::Status)
    }

    fn reply_email(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        let id = self.integer("message_id")?;
        let body = self.text("body")?;
        w.open("tell application \"Mail\"");
        self.write_mailbox_list(w);
        self.write_message_lookup(w, id);
        w.line("set replyMsg to reply msg without opening window")
            .line(format!("set content of replyMsg to {}", applescript_string(body)))
            .line("set didSend to send replyMsg")
            .line("if didSend is false then error \"Mail did not send the reply\"")
            .close("end tell");
        w.line(format!("return \"{STATUS_OK}\""));
        Ok(OutputShape::Status)
    }

    fn count_unread(&self, w: &mut ScriptWriter) -> Result<OutputShape, RenderError> {
        w.open("tell application \"Mail\"");
        self.write_mailbox_list(w);
        w.line("set total to 0")
            .open("repeat with mbRef in mbs")
            .line("set total to total + (unread count of (contents of mbRef))")
            .close("end repeat")
            .line("return total")
            .close("end tell");
        Ok(OutputShape::Count)
    }
}

/// 渲染 Operation；不支持的组合在这里被拒绝，不会生成任何脚本
pub fn render(
    op: &Operation,
    policy: &FilterPolicy,
    timeout: Duration,
) -> Result<ScriptProgram, RenderError> {
    let renderer = Renderer { op, policy };
    let mut w = ScriptWriter::new();
    write_common_handlers(&mut w);
    if op.target() == Application::Calendar {
        write_visibility_handler(&mut w, renderer.policy);
    }

    let shape = match (op.target(), op.action()) {
        (Application::Calendar, Action::Calendars) => renderer.calendars(&mut w)?,
        (Application::Calendar, Action::List) => renderer.events(&mut w)?,
        (Application::Calendar, Action::Search) => {
            renderer.text("keyword")?;
            renderer.events(&mut w)?
        }
        (Application::Calendar, Action::Create) => renderer.create_event(&mut w)?,
        (Application::Calendar, Action::Delete) => renderer.delete_event(&mut w)?,
        (Application::Mail, Action::Accounts) => renderer.accounts(&mut w)?,
        (Application::Mail, Action::Mailboxes) => renderer.mailboxes(&mut w)?,
        (Application::Mail, Action::Search) => renderer.search_mail(&mut w)?,
        (Application::Mail, Action::Get) => renderer.get_email(&mut w)?,
        (Application::Mail, Action::Send) => renderer.send_email(&mut w)?,
        (Application::Mail, Action::Reply) => renderer.reply_email(&mut w)?,
        (Application::Mail, Action::Count) => renderer.count_unread(&mut w)?,
        (target, action) => return Err(RenderError::Unsupported { target, action }),
    };

    Ok(ScriptProgram {
        text: w.finish(),
        timeout,
        shape,
    })
}
