//! 脚本输出解析：按 OutputShape 把 stdout 转成 Payload
//!
//! 解析是严格的：字段数不符、日期或整数无法解析都返回 ParseError，并附带原始输出。

use chrono::NaiveDateTime;
use serde_json::Value;

use super::result::{Failure, Payload, Record};
use super::script::{Field, FieldKind, OutputShape};

pub const RECORD_SEPARATOR: char = '\u{1e}';
pub const FIELD_SEPARATOR: char = '\u{1f}';

const STATUS_OK: &str = "ok";

/// osascript 会在结果末尾追加换行，这里只去掉行尾换行，保留字段内部的空白
fn strip_trailing_newlines(raw: &str) -> &str {
    raw.trim_end_matches(['\n', '\r'])
}

fn parse_field(field: &Field, value: &str, raw: &str) -> Result<Value, Failure> {
    match field.kind {
        FieldKind::Text => Ok(Value::String(value.to_string())),
        FieldKind::Integer => value
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| {
                Failure::parse_error(
                    format!("field '{}' is not an integer: {value:?}", field.name),
                    raw,
                )
            }),
        FieldKind::DateTime => {
            if value.is_empty() {
                return Ok(Value::Null);
            }
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()))
                .map_err(|_| {
                    Failure::parse_error(
                        format!("field '{}' is not a date: {value:?}", field.name),
                        raw,
                    )
                })
        }
        FieldKind::Bool => match value.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(Failure::parse_error(
                format!("field '{}' is not a boolean: {other:?}", field.name),
                raw,
            )),
        },
    }
}

fn parse_record(fields: &[Field], text: &str, raw: &str) -> Result<Record, Failure> {
    let values: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    if values.len() != fields.len() {
        return Err(Failure::parse_error(
            format!(
                "expected {} fields per record, got {}",
                fields.len(),
                values.len()
            ),
            raw,
        ));
    }
    let mut record = Record::new();
    for (field, value) in fields.iter().zip(values) {
        record.insert(field.name.to_string(), parse_field(field, value, raw)?);
    }
    Ok(record)
}

/// 按预期形状解析 stdout
pub fn parse_output(shape: OutputShape, stdout: &str) -> Result<Payload, Failure> {
    let body = strip_trailing_newlines(stdout);
    match shape {
        OutputShape::Records(fields) => {
            if body.is_empty() {
                return Ok(Payload::List(Vec::new()));
            }
            body.split(RECORD_SEPARATOR)
                .map(|rec| parse_record(fields, rec, stdout))
                .collect::<Result<Vec<_>, _>>()
                .map(Payload::List)
        }
        OutputShape::Single(fields) => {
            if body.is_empty() {
                return Err(Failure::parse_error("expected one record, got none", stdout));
            }
            if body.contains(RECORD_SEPARATOR) {
                return Err(Failure::parse_error(
                    "expected one record, got several",
                    stdout,
                ));
            }
            parse_record(fields, body, stdout).map(Payload::Single)
        }
        OutputShape::Identifier(key) => {
            let id = body.trim();
            if id.is_empty() || id.contains(RECORD_SEPARATOR) || id.contains(FIELD_SEPARATOR) {
                return Err(Failure::parse_error("expected a single identifier", stdout));
            }
            let mut record = Record::new();
            record.insert(key.to_string(), Value::String(id.to_string()));
            Ok(Payload::Single(record))
        }
        OutputShape::Status => {
            if body.trim() == STATUS_OK {
                let mut record = Record::new();
                record.insert("status".to_string(), Value::String(STATUS_OK.to_string()));
                Ok(Payload::Single(record))
            } else {
                Err(Failure::parse_error(
                    format!("expected status token '{STATUS_OK}'"),
                    stdout,
                ))
            }
        }
        OutputShape::Count => body
            .trim()
            .parse::<u64>()
            .map(Payload::Count)
            .map_err(|_| Failure::parse_error("expected a non-negative integer", stdout)),
    }
}
