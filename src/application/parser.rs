//! Parsing of raw WeChat database values.
//!
//! Handles conversion from scanned rows and blobs to domain models.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use md5::{Digest, Md5};

use crate::domain::{AppError, ContentType, Direction, MessageRecord, RecordOrigin, Result};
use crate::infrastructure::CellValue;

/// Prefix of per-conversation tables in message shards.
pub const CHAT_TABLE_PREFIX: &str = "Chat_";

/// Columns read from a chat table, in this order.
pub const MESSAGE_COLUMNS: &[&str] = &["CreateTime", "Des", "Message", "Type", "MesLocalID"];

/// Ordering key of a chat table.
pub const MESSAGE_ORDER_KEY: (&str, &str) = ("CreateTime", "MesLocalID");

/// Name of the chat table holding a contact's conversation.
#[must_use]
pub fn chat_table_name(identifier: &str) -> String {
    format!("{CHAT_TABLE_PREFIX}{}", chat_hash(identifier))
}

/// Lowercase MD5 hex of an identifier, as used in chat table names.
#[must_use]
pub fn chat_hash(identifier: &str) -> String {
    hex::encode(Md5::digest(identifier.as_bytes()))
}

/// Strings stored in `Friend.dbContactRemark`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemarkFields {
    pub nickname: Option<String>,
    pub alias: Option<String>,
    pub remark: Option<String>,
}

/// Decodes the length-delimited remark blob.
///
/// Field 1 is the nickname, field 2 the alias and field 3 the remark. Blobs
/// that are not in that layout are decoded as text and used as nickname.
#[must_use]
pub fn decode_contact_remark(blob: &[u8]) -> RemarkFields {
    decode_fields(blob).unwrap_or_else(|| RemarkFields {
        nickname: printable(&String::from_utf8_lossy(blob)),
        ..RemarkFields::default()
    })
}

fn decode_fields(mut buf: &[u8]) -> Option<RemarkFields> {
    let mut fields = RemarkFields::default();
    while !buf.is_empty() {
        let key = read_varint(&mut buf)?;
        match key & 0x7 {
            0 => {
                read_varint(&mut buf)?;
            }
            2 => {
                let len = usize::try_from(read_varint(&mut buf)?).ok()?;
                if len > buf.len() {
                    return None;
                }
                let (value, rest) = buf.split_at(len);
                buf = rest;
                let text = std::str::from_utf8(value).ok().and_then(printable);
                match key >> 3 {
                    1 => fields.nickname = text,
                    2 => fields.alias = text,
                    3 => fields.remark = text,
                    _ => {}
                }
            }
            _ => return None,
        }
    }
    Some(fields)
}

fn read_varint(buf: &mut &[u8]) -> Option<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = buf.split_first()?;
        *buf = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

/// Drops control characters and trims; empty results become `None`.
fn printable(s: &str) -> Option<String> {
    let cleaned: String = s.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Splits a received group message into `(sender, content)`.
///
/// Group messages arrive as `wxid_sender:\ncontent`.
#[must_use]
pub fn split_group_sender(content: &str) -> Option<(&str, &str)> {
    let (sender, rest) = content.split_once(":\n")?;
    (!sender.is_empty() && !sender.contains(char::is_whitespace)).then_some((sender, rest))
}

/// Converts a chat table row into a record.
///
/// Returns `None` when the timestamp or direction is unusable.
#[must_use]
pub fn parse_message_row(row: &[CellValue], shard: u32, is_group: bool) -> Option<MessageRecord> {
    let timestamp = row.first()?.as_i64()?;
    let direction = u8::try_from(row.get(1)?.as_i64()?)
        .ok()
        .and_then(|d| Direction::try_from(d).ok())?;
    let raw = row.get(2).and_then(CellValue::to_text).unwrap_or_default();
    let content_type = ContentType::from_code(row.get(3).and_then(CellValue::as_i64).unwrap_or(0));
    let row_id = row.get(4).and_then(CellValue::as_i64).unwrap_or(0);

    let (sender_id, content) = match split_group_sender(&raw) {
        Some((sender, rest)) if is_group && direction == Direction::Received => {
            (Some(sender.to_string()), rest.to_string())
        }
        _ => (None, raw),
    };

    Some(MessageRecord {
        timestamp,
        direction,
        sender_id,
        content,
        content_type,
        origin: RecordOrigin { shard, row_id },
    })
}

/// Date formats accepted for time-range bounds.
const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const MONTH_DAY_FORMATS: &[&str] = &["%m-%d", "%m/%d"];

/// Which end of a range a user-supplied date bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

/// Parses a user date; date-only end bounds extend to `23:59:59`.
///
/// Month-day input (`MM-DD`) uses the current year.
///
/// # Errors
/// Returns `InvalidData` if no format matches.
pub fn parse_date_bound(input: &str, bound: Bound) -> Result<NaiveDateTime> {
    parse_date_bound_in_year(input, bound, Local::now().year())
}

fn parse_date_bound_in_year(input: &str, bound: Bound, year: i32) -> Result<NaiveDateTime> {
    let input = input.trim();

    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, fmt) {
            return Ok(dt);
        }
    }

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .or_else(|| {
            MONTH_DAY_FORMATS.iter().find_map(|fmt| {
                NaiveDate::parse_from_str(&format!("{year}-{input}"), &format!("%Y-{fmt}")).ok()
            })
        })
        .ok_or_else(|| AppError::InvalidData {
            message: format!("Cannot parse date: {input}"),
        })?;

    let time = match bound {
        Bound::Start => NaiveTime::MIN,
        Bound::End => NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
    };
    Ok(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remark_blob(fields: &[(u8, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (field, value) in fields {
            out.push((field << 3) | 2);
            out.push(u8::try_from(value.len()).unwrap());
            out.extend_from_slice(value.as_bytes());
        }
        out
    }

    #[test]
    fn test_chat_table_name() {
        assert_eq!(chat_hash("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(chat_table_name("abc"), "Chat_900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_decode_contact_remark_fields() {
        let blob = remark_blob(&[(1, "张三"), (2, "zhangsan"), (3, "老张")]);
        let fields = decode_contact_remark(&blob);
        assert_eq!(fields.nickname.as_deref(), Some("张三"));
        assert_eq!(fields.alias.as_deref(), Some("zhangsan"));
        assert_eq!(fields.remark.as_deref(), Some("老张"));
    }

    #[test]
    fn test_decode_contact_remark_fallback() {
        let fields = decode_contact_remark("\u{1}李四\u{7}".as_bytes());
        assert_eq!(fields.nickname.as_deref(), Some("李四"));
        assert!(fields.remark.is_none());
    }

    #[test]
    fn test_split_group_sender() {
        assert_eq!(
            split_group_sender("wxid_a:\nhello:\nworld"),
            Some(("wxid_a", "hello:\nworld"))
        );
        assert_eq!(split_group_sender("just text"), None);
        assert_eq!(split_group_sender("two words:\nx"), None);
    }

    #[test]
    fn test_parse_message_row_group() {
        let row = vec![
            CellValue::Integer(100),
            CellValue::Integer(1),
            CellValue::Text("wxid_b:\nhi all".into()),
            CellValue::Integer(1),
            CellValue::Integer(7),
        ];
        let msg = parse_message_row(&row, 2, true).unwrap();
        assert_eq!(msg.sender_id.as_deref(), Some("wxid_b"));
        assert_eq!(msg.content, "hi all");
        assert_eq!(msg.direction, Direction::Received);
        assert_eq!(msg.origin, RecordOrigin { shard: 2, row_id: 7 });

        let direct = parse_message_row(&row, 2, false).unwrap();
        assert!(direct.sender_id.is_none());
        assert_eq!(direct.content, "wxid_b:\nhi all");
    }

    #[test]
    fn test_parse_message_row_rejects_bad_direction() {
        let row = vec![
            CellValue::Integer(100),
            CellValue::Integer(5),
            CellValue::Text("x".into()),
            CellValue::Integer(1),
            CellValue::Integer(1),
        ];
        assert!(parse_message_row(&row, 1, false).is_none());
    }

    #[test]
    fn test_parse_message_row_content_types() {
        let row = |t: i64| {
            vec![
                CellValue::Integer(1),
                CellValue::Integer(0),
                CellValue::Blob(b"<msg/>".to_vec()),
                CellValue::Integer(t),
                CellValue::Integer(1),
            ]
        };
        assert_eq!(parse_message_row(&row(3), 1, false).unwrap().content_type, ContentType::Image);
        assert_eq!(parse_message_row(&row(34), 1, false).unwrap().content_type, ContentType::Voice);
        assert_eq!(parse_message_row(&row(49), 1, false).unwrap().content_type, ContentType::Other);
        assert_eq!(parse_message_row(&row(49), 1, false).unwrap().content, "<msg/>");
    }

    #[test]
    fn test_parse_date_bounds() {
        let start = parse_date_bound_in_year("2024-03-05", Bound::Start, 2000).unwrap();
        assert_eq!(start.to_string(), "2024-03-05 00:00:00");

        let end = parse_date_bound_in_year("2024/03/05", Bound::End, 2000).unwrap();
        assert_eq!(end.to_string(), "2024-03-05 23:59:59");

        let exact = parse_date_bound_in_year("2024-03-05 08:30:00", Bound::End, 2000).unwrap();
        assert_eq!(exact.to_string(), "2024-03-05 08:30:00");

        let month_day = parse_date_bound_in_year("03/05", Bound::Start, 2023).unwrap();
        assert_eq!(month_day.to_string(), "2023-03-05 00:00:00");

        assert!(parse_date_bound_in_year("yesterday", Bound::Start, 2023).is_err());
    }
}
