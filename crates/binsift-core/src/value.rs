//! Typed column values and SQL literal formatting
//!
//! Decoded binlog rows carry typed values; this module renders them as
//! MySQL literals for the materializer and as plain strings for partition
//! keys and export. Rendering never fails: a value that cannot be encoded
//! degrades to `NULL` or the empty-quoted form.

use serde::ser::{Serialize, Serializer};

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    SignedInt(i64),
    UnsignedInt(u64),
    Float(f32),
    Double(f64),
    Decimal(String),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    Time {
        hours: u8,
        minutes: u8,
        seconds: u8,
        microseconds: u32,
        negative: bool,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    },
    /// Unix timestamp with optional sub-second precision.
    Timestamp {
        secs: u32,
        micros: u32,
    },
    Year(u16),
    Json(serde_json::Value),
    Enum(u16),
    Set(u64),
    Bit(Vec<u8>),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Render as a MySQL literal, quoted and escaped as needed.
    pub fn sql_literal(&self) -> String {
        match self {
            ColumnValue::Null => "NULL".to_string(),
            ColumnValue::SignedInt(v) => v.to_string(),
            ColumnValue::UnsignedInt(v) => v.to_string(),
            ColumnValue::Float(v) => format_double(*v as f64),
            ColumnValue::Double(v) => format_double(*v),
            ColumnValue::Decimal(s) => s.clone(),
            ColumnValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            ColumnValue::Text(s) => format!("'{}'", escape_text(s)),
            ColumnValue::Bytes(b) => format_bytes(b),
            ColumnValue::Date { year, month, day } => {
                format!("'{:04}-{:02}-{:02}'", year, month, day)
            }
            ColumnValue::Time {
                hours,
                minutes,
                seconds,
                microseconds,
                negative,
            } => {
                let sign = if *negative { "-" } else { "" };
                if *microseconds > 0 {
                    format!(
                        "'{}{:02}:{:02}:{:02}.{:06}'",
                        sign, hours, minutes, seconds, microseconds
                    )
                } else {
                    format!("'{}{:02}:{:02}:{:02}'", sign, hours, minutes, seconds)
                }
            }
            ColumnValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                microsecond,
            } => {
                if *microsecond > 0 {
                    format!(
                        "'{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}'",
                        year, month, day, hour, minute, second, microsecond
                    )
                } else {
                    format!(
                        "'{:04}-{:02}-{:02} {:02}:{:02}:{:02}'",
                        year, month, day, hour, minute, second
                    )
                }
            }
            ColumnValue::Timestamp { secs, micros } => {
                use chrono::TimeZone;
                match chrono::Utc.timestamp_opt(*secs as i64, micros * 1000) {
                    chrono::LocalResult::Single(dt) => {
                        if *micros > 0 {
                            format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.6f"))
                        } else {
                            format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S"))
                        }
                    }
                    _ => "NULL".to_string(),
                }
            }
            ColumnValue::Year(y) => y.to_string(),
            ColumnValue::Json(v) => match serde_json::to_string(v) {
                Ok(s) => format!("'{}'", escape_text(&s)),
                Err(_) => "'{}'".to_string(),
            },
            ColumnValue::Enum(v) => v.to_string(),
            ColumnValue::Set(v) => v.to_string(),
            ColumnValue::Bit(b) => {
                let mut val: u64 = 0;
                for byte in b.iter().take(8) {
                    val = (val << 8) | (*byte as u64);
                }
                val.to_string()
            }
        }
    }

    /// Plain string form, used for partition keys and tabular export.
    /// Stable for a given value; no SQL quoting.
    pub fn plain_string(&self) -> String {
        match self {
            ColumnValue::Null => String::new(),
            ColumnValue::SignedInt(v) => v.to_string(),
            ColumnValue::UnsignedInt(v) => v.to_string(),
            ColumnValue::Float(v) => v.to_string(),
            ColumnValue::Double(v) => v.to_string(),
            ColumnValue::Decimal(s) => s.clone(),
            ColumnValue::Bool(v) => v.to_string(),
            ColumnValue::Text(s) => s.clone(),
            ColumnValue::Bytes(b) => hex_string(b),
            ColumnValue::Json(v) => serde_json::to_string(v).unwrap_or_default(),
            other => {
                // Quoted literals double as a readable plain form once the
                // surrounding quotes are stripped.
                let lit = other.sql_literal();
                lit.trim_matches('\'').to_string()
            }
        }
    }
}

impl std::fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.plain_string())
    }
}

impl Serialize for ColumnValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ColumnValue::Null => serializer.serialize_none(),
            ColumnValue::SignedInt(v) => serializer.serialize_i64(*v),
            ColumnValue::UnsignedInt(v) => serializer.serialize_u64(*v),
            ColumnValue::Float(v) => serializer.serialize_f32(*v),
            ColumnValue::Double(v) => serializer.serialize_f64(*v),
            ColumnValue::Bool(v) => serializer.serialize_bool(*v),
            ColumnValue::Year(v) => serializer.serialize_u16(*v),
            ColumnValue::Enum(v) => serializer.serialize_u16(*v),
            ColumnValue::Set(v) => serializer.serialize_u64(*v),
            ColumnValue::Json(v) => v.serialize(serializer),
            other => serializer.serialize_str(&other.plain_string()),
        }
    }
}

/// Quote an identifier with backticks; backticks inside are doubled.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Escape text for a single-quoted literal: backslashes are doubled first,
/// then single quotes are escaped with a preceding backslash.
pub fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Format a byte sequence per the binary rendering rules: UUID-ish 16-byte
/// blobs as canonical 8-4-4-4-12, short mostly-printable blobs as quoted
/// text, everything else as a hexadecimal literal.
fn format_bytes(data: &[u8]) -> String {
    if data.is_empty() {
        return "0x00".to_string();
    }

    if data.len() == 16 && looks_like_uuid(data) {
        return format!("'{}'", format_uuid(data));
    }

    if data.len() <= 36 {
        if let Ok(s) = std::str::from_utf8(data) {
            if is_mostly_printable(s) {
                return format!("'{}'", escape_text(s));
            }
        }
    }

    format!("0x{}", hex_string(data))
}

fn hex_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Heuristic: at least half the bytes printable or zero.
fn looks_like_uuid(data: &[u8]) -> bool {
    let plausible = data
        .iter()
        .filter(|&&b| (32..=126).contains(&b) || b == 0)
        .count();
    plausible > data.len() / 2
}

fn format_uuid(data: &[u8]) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        hex_string(&data[0..4]),
        hex_string(&data[4..6]),
        hex_string(&data[6..8]),
        hex_string(&data[8..10]),
        hex_string(&data[10..16]),
    )
}

/// At least 80% of the characters printable (tabs and newlines count).
fn is_mostly_printable(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let printable = s
        .chars()
        .filter(|&c| (' '..='~').contains(&c) || c == '\n' || c == '\r' || c == '\t')
        .count();
    printable as f64 / s.chars().count() as f64 >= 0.8
}

/// Format a double the way `%.10g` would: NaN and infinities become NULL,
/// integral values within i64 range use integer form, everything else keeps
/// at most 10 significant digits and always carries a `.` or an exponent.
fn format_double(v: f64) -> String {
    if v.is_nan() || v.is_infinite() {
        return "NULL".to_string();
    }

    if v == v.trunc() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        return (v as i64).to_string();
    }

    let mut s = format_sig10(v);
    if !s.contains('.') && !s.contains('e') && !s.contains('E') {
        s.push_str(".0");
    }
    s
}

/// 10 significant digits, fixed or scientific by the C `%g` exponent rule.
fn format_sig10(v: f64) -> String {
    let sci = format!("{:.9e}", v);
    let epos = sci.find('e').expect("scientific notation");
    let exp: i32 = sci[epos + 1..].parse().unwrap_or(0);

    if exp < -4 || exp >= 10 {
        let mantissa = trim_trailing_zeros(&sci[..epos]);
        format!("{}e{}", mantissa, exp)
    } else {
        let decimals = (9 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, v);
        trim_trailing_zeros(&fixed).to_string()
    }
}

fn trim_trailing_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
