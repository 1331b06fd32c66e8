//! Front-matter parsing and serialization

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::Value;
use std::fmt::Write as _;

use super::error::ParseError;
use super::ContentKind;

/// Ordered front-matter mapping, kept verbatim for rewrites
pub type Metadata = IndexMap<String, Value>;

lazy_static! {
    /// YAML 1.1 timestamp shape; such values are written back date-only
    static ref TIMESTAMP: Regex = Regex::new(
        r"^(\d{4}-\d{1,2}-\d{1,2})(?:(?:[Tt]|[ \t]+)\d{1,2}:\d{2}(?::\d{2})?(?:\.\d*)?(?:[ \t]*(?:Z|[+-]\d{1,2}(?::?\d{2})?))?)?$"
    )
    .unwrap();
    static ref PLAIN_KEY: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

/// Front-matter block of a content file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    pub metadata: Metadata,
}

impl FrontMatter {
    /// Parse front-matter from content string
    /// Returns (front_matter, remaining_content)
    ///
    /// Text that does not open with a `---` line has no front matter and is
    /// returned whole as the body.
    pub fn parse(content: &str) -> Result<(Self, &str), ParseError> {
        let content = content.trim_start_matches('\u{feff}');

        let Some(rest) = content
            .strip_prefix("---\r\n")
            .or_else(|| content.strip_prefix("---\n"))
        else {
            return Ok((FrontMatter::default(), content));
        };

        let Some((yaml_end, body_start)) = find_closing_delimiter(rest) else {
            // No closing ---, treat as no front-matter
            return Ok((FrontMatter::default(), content));
        };

        let yaml_content = &rest[..yaml_end];
        let remaining = rest[body_start..].trim_start_matches(['\n', '\r']);

        if yaml_content.trim().is_empty() {
            return Ok((FrontMatter::default(), remaining));
        }

        let metadata = match serde_yaml::from_str::<Value>(yaml_content)? {
            Value::Mapping(mapping) => {
                let mut metadata = Metadata::with_capacity(mapping.len());
                for (key, value) in mapping {
                    metadata.insert(key_to_string(key)?, value);
                }
                metadata
            }
            // A block holding only comments
            Value::Null => Metadata::new(),
            _ => return Err(ParseError::NotAMapping),
        };

        Ok((FrontMatter { metadata }, remaining))
    }

    /// Non-empty `title`
    pub fn title(&self) -> Option<&str> {
        self.str_field("title").filter(|t| !t.trim().is_empty())
    }

    /// Raw `type` value as written
    pub fn raw_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    /// Content kind named by `type`, if it is a known one
    pub fn kind(&self) -> Option<ContentKind> {
        self.raw_type().and_then(|t| t.parse().ok())
    }

    /// `order`, accepting integers, floats and numeric strings
    pub fn order(&self) -> Option<i64> {
        match self.metadata.get("order")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// `published`, true unless explicitly switched off
    pub fn published(&self) -> bool {
        match self.metadata.get("published") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.trim().eq_ignore_ascii_case("false"),
            _ => true,
        }
    }

    /// Parse the date string into a DateTime
    pub fn parse_date(&self) -> Option<DateTime<Local>> {
        self.str_field("date").and_then(parse_date_string)
    }

    /// Set `order`, keeping the key's position if it already exists
    pub fn set_order(&mut self, order: i64) {
        self.metadata
            .insert("order".to_string(), Value::Number(order.into()));
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Serialize back into a delimited block, ending with a newline
    ///
    /// Strings are double quoted, timestamps are reduced to their date, and
    /// nested values fall back to block YAML.
    pub fn to_block(&self) -> String {
        let mut out = String::from("---\n");
        for (key, value) in &self.metadata {
            write_entry(&mut out, key, value);
        }
        out.push_str("---\n");
        out
    }
}

/// Locate the closing `---` line; returns (yaml_end, body_start)
fn find_closing_delimiter(rest: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == "---" {
            return Some((offset, offset + line.len()));
        }
        offset += line.len();
    }
    None
}

fn key_to_string(key: Value) -> Result<String, ParseError> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ParseError::NotAMapping),
    }
}

fn write_entry(out: &mut String, key: &str, value: &Value) {
    let key = if is_plain_key(key) {
        key.to_string()
    } else {
        quote(key)
    };

    match value {
        Value::String(s) => match date_only(s) {
            Some(date) => {
                let _ = writeln!(out, "{}: {}", key, date);
            }
            None => {
                let _ = writeln!(out, "{}: {}", key, quote(s));
            }
        },
        Value::Number(n) => {
            let _ = writeln!(out, "{}: {}", key, n);
        }
        Value::Bool(b) => {
            let _ = writeln!(out, "{}: {}", key, b);
        }
        Value::Null => {
            let _ = writeln!(out, "{}:", key);
        }
        nested => {
            let yaml = serde_yaml::to_string(nested).unwrap_or_default();
            let _ = writeln!(out, "{}:", key);
            for line in yaml.lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
    }
}

/// Whether `key` reads back as the same string when written unquoted
///
/// Rules out keys YAML resolves to other types, like `null`, `0x1F` or `1e3`.
fn is_plain_key(key: &str) -> bool {
    PLAIN_KEY.is_match(key)
        && matches!(serde_yaml::from_str::<Value>(key), Ok(Value::String(s)) if s == key)
}

/// YAML double-quoted scalar
fn quote(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t");
    format!("\"{}\"", escaped)
}

fn date_only(s: &str) -> Option<String> {
    let caps = TIMESTAMP.captures(s.trim())?;
    let date = NaiveDate::parse_from_str(caps.get(1)?.as_str(), "%Y-%m-%d").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Parse a date string in various formats
pub fn parse_date_string(s: &str) -> Option<DateTime<Local>> {
    let s = s.trim();

    // RFC 3339 / ISO 8601 with an explicit offset
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local));
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for fmt in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Local.from_local_datetime(&dt).earliest();
        }
    }

    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            let dt = d.and_hms_opt(0, 0, 0)?;
            return Local.from_local_datetime(&dt).earliest();
        }
    }

    None
}
