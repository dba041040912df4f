use crate::error::{OverseerError, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// Default timestamp format for captured output lines
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Moment-style tokens understood in `log_date_format`, longest first
const MOMENT_TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("SSS", "%3f"),
    ("YY", "%y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("hh", "%I"),
    ("mm", "%M"),
    ("ss", "%S"),
    ("ZZ", "%z"),
    ("Z", "%:z"),
    ("A", "%p"),
];

/// Timestamp format applied to every captured line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    strftime: String,
}

impl DateFormat {
    /// Parse a format in either strftime (`%Y-%m-%d`) or moment (`YYYY-MM-DD`) syntax
    pub fn parse(input: &str) -> Result<Self> {
        let strftime = if input.contains('%') {
            input.to_string()
        } else {
            translate_moment(input)
        };

        if StrftimeItems::new(&strftime).any(|item| matches!(item, Item::Error)) {
            return Err(OverseerError::ConfigValidationError(format!(
                "Invalid log_date_format: {}",
                input
            )));
        }

        Ok(Self { strftime })
    }

    /// The equivalent strftime pattern
    pub fn as_strftime(&self) -> &str {
        &self.strftime
    }

    pub fn render<Tz>(&self, timestamp: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        timestamp.format(&self.strftime).to_string()
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        Self {
            strftime: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

fn translate_moment(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 2);
    let mut rest = input;

    'scan: while !rest.is_empty() {
        // `[text]` is copied verbatim
        if let Some(body) = rest.strip_prefix('[') {
            if let Some(end) = body.find(']') {
                out.push_str(&body[..end].replace('%', "%%"));
                rest = &body[end + 1..];
                continue;
            }
        }

        for (token, replacement) in MOMENT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = tail;
                continue 'scan;
            }
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    out
}
