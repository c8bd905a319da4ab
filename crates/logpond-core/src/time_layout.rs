//! Timestamp layouts for the `_time` field.
//!
//! Layouts are normally written as the reference date
//! `Mon Jan 2 15:04:05 MST 2006` laid out the way the log writes it, e.g.
//! `2006/01/02 15:04:05`. [`TimeLayout::parse_layout`] translates such a
//! layout into a chrono format string once, at configuration time. A layout
//! that already contains `%` is taken as a chrono format string verbatim.
//!
//! A seconds field that is not followed by an explicit fractional token
//! accepts an optional fractional part, so `15:04:05` matches both
//! `12:00:00` and `12:00:00.123456`.
//!
//! The `Z07:00` and `Z0700` offset tokens also accept a trailing `Z` for UTC.
//!
//! Layouts without a year (syslog's `Jan _2 15:04:05`) take the year from a
//! reference instant, normally the time the event was read. A result more
//! than a day after the reference is moved back one year, so December lines
//! read in January land in the right year.

use std::borrow::Cow;
use std::fmt;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::error::{ConfigError, Result};

/// Reference-layout tokens and their chrono equivalents. Longer tokens are
/// listed before their prefixes so the scan is greedy.
const TOKENS: &[(&str, Piece)] = &[
    ("January", Piece::Date("%B")),
    ("Monday", Piece::Date("%A")),
    ("Jan", Piece::Date("%b")),
    ("Mon", Piece::Date("%a")),
    ("MST", Piece::Zone("%Z")),
    ("2006", Piece::Year("%Y")),
    ("Z07:00", Piece::ZuluOffset("%:z", "+00:00")),
    ("-07:00", Piece::Offset("%:z")),
    ("Z0700", Piece::ZuluOffset("%z", "+0000")),
    ("-0700", Piece::Offset("%z")),
    (".000000000", Piece::Fraction("%.9f")),
    (".999999999", Piece::Fraction("%.f")),
    (".000000", Piece::Fraction("%.6f")),
    (".999999", Piece::Fraction("%.f")),
    (".000", Piece::Fraction("%.3f")),
    (".999", Piece::Fraction("%.f")),
    ("002", Piece::Date("%j")),
    ("_2", Piece::Date("%e")),
    ("15", Piece::Time("%H")),
    ("01", Piece::Date("%m")),
    ("02", Piece::Date("%d")),
    ("03", Piece::Time("%I")),
    ("04", Piece::Time("%M")),
    ("05", Piece::Second),
    ("06", Piece::Year("%y")),
    ("PM", Piece::Time("%p")),
    ("pm", Piece::Time("%p")),
    ("1", Piece::Date("%m")),
    ("2", Piece::Date("%d")),
    ("3", Piece::Time("%I")),
    ("4", Piece::Time("%M")),
    ("5", Piece::Second),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    Year(&'static str),
    Date(&'static str),
    Time(&'static str),
    Second,
    Fraction(&'static str),
    Offset(&'static str),
    /// An offset that may also be written as `Z`; carries the numeric form
    /// a `Z` is rewritten to.
    ZuluOffset(&'static str, &'static str),
    Zone(&'static str),
}

/// One scanned element of a reference layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Piece(Piece),
    Literal(char),
}

/// What kind of value a layout describes, which decides how it is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Carries a UTC offset.
    Zoned,
    /// Date and time without offset; interpreted as UTC.
    Naive,
    /// Date only; interpreted as midnight UTC.
    DateOnly,
}

/// What a layout contains, as found by scanning it.
#[derive(Debug, Default)]
struct Described {
    format: String,
    has_year: bool,
    has_date: bool,
    has_time: bool,
    has_offset: bool,
    zulu: Option<&'static str>,
}

/// A validated timestamp layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLayout {
    layout: String,
    format: String,
    shape: Shape,
    has_year: bool,
    zulu: Option<&'static str>,
}

impl TimeLayout {
    /// Validate `layout` and translate it into a chrono format string.
    pub fn parse_layout(layout: &str) -> Result<Self> {
        let described = if layout.contains('%') {
            describe_strftime(layout)
        } else {
            translate_reference(layout)
        };

        if StrftimeItems::new(&described.format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::TimeLayout {
                layout: layout.to_string(),
                reason: "not a valid chrono format".to_string(),
            });
        }
        if !described.has_date && !described.has_time {
            return Err(ConfigError::TimeLayout {
                layout: layout.to_string(),
                reason: "contains no date or time fields".to_string(),
            });
        }
        if !described.has_year && !described.has_date {
            return Err(ConfigError::TimeLayout {
                layout: layout.to_string(),
                reason: "contains a time but no date".to_string(),
            });
        }

        let shape = if described.has_offset {
            Shape::Zoned
        } else if described.has_time {
            Shape::Naive
        } else {
            Shape::DateOnly
        };

        Ok(Self {
            layout: layout.to_string(),
            format: described.format,
            shape,
            has_year: described.has_year,
            zulu: described.zulu,
        })
    }

    /// The chrono format string this layout was translated to.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Whether values carry their own year.
    pub fn has_year(&self) -> bool {
        self.has_year
    }

    /// Parse a timestamp, taking a missing year from the current time.
    pub fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        self.parse_at(value, Utc::now())
    }

    /// Parse a timestamp. A layout without a year takes it from `reference`.
    /// Returns `None` when `value` does not fit the layout.
    pub fn parse_at(&self, value: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let value = self.normalize_zulu(value.trim());
        if self.has_year {
            return self.parse_with(&value, &self.format);
        }

        let format = format!("%Y {}", self.format);
        let year = reference.year();
        let this_year = self.parse_with(&format!("{year} {value}"), &format);
        match this_year {
            Some(ts) if ts <= reference + TimeDelta::days(1) => Some(ts),
            _ => self
                .parse_with(&format!("{} {value}", year - 1), &format)
                .or(this_year),
        }
    }

    fn normalize_zulu<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match (self.zulu, value.strip_suffix('Z')) {
            (Some(utc), Some(head)) => Cow::Owned(format!("{head}{utc}")),
            _ => Cow::Borrowed(value),
        }
    }

    fn parse_with(&self, value: &str, format: &str) -> Option<DateTime<Utc>> {
        match self.shape {
            Shape::Zoned => DateTime::parse_from_str(value, format)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Shape::Naive => NaiveDateTime::parse_from_str(value, format)
                .ok()
                .map(|dt| dt.and_utc()),
            Shape::DateOnly => NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
        }
    }
}

impl fmt::Display for TimeLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.layout)
    }
}

fn translate_reference(layout: &str) -> Described {
    let mut tokens: Vec<Token> = Vec::new();
    let mut rest = layout;
    'scan: while let Some(c) = rest.chars().next() {
        for (text, piece) in TOKENS {
            if let Some(tail) = rest.strip_prefix(text) {
                tokens.push(Token::Piece(*piece));
                rest = tail;
                continue 'scan;
            }
        }
        tokens.push(Token::Literal(c));
        rest = &rest[c.len_utf8()..];
    }

    let mut out = Described {
        format: String::with_capacity(layout.len() * 2),
        ..Described::default()
    };
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Piece(Piece::Year(spec)) => {
                out.has_year = true;
                out.has_date = true;
                out.format.push_str(spec);
            }
            Token::Piece(Piece::Date(spec)) => {
                out.has_date = true;
                out.format.push_str(spec);
            }
            Token::Piece(Piece::Time(spec)) => {
                out.has_time = true;
                out.format.push_str(spec);
            }
            Token::Piece(Piece::Second) => {
                out.has_time = true;
                out.format.push_str("%S");
                if !matches!(tokens.get(i + 1), Some(Token::Piece(Piece::Fraction(_)))) {
                    out.format.push_str("%.f");
                }
            }
            Token::Piece(Piece::Fraction(spec)) | Token::Piece(Piece::Zone(spec)) => {
                out.format.push_str(spec)
            }
            Token::Piece(Piece::Offset(spec)) => {
                out.has_offset = true;
                out.format.push_str(spec);
            }
            Token::Piece(Piece::ZuluOffset(spec, utc)) => {
                out.has_offset = true;
                out.zulu = Some(utc);
                out.format.push_str(spec);
            }
            Token::Literal(c) => out.format.push(*c),
        }
    }
    out
}

fn describe_strftime(format: &str) -> Described {
    let has = |specs: &[&str]| specs.iter().any(|s| format.contains(s));
    let has_year = has(&["%Y", "%y", "%G", "%F", "%D", "%s", "%+", "%c"]);
    Described {
        format: format.to_string(),
        has_year,
        has_date: has_year || has(&["%m", "%d", "%e", "%b", "%B", "%h", "%j"]),
        has_time: has(&["%H", "%I", "%M", "%S", "%T", "%R", "%X", "%s", "%+", "%c"]),
        has_offset: has(&["%z", "%:z", "%#z", "%+"]),
        zulu: None,
    }
}
