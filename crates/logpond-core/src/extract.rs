//! Field extraction: turns a [`RawEvent`] into an [`Event`].
//!
//! Extraction is driven by an ordered list of [`ExtractionRule`]s. Each rule
//! is a regex whose capture-group shape is resolved once, when the rule is
//! compiled:
//!
//! - one named group: the group name is the field name and the captured text
//!   is the value, e.g. `^(?P<_time>\S+ \S+)`
//! - two unnamed groups: the first capture is the field name and the second
//!   is the value, e.g. `(\w+)=(\w+)`
//!
//! Every rule is matched against the whole raw text, once per non-overlapping
//! match. Rules run in configured order and a later value for the same field
//! name replaces an earlier one, so override rules belong after the defaults.
//!
//! Extraction never fails: a rule that does not match contributes nothing,
//! and a `_time` value that does not fit the layout leaves the event stamped
//! with its read time.

use regex::Regex;

use crate::error::{ConfigError, Result};
use crate::time_layout::TimeLayout;
use crate::types::{Event, Fields, RawEvent, TIME_FIELD};

/// Extraction rules used when none are configured.
pub const DEFAULT_RULES: &[&str] = &[
    r"(\w+)=(\w+)",
    r"^(?P<_time>\d\d\d\d/\d\d/\d\d \d\d:\d\d:\d\d(?:\.\d+)?)",
];

/// A compiled field extraction rule with its shape already resolved.
#[derive(Debug, Clone)]
pub enum ExtractionRule {
    /// Single named capture group; the group name is the field name.
    NamedGroup { name: String, regex: Regex },
    /// Two unnamed capture groups: field name, then value.
    TwoGroup { regex: Regex },
}

impl ExtractionRule {
    /// Compile `pattern` and classify its capture groups.
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::Regex {
            pattern: pattern.to_string(),
            source,
        })?;

        let names: Vec<Option<String>> = regex
            .capture_names()
            .skip(1)
            .map(|name| name.map(str::to_string))
            .collect();
        match names.as_slice() {
            [Some(name)] => Ok(Self::NamedGroup {
                name: name.clone(),
                regex,
            }),
            [None, None] => Ok(Self::TwoGroup { regex }),
            _ => Err(ConfigError::RuleShape {
                pattern: pattern.to_string(),
                groups: names.len(),
            }),
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Self::NamedGroup { regex, .. } | Self::TwoGroup { regex } => regex.as_str(),
        }
    }

    /// Insert every field this rule produces for `text` into `fields`,
    /// replacing existing values of the same name.
    fn apply(&self, text: &str, fields: &mut Fields) {
        match self {
            Self::NamedGroup { name, regex } => {
                for caps in regex.captures_iter(text) {
                    if let Some(value) = caps.get(1) {
                        fields.insert(name.clone(), value.as_str().to_string());
                    }
                }
            }
            Self::TwoGroup { regex } => {
                for caps in regex.captures_iter(text) {
                    let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) else {
                        continue;
                    };
                    if name.as_str().is_empty() {
                        continue;
                    }
                    fields.insert(name.as_str().to_string(), value.as_str().to_string());
                }
            }
        }
    }
}

/// Stateless extractor applying an ordered rule list.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    rules: Vec<ExtractionRule>,
}

impl FieldExtractor {
    pub fn new(rules: Vec<ExtractionRule>) -> Self {
        Self { rules }
    }

    /// Compile every pattern in order. The first invalid pattern is reported.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|p| ExtractionRule::compile(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// Extractor built from [`DEFAULT_RULES`].
    pub fn defaults() -> Self {
        Self::from_patterns(DEFAULT_RULES).expect("built-in extraction rules must compile")
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    /// Apply all rules to `text`; later rules win on duplicate names.
    pub fn extract_fields(&self, text: &str) -> Fields {
        let mut fields = Fields::new();
        for rule in &self.rules {
            rule.apply(text, &mut fields);
        }
        fields
    }

    /// Enrich a raw event with its fields and resolved timestamp.
    pub fn extract(&self, raw: RawEvent, layout: &TimeLayout) -> Event {
        let fields = self.extract_fields(&raw.raw);
        let timestamp = match fields.get(TIME_FIELD) {
            Some(value) => layout.parse_at(value, raw.read_at).unwrap_or_else(|| {
                tracing::trace!(value = %value, layout = %layout, "unparseable _time, using read time");
                raw.read_at
            }),
            None => raw.read_at,
        };
        Event {
            raw: raw.raw,
            source: raw.source,
            timestamp,
            fields,
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::defaults()
    }
}
