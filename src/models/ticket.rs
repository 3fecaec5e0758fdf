// src/models/ticket.rs

//! Ticket data structures as returned by the tracker search endpoint.
//!
//! Field names follow the tracker's JSON encoding so a search response
//! decodes directly into [`Ticket`]. Analysis results live in
//! [`Derived`] and are persisted alongside the raw record.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// Tickets with a priority id at or below this rank are "high priority".
pub const HIGH_PRIORITY_MAX_RANK: u32 = 4;

/// A single issue-tracker record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    /// Unique ticket key (e.g. "KAFKA-1234"); primary index of the store
    pub key: String,

    #[serde(default)]
    pub fields: Fields,

    #[serde(default)]
    pub changelog: Changelog,

    /// Values computed locally by analysis and enrichment
    #[serde(default)]
    pub derived: Derived,
}

impl Ticket {
    /// Create an empty ticket with the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Whether the ticket's priority rank counts as high priority.
    pub fn is_high_priority(&self) -> bool {
        self.fields
            .priority
            .as_ref()
            .and_then(|p| p.id.parse::<u32>().ok())
            .is_some_and(|rank| rank <= HIGH_PRIORITY_MAX_RANK)
    }

    /// Summary and description joined by a newline.
    pub fn summary_and_description(&self) -> String {
        match self.fields.description.as_deref() {
            Some(description) if !description.is_empty() => {
                format!("{}\n{}", self.fields.summary, description)
            }
            _ => self.fields.summary.clone(),
        }
    }

    /// All comment bodies in order, one per line.
    pub fn concatenated_comments(&self) -> String {
        self.fields
            .comments
            .comments
            .iter()
            .map(|c| c.body.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Score recorded by the named scorer, if any.
    pub fn score(&self, scorer: &str) -> Option<f64> {
        self.derived.scores.get(scorer).copied()
    }

    /// Whether the named scorer already left a non-zero score.
    pub fn has_score(&self, scorer: &str) -> bool {
        self.score(scorer).is_some_and(|s| s != 0.0)
    }

    /// Record a score for the named scorer, replacing any previous one.
    pub fn set_score(&mut self, scorer: &str, score: f64) {
        self.derived.scores.insert(scorer.to_string(), score);
    }
}

/// The tracker fields requested for every ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Fields {
    #[serde(default, deserialize_with = "null_default")]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, with = "tracker_time")]
    pub created: Option<DateTime<FixedOffset>>,

    #[serde(default, with = "tracker_time")]
    pub duedate: Option<DateTime<FixedOffset>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timespent: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeestimate: Option<i64>,

    #[serde(
        rename = "attachment",
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachments: Vec<Attachment>,

    #[serde(rename = "comment", default, deserialize_with = "null_default")]
    pub comments: Comments,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuetype: Option<IssueType>,
}

/// Wrapper object the tracker uses for the comment field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Comments {
    #[serde(default, deserialize_with = "null_default")]
    pub comments: Vec<Comment>,
}

/// A free-text comment on a ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    #[serde(default)]
    pub id: String,

    #[serde(default, deserialize_with = "null_default")]
    pub body: String,

    #[serde(default, deserialize_with = "null_default")]
    pub author: Author,

    #[serde(default, with = "tracker_time")]
    pub created: Option<DateTime<FixedOffset>>,

    #[serde(default, with = "tracker_time")]
    pub updated: Option<DateTime<FixedOffset>>,
}

/// A tracker user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,

    #[serde(default, rename = "emailAddress", deserialize_with = "null_default")]
    pub email: String,

    #[serde(default, deserialize_with = "null_default")]
    pub display_name: String,

    #[serde(default)]
    pub active: bool,

    #[serde(default, deserialize_with = "null_default")]
    pub time_zone: String,
}

/// A file attached to a ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub id: String,

    #[serde(default, deserialize_with = "null_default")]
    pub author: Author,

    #[serde(default, deserialize_with = "null_default")]
    pub filename: String,

    #[serde(default, with = "tracker_time")]
    pub created: Option<DateTime<FixedOffset>>,

    #[serde(default)]
    pub size: u64,

    #[serde(default, deserialize_with = "null_default")]
    pub mime_type: String,

    /// Download URL of the attachment
    #[serde(default, deserialize_with = "null_default")]
    pub content: String,

    /// Category derived from the file extension during analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<AttachmentCategory>,
}

/// Coarse attachment category derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentCategory {
    Image,
    Video,
    Code,
    Spreadsheet,
    Text,
    Config,
    Archive,
    Other,
}

impl AttachmentCategory {
    /// Classify an attachment by its file extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Self {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return Self::Other;
        };

        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" => Self::Image,
            "mp4" | "avi" | "mkv" | "mov" | "webm" => Self::Video,
            "java" | "scala" | "go" | "py" | "rs" | "c" | "cpp" | "h" | "js" | "groovy"
            | "sh" | "patch" | "diff" => Self::Code,
            "csv" | "xls" | "xlsx" | "numbers" | "ods" => Self::Spreadsheet,
            "txt" | "md" | "org" | "log" | "pdf" | "rtf" => Self::Text,
            "json" | "xml" | "yaml" | "yml" | "properties" | "conf" | "toml" | "ini" => {
                Self::Config
            }
            "zip" | "tar" | "gz" | "tgz" | "rar" | "7z" | "jar" => Self::Archive,
            _ => Self::Other,
        }
    }
}

/// Ranked priority assigned to a ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Priority {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,
}

/// Workflow status of a ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Status {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
}

/// Ticket type (bug, task, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IssueType {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
}

/// Ordered history of field transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Changelog {
    #[serde(default)]
    pub start_at: usize,

    #[serde(default)]
    pub max_results: usize,

    #[serde(default)]
    pub total: usize,

    #[serde(default, deserialize_with = "null_default")]
    pub histories: Vec<ChangelogHistory>,
}

/// One edit event, possibly touching several fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangelogHistory {
    #[serde(default)]
    pub id: String,

    #[serde(default, deserialize_with = "null_default")]
    pub author: Author,

    #[serde(default, with = "tracker_time")]
    pub created: Option<DateTime<FixedOffset>>,

    #[serde(default, deserialize_with = "null_default")]
    pub items: Vec<ChangelogItem>,
}

/// A single field transition inside a changelog history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangelogItem {
    #[serde(default)]
    pub field: String,

    #[serde(default)]
    pub fieldtype: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(rename = "fromString", default, skip_serializing_if = "Option::is_none")]
    pub from_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(rename = "toString", default, skip_serializing_if = "Option::is_none")]
    pub to_label: Option<String>,
}

/// Values computed by the analysis and enrichment passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Derived {
    /// Hours from creation until the ticket was first closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_close: Option<f64>,

    #[serde(default)]
    pub summary_desc_word_count: usize,

    #[serde(default)]
    pub comment_word_count: usize,

    #[serde(default)]
    pub has_stack_trace: bool,

    #[serde(default)]
    pub has_steps_to_reproduce: bool,

    #[serde(default)]
    pub has_attachments: bool,

    /// Scores keyed by scorer name
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

/// Treat an explicit JSON `null` like a missing field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Serde adapter for the tracker's timestamp format.
///
/// Accepts `2017-03-01T10:00:00.000+0000` and bare dates (`2017-03-01`,
/// read as midnight UTC). `null` and empty strings decode to `None`.
pub mod tracker_time {
    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";
    const DATE_FORMAT: &str = "%Y-%m-%d";

    /// Parse a tracker timestamp.
    pub fn parse(s: &str) -> Option<DateTime<FixedOffset>> {
        if let Ok(ts) = DateTime::parse_from_str(s, FORMAT) {
            return Some(ts);
        }
        let date = NaiveDate::parse_from_str(s, DATE_FORMAT).ok()?;
        let utc = FixedOffset::east_opt(0)?;
        utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
    }

    pub fn serialize<S>(value: &Option<DateTime<FixedOffset>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse(s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("could not parse time '{s}'"))),
        }
    }
}
