use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire value of the pseudo-segment that bypasses filtering.
pub const ALL_SEGMENT: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque pointer to an uploaded attachment. The client never moves the
/// bytes itself; the locator is handed to whatever views it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub kind: String,
    pub locator: String,
}

/// One message as the remote store reports it. Timestamps are the only
/// source of chronological order; `reply_to` may dangle or even cycle in
/// malformed data and the thread builder has to survive that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub segment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
    #[serde(default)]
    pub readers: Vec<String>,
}

/// Which messages a snapshot request should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SegmentFilter {
    All,
    Only(String),
}

impl SegmentFilter {
    pub fn matches(&self, segment: &str) -> bool {
        match self {
            SegmentFilter::All => true,
            SegmentFilter::Only(name) => name == segment,
        }
    }

    pub fn wire_value(&self) -> &str {
        match self {
            SegmentFilter::All => ALL_SEGMENT,
            SegmentFilter::Only(name) => name,
        }
    }
}

impl Default for SegmentFilter {
    fn default() -> Self {
        SegmentFilter::All
    }
}

impl From<String> for SegmentFilter {
    fn from(value: String) -> Self {
        if value == ALL_SEGMENT {
            SegmentFilter::All
        } else {
            SegmentFilter::Only(value)
        }
    }
}

impl From<SegmentFilter> for String {
    fn from(value: SegmentFilter) -> Self {
        value.wire_value().to_string()
    }
}

impl fmt::Display for SegmentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub name: String,
    pub is_protected: bool,
}

/// First `max_chars` characters of `text` with an ellipsis when truncated.
/// Counts characters, not bytes, so multibyte text never splits mid-char.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_end, _)) => format!("{}...", &text[..byte_end]),
        None => text.to_string(),
    }
}
