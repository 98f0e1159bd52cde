//! Pure field mappings between request vocabulary and work-tracker fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority used when an urgency value is not recognised.
pub const DEFAULT_PRIORITY: u8 = 3;

/// Urgency of a content request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub const ALL: [Urgency; 4] = [
        Urgency::Low,
        Urgency::Medium,
        Urgency::High,
        Urgency::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "Low",
            Urgency::Medium => "Medium",
            Urgency::High => "High",
            Urgency::Critical => "Critical",
        }
    }

    /// Work item priority (1 = highest).
    pub fn priority(&self) -> u8 {
        match self {
            Urgency::Critical => 1,
            Urgency::High => 2,
            Urgency::Medium => 3,
            Urgency::Low => 4,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Urgency::ALL
            .into_iter()
            .find(|u| u.as_str() == s)
            .ok_or_else(|| format!("urgency must be one of Low, Medium, High, Critical; got '{}'", s))
    }
}

/// Priority for a raw urgency string; unmapped values get [`DEFAULT_PRIORITY`].
pub fn priority_from_urgency(urgency: &str) -> u8 {
    urgency
        .parse::<Urgency>()
        .map(|u| u.priority())
        .unwrap_or(DEFAULT_PRIORITY)
}

/// Display bucket a work item state falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBucket {
    New,
    Committed,
    Active,
    InReview,
    Closed,
}

impl StateBucket {
    pub const ALL: [StateBucket; 5] = [
        StateBucket::New,
        StateBucket::Committed,
        StateBucket::Active,
        StateBucket::InReview,
        StateBucket::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateBucket::New => "new",
            StateBucket::Committed => "committed",
            StateBucket::Active => "active",
            StateBucket::InReview => "in_review",
            StateBucket::Closed => "closed",
        }
    }
}

/// Bucket for a work item state. States outside every bucket return `None`.
pub fn bucket_for_state(state: &str) -> Option<StateBucket> {
    match state {
        "New" => Some(StateBucket::New),
        "Committed" => Some(StateBucket::Committed),
        "Active" | "In Progress" => Some(StateBucket::Active),
        "Resolved" | "In Review" | "Under Review" => Some(StateBucket::InReview),
        "Completed" | "Done" | "Closed" => Some(StateBucket::Closed),
        _ => None,
    }
}

/// Status filter accepted by the work item listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Bucket(StateBucket),
}

impl StatusFilter {
    /// Whether an item in `state` passes the filter.
    pub fn matches(&self, state: &str) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Bucket(bucket) => bucket_for_state(state) == Some(*bucket),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "all" {
            return Ok(StatusFilter::All);
        }
        StateBucket::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .map(StatusFilter::Bucket)
            .ok_or_else(|| {
                format!(
                    "status must be one of new, committed, active, in_review, closed, all; got '{}'",
                    s
                )
            })
    }
}
