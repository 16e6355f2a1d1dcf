//! Domain types: destinations, message ids, date records, principals.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FestaError, Result};

/// A chat the bot can send to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(pub i64);

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Destination {
    type Err = FestaError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Destination)
            .map_err(|_| FestaError::Parse(format!("Invalid chat id: '{s}'")))
    }
}

/// Identifier of a message inside a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Birthday,
    Wedding,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Birthday, RecordKind::Wedding];
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Birthday => write!(f, "birthday"),
            RecordKind::Wedding => write!(f, "wedding"),
        }
    }
}

/// Per-destination subscription flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    /// Daily congratulations.
    Notifications,
    /// Chat activity tracking ("alarm").
    Tracking,
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionKind::Notifications => write!(f, "notifications"),
            SubscriptionKind::Tracking => write!(f, "tracking"),
        }
    }
}

/// What to do with Feb 29 anchors in years that have no Feb 29.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeapDayPolicy {
    /// The occurrence only exists in leap years.
    #[default]
    Skip,
    /// Celebrate on Feb 28 in common years.
    Feb28,
    /// Celebrate on Mar 1 in common years.
    Mar1,
}

/// A recurring day/month anchor, optionally with the original year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRecord {
    pub day: u32,
    pub month: u32,
    #[serde(default)]
    pub year: Option<i32>,
}

impl DateRecord {
    /// Validated constructor. The day/month pair must exist in at least one
    /// year (Feb 29 is accepted on its own); with a year it must exist in
    /// that year.
    pub fn new(day: u32, month: u32, year: Option<i32>) -> Result<Self> {
        let invalid = || FestaError::InvalidDate { day, month };
        if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
            return Err(invalid());
        }
        // 2000 is a leap year, so every real day/month pair exists in it.
        NaiveDate::from_ymd_opt(2000, month, day).ok_or_else(invalid)?;
        if let Some(y) = year {
            NaiveDate::from_ymd_opt(y, month, day).ok_or_else(invalid)?;
        }
        Ok(Self { day, month, year })
    }

    /// Parse `DD.MM` or `DD.MM.YYYY`.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed =
            || FestaError::Parse(format!("Invalid date '{s}' (use DD.MM or DD.MM.YYYY)"));
        let day_month = |d: &str, m: &str| -> Result<(u32, u32)> {
            let day = d.parse::<u32>().map_err(|_| malformed())?;
            let month = m.parse::<u32>().map_err(|_| malformed())?;
            Ok((day, month))
        };
        match s.trim().split('.').collect::<Vec<_>>().as_slice() {
            [d, m] => {
                let (day, month) = day_month(d, m)?;
                Self::new(day, month, None)
            }
            [d, m, y] => {
                let (day, month) = day_month(d, m)?;
                let year = y.parse::<i32>().map_err(|_| malformed())?;
                Self::new(day, month, Some(year))
            }
            _ => Err(malformed()),
        }
    }

    pub fn is_leap_day(&self) -> bool {
        self.day == 29 && self.month == 2
    }
}

impl std::fmt::Display for DateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.year {
            Some(y) => write!(f, "{:02}.{:02}.{}", self.day, self.month, y),
            None => write!(f, "{:02}.{:02}", self.day, self.month),
        }
    }
}

/// A date record with its label (a person, or a couple's joint name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRecord {
    pub label: String,
    #[serde(flatten)]
    pub date: DateRecord,
}

impl NamedRecord {
    pub fn new(label: impl Into<String>, date: DateRecord) -> Self {
        Self {
            label: label.into(),
            date,
        }
    }
}

/// Whoever issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub username: Option<String>,
}

impl Principal {
    pub fn new(user_id: i64, username: Option<&str>) -> Self {
        Self {
            user_id,
            username: username.map(|u| u.to_string()),
        }
    }

    /// `@username`, or `fallback` for users without one.
    pub fn mention(&self, fallback: &str) -> String {
        match self.username.as_deref() {
            Some(u) if !u.is_empty() => format!("@{u}"),
            _ => fallback.to_string(),
        }
    }
}

/// A human message seen in a tracked chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMessage {
    pub message_id: MessageId,
    pub sender: Principal,
    /// First name, used when the sender has no username.
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Membership status of a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

/// A participant's membership status changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberChange {
    pub user: Principal,
    pub user_name: String,
    pub old_status: MemberStatus,
    pub new_status: MemberStatus,
}

/// Result of asking the platform to delete a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The message no longer exists on the remote side.
    NotFound,
    Failed(String),
}
