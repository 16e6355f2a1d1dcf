//! Chat activity tracking ("alarm").
//!
//! For chats with tracking on, incoming messages are kept in a bounded
//! per-chat log, and edits and membership changes are announced in the chat.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use festa_core::config::TrackingConfig;
use festa_core::types::{Destination, MemberChange, MemberStatus, MessageId, TrackedMessage};
use tokio::sync::Mutex;

/// Characters of the new text shown in an edit alert.
const EDIT_PREVIEW_CHARS: usize = 50;

/// One logged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    pub message_id: MessageId,
    pub user_id: i64,
    /// `@username` or first name.
    pub sender: String,
    pub preview: String,
    pub sent_at: DateTime<Utc>,
}

/// What `/alarm_status` shows about a chat's log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivitySummary {
    pub total: usize,
    /// Most active senders, by message count, descending.
    pub top_senders: Vec<(String, usize)>,
}

/// Bounded per-chat log of incoming messages.
pub struct ActivityLog {
    capacity: usize,
    preview_chars: usize,
    chats: Mutex<HashMap<Destination, VecDeque<LoggedMessage>>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::from_config(&TrackingConfig::default())
    }
}

impl ActivityLog {
    pub fn new(capacity: usize, preview_chars: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            preview_chars,
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(config.log_capacity, config.preview_chars)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message, dropping the oldest beyond capacity.
    pub async fn record(&self, destination: Destination, message: &TrackedMessage) {
        let entry = LoggedMessage {
            message_id: message.message_id,
            user_id: message.sender.user_id,
            sender: message.sender.mention(&message.sender_name),
            preview: preview(&message.text, self.preview_chars),
            sent_at: message.sent_at,
        };
        let mut chats = self.chats.lock().await;
        let log = chats.entry(destination).or_default();
        log.push_back(entry);
        while log.len() > self.capacity {
            log.pop_front();
        }
    }

    pub async fn len(&self, destination: Destination) -> usize {
        self.chats
            .lock()
            .await
            .get(&destination)
            .map_or(0, VecDeque::len)
    }

    /// Logged messages, oldest first.
    pub async fn entries(&self, destination: Destination) -> Vec<LoggedMessage> {
        self.chats
            .lock()
            .await
            .get(&destination)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Message count plus the `top` most active senders.
    pub async fn summary(&self, destination: Destination, top: usize) -> ActivitySummary {
        let chats = self.chats.lock().await;
        let Some(log) = chats.get(&destination) else {
            return ActivitySummary::default();
        };

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in log {
            *counts.entry(entry.sender.as_str()).or_default() += 1;
        }
        let mut top_senders: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(sender, count)| (sender.to_string(), count))
            .collect();
        top_senders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_senders.truncate(top);

        ActivitySummary {
            total: log.len(),
            top_senders,
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Alert posted when a message in a tracked chat is edited.
pub fn edit_alert(message: &TrackedMessage, local_time: &str) -> String {
    let mut text = format!(
        "⚠️ Message edited\n\n👤 User: {}\n🕐 Time: {local_time}\n📄 Message id: {}",
        message.sender.mention(&message.sender_name),
        message.message_id
    );
    if !message.text.is_empty() {
        let shown = preview(&message.text, EDIT_PREVIEW_CHARS);
        let ellipsis = if message.text.chars().count() > EDIT_PREVIEW_CHARS { "..." } else { "" };
        text.push_str(&format!("\n💬 New text: {shown}{ellipsis}"));
    }
    text
}

/// Alert for a membership change, or `None` when nothing notable changed.
pub fn member_alert(change: &MemberChange, local_time: &str) -> Option<String> {
    if change.old_status == change.new_status {
        return None;
    }
    let action = match change.new_status {
        MemberStatus::Left => "left the chat 👋",
        MemberStatus::Kicked => "was removed from the chat ❌",
        MemberStatus::Member => "joined the chat ✅",
        MemberStatus::Administrator => "became an administrator 👑",
        MemberStatus::Creator => "became the chat owner 🏆",
        MemberStatus::Restricted => return None,
    };
    Some(format!(
        "🚨 Chat change\n\n👤 Member: {}\n📝 Action: {action}\n🕐 Time: {local_time}\n👥 User id: {}",
        change.user.mention(&change.user_name),
        change.user.user_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use festa_core::types::Principal;

    const CHAT: Destination = Destination(-7);

    fn message(id: i64, username: Option<&str>, name: &str, text: &str) -> TrackedMessage {
        TrackedMessage {
            message_id: MessageId(id),
            sender: Principal::new(id * 10, username),
            sender_name: name.to_string(),
            text: text.to_string(),
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn change(old: MemberStatus, new: MemberStatus) -> MemberChange {
        MemberChange {
            user: Principal::new(42, None),
            user_name: "Olga".into(),
            old_status: old,
            new_status: new,
        }
    }

    #[tokio::test]
    async fn test_log_is_bounded_per_chat() {
        let log = ActivityLog::new(3, 100);
        for id in 1..=5 {
            log.record(CHAT, &message(id, Some("ann"), "Ann", "hi")).await;
        }
        log.record(Destination(8), &message(9, None, "Bob", "yo")).await;

        let ids: Vec<i64> = log.entries(CHAT).await.iter().map(|e| e.message_id.0).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(log.len(Destination(8)).await, 1);
        assert_eq!(log.len(Destination(99)).await, 0);
    }

    #[tokio::test]
    async fn test_preview_is_truncated() {
        let log = ActivityLog::new(10, 4);
        log.record(CHAT, &message(1, None, "Ann", "привет мир")).await;
        assert_eq!(log.entries(CHAT).await[0].preview, "прив");
    }

    #[tokio::test]
    async fn test_summary_ranks_senders() {
        let log = ActivityLog::default();
        log.record(CHAT, &message(1, Some("ann"), "Ann", "a")).await;
        log.record(CHAT, &message(2, None, "Bob", "b")).await;
        log.record(CHAT, &message(3, Some("ann"), "Ann", "c")).await;

        let summary = log.summary(CHAT, 5).await;
        assert_eq!(summary.total, 3);
        assert_eq!(
            summary.top_senders,
            vec![("@ann".to_string(), 2), ("Bob".to_string(), 1)]
        );
        assert_eq!(log.summary(CHAT, 1).await.top_senders.len(), 1);
        assert_eq!(log.summary(Destination(1), 5).await, ActivitySummary::default());
    }

    #[test]
    fn test_edit_alert() {
        let long = "x".repeat(60);
        let alert = edit_alert(&message(5, Some("ann"), "Ann", &long), "12:00:00");
        assert!(alert.contains("@ann"));
        assert!(alert.contains("12:00:00"));
        assert!(alert.contains(&format!("{}...", "x".repeat(50))));

        let short = edit_alert(&message(5, None, "Ann", "ok"), "12:00:00");
        assert!(short.contains("New text: ok"));
        assert!(!short.contains("..."));
    }

    #[test]
    fn test_member_alert() {
        let joined =
            member_alert(&change(MemberStatus::Left, MemberStatus::Member), "08:15:00").unwrap();
        assert!(joined.contains("Olga"));
        assert!(joined.contains("joined the chat"));
        assert!(joined.contains("42"));

        assert!(member_alert(&change(MemberStatus::Member, MemberStatus::Member), "x").is_none());
        let restricted = change(MemberStatus::Member, MemberStatus::Restricted);
        assert!(member_alert(&restricted, "x").is_none());
    }
}
