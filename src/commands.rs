//! Chat command handling — turns incoming Telegram messages into service
//! calls and replies.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use festa_channels::{ChatEvent, IncomingMessage};
use festa_core::error::FestaError;
use festa_core::types::{DateRecord, Destination, NamedRecord, RecordKind, SubscriptionKind};
use festa_scheduler::{JsonRecordStore, ReminderService, ReplyDeleteOutcome, sort_for_listing};

const UPCOMING_LIMIT: usize = 10;
const STATUS_TOP_SENDERS: usize = 5;

const HELP: &str = "🤖 Festa — birthday & anniversary reminders

/add Name DD.MM[.YYYY] — add a birthday
/remove Name — remove a birthday
/list — all birthdays
/today — today's birthdays
/upcoming — next birthdays

/add_wedding Names DD.MM.YYYY — add a wedding date
/remove_wedding Names — remove a wedding
/weddings — all weddings
/today_weddings — today's anniversaries
/upcoming_weddings — next anniversaries

/enable_notifications, /disable_notifications — daily congratulations
/enable_alarm, /disable_alarm, /alarm_status — chat tracking
/delete_bot [N] — delete the bot's last N messages (admin)
Reply /delete to a bot message — delete it (admin)
/chat_id — show this chat's id";

/// A parsed `/command arg arg...`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Command<'a> {
    name: String,
    args: Vec<&'a str>,
}

fn parse_command(text: &str) -> Option<Command<'_>> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    // "/list@festa_bot" → "list"
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some(Command {
        name,
        args: parts.collect(),
    })
}

/// Split `Some Label DD.MM[.YYYY]` into label and date.
fn parse_label_and_date(args: &[&str]) -> Result<(String, DateRecord), String> {
    let Some((date, label)) = args.split_last() else {
        return Err("missing arguments".into());
    };
    let label = label.join(" ").trim_matches('"').trim().to_string();
    if label.is_empty() {
        return Err("missing name".into());
    }
    let date = DateRecord::parse(date).map_err(|e| e.to_string())?;
    Ok((label, date))
}

fn kind_noun(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Birthday => "birthday",
        RecordKind::Wedding => "wedding",
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "✅ ON" } else { "❌ OFF" }
}

#[derive(Clone)]
pub struct CommandRouter {
    service: Arc<ReminderService>,
    store: Arc<JsonRecordStore>,
    bot_id: i64,
}

impl CommandRouter {
    pub fn new(service: Arc<ReminderService>, store: Arc<JsonRecordStore>, bot_id: i64) -> Self {
        Self {
            service,
            store,
            bot_id,
        }
    }

    /// Route one chat event to the service.
    pub async fn dispatch(&self, event: ChatEvent) {
        match event {
            ChatEvent::Message(msg) => {
                self.service.on_message(msg.chat, &msg.tracked()).await;
                self.handle(msg).await;
            }
            ChatEvent::Edited(msg) => {
                self.service.on_edited(msg.chat, &msg.tracked()).await;
            }
            ChatEvent::Member { chat, change } => {
                self.service.on_member_change(chat, &change).await;
            }
        }
    }

    /// Handle one message and send the reply, if any.
    pub async fn handle(&self, msg: IncomingMessage) {
        let today = self.service.schedule().local_date(Utc::now());
        if let Some(reply) = self.respond(&msg, today).await {
            // Failures are logged (and permanent ones deregister) inside send_tracked.
            let _ = self.service.send_tracked(msg.chat, &reply).await;
        }
    }

    /// Execute a message and return the reply text.
    pub async fn respond(&self, msg: &IncomingMessage, today: NaiveDate) -> Option<String> {
        let command = parse_command(&msg.text)?;
        let chat = msg.chat;
        tracing::debug!("📨 {chat}: /{} from {}", command.name, msg.sender.user_id);

        let reply = match command.name.as_str() {
            "start" => {
                self.service.on_opt_in(chat, SubscriptionKind::Notifications).await;
                format!(
                    "👋 Hi! I'll congratulate this chat every day at {:02}:{:02}.\n\n{HELP}",
                    self.service.schedule().hour,
                    self.service.schedule().minute
                )
            }
            "help" => HELP.to_string(),
            "chat_id" => format!("🆔 Chat id: {chat}"),
            "enable_notifications" => {
                self.service.on_opt_in(chat, SubscriptionKind::Notifications).await;
                format!(
                    "🔔 Notifications enabled! Congratulations arrive daily at {:02}:{:02}.",
                    self.service.schedule().hour,
                    self.service.schedule().minute
                )
            }
            "disable_notifications" => {
                self.service.on_opt_out(chat, SubscriptionKind::Notifications).await;
                "🔕 Notifications disabled for this chat.".to_string()
            }
            "enable_alarm" => {
                self.service.on_opt_in(chat, SubscriptionKind::Tracking).await;
                "🛡️ Tracking enabled for this chat. See /alarm_status.".to_string()
            }
            "disable_alarm" => {
                self.service.on_opt_out(chat, SubscriptionKind::Tracking).await;
                "🛡️ Tracking disabled for this chat.".to_string()
            }
            "alarm_status" => self.status(chat).await,
            "add" => self.add(chat, RecordKind::Birthday, &command.args).await,
            "add_wedding" => self.add(chat, RecordKind::Wedding, &command.args).await,
            "remove" => self.remove(chat, RecordKind::Birthday, &command.args).await,
            "remove_wedding" => self.remove(chat, RecordKind::Wedding, &command.args).await,
            "list" => self.list(chat, RecordKind::Birthday).await,
            "weddings" => self.list(chat, RecordKind::Wedding).await,
            "today" => self.today(chat, RecordKind::Birthday, today).await,
            "today_weddings" => self.today(chat, RecordKind::Wedding, today).await,
            "upcoming" => self.upcoming(chat, RecordKind::Birthday, today).await,
            "upcoming_weddings" => self.upcoming(chat, RecordKind::Wedding, today).await,
            "delete_bot" => self.delete_bot(msg, &command.args).await,
            "delete" => return self.delete_by_reply(msg).await,
            _ => return None,
        };
        Some(reply)
    }

    async fn status(&self, chat: Destination) -> String {
        let subscription = self.service.registry().subscription(chat).await;
        let activity = self.service.activity().summary(chat, STATUS_TOP_SENDERS).await;
        let mut text = format!(
            "📊 Chat status\n\n🛡️ Tracking: {}\n🔔 Notifications: {}\n\
             📨 Messages logged: {}/{}\n🗂️ Bot messages cached: {}/{}",
            on_off(subscription.tracking_enabled),
            on_off(subscription.notifications_enabled),
            activity.total,
            self.service.activity().capacity(),
            self.service.cache().len(chat).await,
            self.service.cache().capacity()
        );
        if !activity.top_senders.is_empty() {
            text.push_str("\n\n👥 Most active:\n");
            for (sender, count) in &activity.top_senders {
                let share = *count as f64 * 100.0 / activity.total as f64;
                text.push_str(&format!("{sender}: {count} ({share:.1}%)\n"));
            }
        }
        text
    }

    async fn add(&self, chat: Destination, kind: RecordKind, args: &[&str]) -> String {
        let usage = match kind {
            RecordKind::Birthday => "Usage: /add Name DD.MM or /add Name DD.MM.YYYY",
            RecordKind::Wedding => "Usage: /add_wedding Names DD.MM.YYYY",
        };
        let (label, date) = match parse_label_and_date(args) {
            Ok(parsed) => parsed,
            Err(e) => return format!("❌ {e}\n{usage}"),
        };
        if kind == RecordKind::Wedding && !date.year.is_some_and(|y| y >= 1900) {
            return format!("❌ A wedding needs a year (1900 or later).\n{usage}");
        }

        match self.store.upsert(chat, kind, NamedRecord::new(label.clone(), date)).await {
            Ok(replaced) => {
                let verb = if replaced { "updated" } else { "added" };
                format!("✅ {} for {label} ({date}) {verb}!", capitalize(kind_noun(kind)))
            }
            Err(e) => {
                tracing::warn!("⚠️ {chat}: failed to save {kind}: {e}");
                "❌ Could not save, please try again later.".to_string()
            }
        }
    }

    async fn remove(&self, chat: Destination, kind: RecordKind, args: &[&str]) -> String {
        let label = args.join(" ").trim_matches('"').trim().to_string();
        if label.is_empty() {
            return "❌ Tell me whom to remove.".to_string();
        }
        match self.store.remove(chat, kind, &label).await {
            Ok(true) => format!("🗑️ {label} removed."),
            Ok(false) => format!("🤷 No {} for {label}.", kind_noun(kind)),
            Err(e) => {
                tracing::warn!("⚠️ {chat}: failed to remove {kind}: {e}");
                "❌ Could not remove, please try again later.".to_string()
            }
        }
    }

    async fn load(&self, chat: Destination, kind: RecordKind) -> Result<Vec<NamedRecord>, String> {
        self.store.records(chat, kind).await.map_err(|e| {
            tracing::warn!("⚠️ {chat}: failed to load {kind} records: {e}");
            "❌ Could not read the list, please try again later.".to_string()
        })
    }

    async fn list(&self, chat: Destination, kind: RecordKind) -> String {
        let mut records = match self.load(chat, kind).await {
            Ok(records) => records,
            Err(e) => return e,
        };
        if records.is_empty() {
            return format!("📝 No {}s yet!", kind_noun(kind));
        }
        sort_for_listing(&mut records);
        let mut text = match kind {
            RecordKind::Birthday => "🎂 Birthdays:\n\n".to_string(),
            RecordKind::Wedding => "💒 Weddings:\n\n".to_string(),
        };
        for record in records {
            text.push_str(&format!("• {} — {}\n", record.label, record.date));
        }
        text
    }

    async fn today(&self, chat: Destination, kind: RecordKind, today: NaiveDate) -> String {
        let records = match self.load(chat, kind).await {
            Ok(records) => records,
            Err(e) => return e,
        };
        let matches = self.service.fanout().matcher().matches_today(today, &records);
        if matches.is_empty() {
            return match kind {
                RecordKind::Birthday => "🎂 No birthdays today!".to_string(),
                RecordKind::Wedding => "💒 No anniversaries today!".to_string(),
            };
        }
        let mut text = match kind {
            RecordKind::Birthday => "🎉 Today's birthdays:\n\n".to_string(),
            RecordKind::Wedding => "💒 Today's anniversaries:\n\n".to_string(),
        };
        for record in matches {
            let line = self
                .service
                .fanout()
                .congratulation(kind, record, today.year())
                .await;
            text.push_str(&line);
            text.push_str("\n\n");
        }
        text
    }

    async fn upcoming(&self, chat: Destination, kind: RecordKind, today: NaiveDate) -> String {
        let records = match self.load(chat, kind).await {
            Ok(records) => records,
            Err(e) => return e,
        };
        let upcoming = self.service.fanout().matcher().upcoming(&records, today);
        if upcoming.is_empty() {
            return format!("📅 No upcoming {}s!", kind_noun(kind));
        }
        let mut text = match kind {
            RecordKind::Birthday => "📅 Upcoming birthdays:\n\n".to_string(),
            RecordKind::Wedding => "💒 Upcoming anniversaries:\n\n".to_string(),
        };
        for item in upcoming.iter().take(UPCOMING_LIMIT) {
            let when = match item.days_until {
                0 => "🎊 TODAY".to_string(),
                1 => "🔔 TOMORROW".to_string(),
                n => format!("📅 In {n} days"),
            };
            let years = match (kind, item.years) {
                (RecordKind::Birthday, Some(y)) => format!(" — turns {y}"),
                (RecordKind::Wedding, Some(y)) => format!(" — {y} years"),
                _ => String::new(),
            };
            text.push_str(&format!(
                "{when}: {}{years}\n   {}\n",
                item.record.label,
                item.date.format("%d.%m.%Y")
            ));
        }
        text
    }

    async fn delete_bot(&self, msg: &IncomingMessage, args: &[&str]) -> String {
        let count = match args.first() {
            Some(n) => match n.parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => return "❌ Usage: /delete_bot [N]".to_string(),
            },
            None => None,
        };
        match self.service.on_delete_command(msg.chat, count, &msg.sender).await {
            Ok(report) => {
                let mut text = format!("🗑️ Done!\n\n✅ Deleted: {}\n", report.succeeded);
                if report.already_gone > 0 {
                    text.push_str(&format!("👻 Already gone: {}\n", report.already_gone));
                }
                if report.failed > 0 {
                    text.push_str(&format!("❌ Failed: {}\n", report.failed));
                }
                text.push_str(&format!("📊 Still cached: {}", report.remaining));
                text
            }
            Err(FestaError::Unauthorized) => {
                "❌ You are not allowed to use this command.".to_string()
            }
            Err(e) => {
                tracing::warn!("⚠️ {}: /delete_bot failed: {e}", msg.chat);
                "❌ Something went wrong.".to_string()
            }
        }
    }

    /// `/delete` sent as a reply to a bot message.
    async fn delete_by_reply(&self, msg: &IncomingMessage) -> Option<String> {
        let replied = msg.reply_to.as_ref()?;
        if replied.author_id != Some(self.bot_id) {
            return None;
        }
        match self
            .service
            .on_reply_delete(msg.chat, replied.message_id, Some(msg.message_id), &msg.sender)
            .await
        {
            Ok(ReplyDeleteOutcome::Deleted)
            | Ok(ReplyDeleteOutcome::AlreadyGone)
            | Ok(ReplyDeleteOutcome::NotTracked) => None,
            Ok(ReplyDeleteOutcome::Failed(reason)) => {
                Some(format!("❌ Could not delete the message: {}", truncate(&reason, 100)))
            }
            Err(FestaError::Unauthorized) => {
                Some("❌ You are not allowed to use this command.".to_string())
            }
            Err(e) => {
                tracing::warn!("⚠️ {}: reply delete failed: {e}", msg.chat);
                None
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
