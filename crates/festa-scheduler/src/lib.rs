//! # Festa Scheduler
//!
//! Daily birthday/anniversary reminders with once-per-day firing and
//! self-healing destination tracking, plus a bounded cache of bot messages
//! that the admin can retract.
//!
//! ## Architecture
//! ```text
//! SchedulerLoop (tokio interval, every 30s)
//!   └── at HH:MM local, once per guard window
//!         └── NotificationFanout
//!               ├── ReminderRegistry.all_enabled(notifications)
//!               ├── RecordStore.load_records(chat, birthday|wedding)
//!               ├── RecurrenceMatcher.matches_today
//!               ├── Messenger.send  ──(permanent error)──▶ registry.remove_on_failure
//!               └── MessageRetractionCache.record
//!
//! Command layer
//!   ├── opt in / opt out        ──▶ ReminderRegistry
//!   ├── /delete_bot, reply-delete ──▶ MessageRetractionCache ──▶ Messenger.delete
//!   └── messages, edits, member changes (tracking on)
//!         ──▶ ActivityLog / alerts via Messenger.send
//! ```

pub mod engine;
pub mod fanout;
pub mod recurrence;
pub mod registry;
pub mod retraction;
pub mod service;
pub mod store;
pub mod templates;
pub mod tracking;

pub use engine::{Clock, FireSchedule, SchedulerLoop, SchedulerState};
pub use fanout::{FanoutReport, NotificationFanout};
pub use recurrence::{RecurrenceMatcher, Upcoming, sort_for_listing, years_since};
pub use registry::{ReminderRegistry, Subscription};
pub use retraction::{MessageRetractionCache, ReplyDeleteOutcome, RetractionReport};
pub use service::ReminderService;
pub use store::JsonRecordStore;
pub use templates::Templates;
pub use tracking::{ActivityLog, ActivitySummary, LoggedMessage};
