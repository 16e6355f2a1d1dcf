//! Notification fanout — one firing's worth of congratulations.
//!
//! For every chat with notifications on: load its birthdays and weddings,
//! pick today's celebrants, send one message each. A chat that permanently
//! rejects delivery is deregistered and skipped for the rest of the firing;
//! every other chat carries on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use festa_core::error::DeliveryError;
use festa_core::traits::{Messenger, RecordStore};
use festa_core::types::{Destination, MessageId, NamedRecord, RecordKind, SubscriptionKind};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::Mutex;

use crate::recurrence::RecurrenceMatcher;
use crate::registry::ReminderRegistry;
use crate::retraction::MessageRetractionCache;
use crate::templates::Templates;

/// What one firing did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub date: Option<NaiveDate>,
    pub destinations: usize,
    pub matched: usize,
    pub sent: usize,
    pub transient_failures: usize,
    /// Record collections that could not be loaded.
    pub load_failures: usize,
    pub deregistered: Vec<Destination>,
}

pub struct NotificationFanout {
    registry: Arc<ReminderRegistry>,
    cache: Arc<MessageRetractionCache>,
    store: Arc<dyn RecordStore>,
    messenger: Arc<dyn Messenger>,
    matcher: RecurrenceMatcher,
    templates: Templates,
    rng: Mutex<Box<dyn RngCore + Send>>,
    send_delay: Duration,
    request_timeout: Duration,
}

impl NotificationFanout {
    pub fn new(
        registry: Arc<ReminderRegistry>,
        cache: Arc<MessageRetractionCache>,
        store: Arc<dyn RecordStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            registry,
            cache,
            store,
            messenger,
            matcher: RecurrenceMatcher::default(),
            templates: Templates::builtin(),
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
            send_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_matcher(mut self, matcher: RecurrenceMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_templates(mut self, templates: Templates) -> Self {
        self.templates = templates;
        self
    }

    /// Replace the randomness source (seeded in tests).
    pub fn with_rng<R: RngCore + Send + 'static>(mut self, rng: R) -> Self {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn matcher(&self) -> &RecurrenceMatcher {
        &self.matcher
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    /// Reminder text for a celebrant, using the injected randomness source.
    pub async fn compose(&self, kind: RecordKind, record: &NamedRecord, year: i32) -> String {
        let mut rng = self.rng.lock().await;
        self.templates.compose(kind, record, year, &mut **rng)
    }

    /// Congratulation text without the reminder header.
    pub async fn congratulation(
        &self,
        kind: RecordKind,
        record: &NamedRecord,
        year: i32,
    ) -> String {
        let mut rng = self.rng.lock().await;
        self.templates.congratulation(kind, record, year, &mut **rng)
    }

    /// Run one firing for every subscribed destination.
    pub async fn fire(&self, today: NaiveDate) -> FanoutReport {
        let destinations = self.registry.all_enabled(SubscriptionKind::Notifications).await;
        tracing::info!(
            "🔔 Firing reminders for {today} ({} destinations)",
            destinations.len()
        );
        let mut report = FanoutReport {
            date: Some(today),
            ..Default::default()
        };
        for destination in destinations {
            self.fire_destination(destination, today, &mut report).await;
        }
        report
    }

    /// Run the fanout for a single destination, regardless of its flags.
    pub async fn fire_for(&self, destination: Destination, today: NaiveDate) -> FanoutReport {
        let mut report = FanoutReport {
            date: Some(today),
            ..Default::default()
        };
        self.fire_destination(destination, today, &mut report).await;
        report
    }

    async fn fire_destination(
        &self,
        destination: Destination,
        today: NaiveDate,
        report: &mut FanoutReport,
    ) {
        report.destinations += 1;
        for kind in RecordKind::ALL {
            let records = match self.store.load_records(destination, kind).await {
                Ok(records) => records,
                Err(e) => {
                    report.load_failures += 1;
                    tracing::warn!("⚠️ {destination}: failed to load {kind} records: {e}");
                    continue;
                }
            };

            for record in self.matcher.matches_today(today, &records) {
                report.matched += 1;
                let text = self.compose(kind, record, today.year()).await;

                if report.sent + report.transient_failures > 0 && !self.send_delay.is_zero() {
                    tokio::time::sleep(self.send_delay).await;
                }

                match self.send(destination, &text).await {
                    Ok(message_id) => {
                        report.sent += 1;
                        self.cache.record(destination, message_id).await;
                        tracing::info!(
                            "🎉 {destination}: congratulated '{}' ({kind})",
                            record.label
                        );
                    }
                    Err(e) if e.is_permanent() => {
                        tracing::warn!("🚫 {destination}: {e} — dropping destination");
                        self.registry.remove_on_failure(destination).await;
                        report.deregistered.push(destination);
                        return;
                    }
                    Err(e) => {
                        report.transient_failures += 1;
                        tracing::warn!(
                            "⚠️ {destination}: failed to congratulate '{}': {e}",
                            record.label
                        );
                    }
                }
            }
        }
    }

    async fn send(&self, destination: Destination, text: &str) -> Result<MessageId, DeliveryError> {
        let request = self.messenger.send(destination, text);
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transient("send timed out".into())),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use festa_core::error::{FestaError, Result};
    use festa_core::types::{DateRecord, DeleteOutcome};
    use festa_security::PrincipalGuard;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    /// Records every send; per-destination failures can be scripted.
    #[derive(Default)]
    pub(crate) struct RecordingMessenger {
        pub sent: StdMutex<Vec<(Destination, String)>>,
        pub failures: StdMutex<HashMap<Destination, DeliveryError>>,
        /// Destinations whose sends never answer.
        pub hangs: StdMutex<HashSet<Destination>>,
        pub panic_on_send: AtomicBool,
        next_id: AtomicI64,
    }

    impl RecordingMessenger {
        pub fn fail(&self, destination: Destination, error: DeliveryError) {
            self.failures.lock().unwrap().insert(destination, error);
        }

        pub fn sent_to(&self, destination: Destination) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(d, _)| *d == destination)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(
            &self,
            destination: Destination,
            text: &str,
        ) -> std::result::Result<MessageId, DeliveryError> {
            if self.panic_on_send.load(Ordering::SeqCst) {
                panic!("messenger exploded");
            }
            let hangs = self.hangs.lock().unwrap().contains(&destination);
            if hangs {
                std::future::pending::<()>().await;
            }
            if let Some(err) = self.failures.lock().unwrap().get(&destination) {
                return Err(err.clone());
            }
            self.sent.lock().unwrap().push((destination, text.to_string()));
            Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
        }

        async fn delete(&self, _: Destination, _: MessageId) -> DeleteOutcome {
            DeleteOutcome::Deleted
        }
    }

    /// Fixed records per (destination, kind); listed destinations fail to load.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub records: StdMutex<HashMap<(Destination, RecordKind), Vec<NamedRecord>>>,
        pub broken: StdMutex<Vec<Destination>>,
    }

    impl MemoryStore {
        pub fn add(
            &self,
            destination: Destination,
            kind: RecordKind,
            label: &str,
            day: u32,
            month: u32,
            year: Option<i32>,
        ) {
            self.records
                .lock()
                .unwrap()
                .entry((destination, kind))
                .or_default()
                .push(NamedRecord::new(label, DateRecord::new(day, month, year).unwrap()));
        }
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn load_records(
            &self,
            destination: Destination,
            kind: RecordKind,
        ) -> Result<Vec<NamedRecord>> {
            if self.broken.lock().unwrap().contains(&destination) {
                return Err(FestaError::Storage("corrupt file".into()));
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&(destination, kind))
                .cloned()
                .unwrap_or_default())
        }
    }

    pub(crate) struct Harness {
        pub registry: Arc<ReminderRegistry>,
        pub cache: Arc<MessageRetractionCache>,
        pub store: Arc<MemoryStore>,
        pub messenger: Arc<RecordingMessenger>,
        pub fanout: Arc<NotificationFanout>,
    }

    pub(crate) fn harness() -> Harness {
        let registry = Arc::new(ReminderRegistry::new());
        let store = Arc::new(MemoryStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let guard = PrincipalGuard::from_identifier("@keeper");
        let cache = Arc::new(
            MessageRetractionCache::new(100, guard, messenger.clone())
                .with_delete_delay(Duration::ZERO),
        );
        let fanout = Arc::new(
            NotificationFanout::new(
                registry.clone(),
                cache.clone(),
                store.clone(),
                messenger.clone(),
            )
            .with_rng(StdRng::seed_from_u64(3))
                .with_send_delay(Duration::ZERO),
        );
        Harness {
            registry,
            cache,
            store,
            messenger,
            fanout,
        }
    }

    const A: Destination = Destination(1);
    const B: Destination = Destination(2);

    fn jan1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_only_subscribed_destinations_receive() {
        let h = harness();
        h.registry.opt_in(A, SubscriptionKind::Notifications).await;
        h.registry.opt_in(B, SubscriptionKind::Tracking).await;
        h.store.add(A, RecordKind::Birthday, "Ann", 1, 1, None);
        h.store.add(B, RecordKind::Birthday, "Ann", 1, 1, None);

        let report = h.fanout.fire(jan1()).await;

        assert_eq!(report.sent, 1);
        assert_eq!(h.messenger.sent_to(A).len(), 1);
        assert!(h.messenger.sent_to(A)[0].contains("Ann"));
        assert!(h.messenger.sent_to(B).is_empty());
        assert_eq!(h.cache.snapshot(A).await, vec![MessageId(1)]);
    }

    #[tokio::test]
    async fn test_birthdays_and_weddings_both_fire() {
        let h = harness();
        h.registry.opt_in(A, SubscriptionKind::Notifications).await;
        h.store.add(A, RecordKind::Birthday, "Ann", 1, 1, None);
        h.store.add(A, RecordKind::Birthday, "NotToday", 2, 1, None);
        h.store.add(A, RecordKind::Wedding, "Ivan & Anna", 1, 1, Some(2014));

        let report = h.fanout.fire(jan1()).await;

        assert_eq!(report.matched, 2);
        let texts = h.messenger.sent_to(A);
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("Ivan & Anna"));
        assert!(texts[1].contains("10"));
    }

    #[tokio::test]
    async fn test_permanent_failure_deregisters_only_that_destination() {
        let h = harness();
        h.registry.opt_in(A, SubscriptionKind::Notifications).await;
        h.registry.opt_in(B, SubscriptionKind::Notifications).await;
        h.store.add(A, RecordKind::Birthday, "Ann", 1, 1, None);
        h.store.add(A, RecordKind::Wedding, "Pair", 1, 1, None);
        h.store.add(B, RecordKind::Birthday, "Bob", 1, 1, None);
        h.messenger.fail(A, DeliveryError::Permanent("bot was kicked".into()));

        let report = h.fanout.fire(jan1()).await;

        assert_eq!(report.deregistered, vec![A]);
        assert_eq!(report.matched, 2, "A's wedding match must be abandoned");
        assert_eq!(h.messenger.sent_to(B).len(), 1);
        assert_eq!(
            h.registry.all_enabled(SubscriptionKind::Notifications).await,
            vec![B]
        );
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_destination() {
        let h = harness();
        h.registry.opt_in(A, SubscriptionKind::Notifications).await;
        h.store.add(A, RecordKind::Birthday, "Ann", 1, 1, None);
        h.store.add(A, RecordKind::Birthday, "Abe", 1, 1, None);
        h.messenger.fail(A, DeliveryError::Transient("429".into()));

        let report = h.fanout.fire(jan1()).await;

        assert_eq!(report.transient_failures, 2);
        assert!(report.deregistered.is_empty());
        assert!(h.registry.is_enabled(A, SubscriptionKind::Notifications).await);
        assert_eq!(h.cache.len(A).await, 0);
    }

    #[tokio::test]
    async fn test_load_failure_is_isolated() {
        let h = harness();
        h.registry.opt_in(A, SubscriptionKind::Notifications).await;
        h.registry.opt_in(B, SubscriptionKind::Notifications).await;
        h.store.broken.lock().unwrap().push(A);
        h.store.add(B, RecordKind::Birthday, "Bob", 1, 1, None);

        let report = h.fanout.fire(jan1()).await;

        assert_eq!(report.load_failures, 2);
        assert_eq!(report.sent, 1);
        assert!(h.registry.is_enabled(A, SubscriptionKind::Notifications).await);
    }

    #[tokio::test]
    async fn test_fire_for_ignores_flags() {
        let h = harness();
        h.store.add(B, RecordKind::Birthday, "Bob", 1, 1, None);
        let report = h.fanout.fire_for(B, jan1()).await;
        assert_eq!(report.sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_send_is_transient() {
        let h = harness();
        h.registry.opt_in(A, SubscriptionKind::Notifications).await;
        h.registry.opt_in(B, SubscriptionKind::Notifications).await;
        h.store.add(A, RecordKind::Birthday, "Ann", 1, 1, None);
        h.store.add(B, RecordKind::Birthday, "Bob", 1, 1, None);
        h.messenger.hangs.lock().unwrap().insert(A);

        let report = h.fanout.fire(jan1()).await;

        assert_eq!(report.transient_failures, 1);
        assert!(report.deregistered.is_empty());
        assert!(h.registry.is_enabled(A, SubscriptionKind::Notifications).await);
        assert_eq!(h.cache.len(A).await, 0);
        assert_eq!(h.messenger.sent_to(B).len(), 1);
    }
}
