//! Reminder service — the surface the command layer talks to.
//!
//! Owns the shared state (registry, retraction cache, fanout) and the
//! scheduler task lifecycle. Everything is injected; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use festa_core::config::FestaConfig;
use festa_core::error::{DeliveryError, Result};
use festa_core::traits::{Messenger, RecordStore};
use festa_core::types::{
    Destination, MemberChange, MessageId, Principal, SubscriptionKind, TrackedMessage,
};
use festa_security::PrincipalGuard;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::engine::{Clock, FireSchedule, SchedulerLoop, system_clock};
use crate::fanout::NotificationFanout;
use crate::recurrence::RecurrenceMatcher;
use crate::registry::ReminderRegistry;
use crate::retraction::{MessageRetractionCache, ReplyDeleteOutcome, RetractionReport};
use crate::templates::Templates;
use crate::tracking::{ActivityLog, edit_alert, member_alert};

struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct ReminderService {
    registry: Arc<ReminderRegistry>,
    cache: Arc<MessageRetractionCache>,
    fanout: Arc<NotificationFanout>,
    activity: Arc<ActivityLog>,
    messenger: Arc<dyn Messenger>,
    schedule: FireSchedule,
    poll_interval: Duration,
    request_timeout: Duration,
    clock: Clock,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl ReminderService {
    /// Assemble a service from already-built parts.
    pub fn new(
        registry: Arc<ReminderRegistry>,
        cache: Arc<MessageRetractionCache>,
        fanout: Arc<NotificationFanout>,
        messenger: Arc<dyn Messenger>,
        schedule: FireSchedule,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            fanout,
            activity: Arc::new(ActivityLog::default()),
            messenger,
            schedule,
            poll_interval,
            request_timeout: Duration::from_secs(10),
            clock: system_clock(),
            scheduler: Mutex::new(None),
        }
    }

    /// Build everything from configuration.
    pub fn from_config(
        config: &FestaConfig,
        messenger: Arc<dyn Messenger>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        config.validate()?;
        let sched = &config.scheduler;

        let registry = Arc::new(ReminderRegistry::new());
        let cache = Arc::new(
            MessageRetractionCache::new(
                config.retraction.capacity,
                PrincipalGuard::new(&config.retraction),
                messenger.clone(),
            )
            .with_delete_delay(Duration::from_millis(config.retraction.delete_delay_ms))
            .with_request_timeout(sched.request_timeout()),
        );
        let fanout = Arc::new(
            NotificationFanout::new(registry.clone(), cache.clone(), store, messenger.clone())
                .with_matcher(RecurrenceMatcher::new(sched.leap_day_policy))
                .with_templates(Templates::from_config(&config.templates))
                .with_send_delay(sched.send_delay())
                .with_request_timeout(sched.request_timeout()),
        );

        let mut service = Self::new(
            registry,
            cache,
            fanout,
            messenger,
            FireSchedule::from_config(sched)?,
            sched.poll_interval(),
        );
        service.request_timeout = sched.request_timeout();
        service.activity = Arc::new(ActivityLog::from_config(&config.tracking));
        Ok(service)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<ReminderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<MessageRetractionCache> {
        &self.cache
    }

    pub fn fanout(&self) -> &Arc<NotificationFanout> {
        &self.fanout
    }

    pub fn schedule(&self) -> &FireSchedule {
        &self.schedule
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    fn local_time(&self) -> String {
        (self.clock)()
            .with_timezone(&self.schedule.timezone)
            .format("%H:%M:%S")
            .to_string()
    }

    async fn tracking(&self, destination: Destination) -> bool {
        self.registry
            .is_enabled(destination, SubscriptionKind::Tracking)
            .await
    }

    /// Log an incoming message if the chat is tracked. Returns whether it
    /// was logged.
    pub async fn on_message(&self, destination: Destination, message: &TrackedMessage) -> bool {
        if !self.tracking(destination).await {
            return false;
        }
        self.activity.record(destination, message).await;
        true
    }

    /// Announce an edited message in a tracked chat.
    pub async fn on_edited(
        &self,
        destination: Destination,
        message: &TrackedMessage,
    ) -> Option<MessageId> {
        if !self.tracking(destination).await {
            return None;
        }
        tracing::info!("✏️ {destination}: message {} edited", message.message_id);
        let alert = edit_alert(message, &self.local_time());
        self.send_tracked(destination, &alert).await.ok()
    }

    /// Announce a membership change in a tracked chat.
    pub async fn on_member_change(
        &self,
        destination: Destination,
        change: &MemberChange,
    ) -> Option<MessageId> {
        if !self.tracking(destination).await {
            return None;
        }
        let alert = member_alert(change, &self.local_time())?;
        tracing::info!(
            "👥 {destination}: user {} is now {:?}",
            change.user.user_id,
            change.new_status
        );
        self.send_tracked(destination, &alert).await.ok()
    }

    pub async fn on_opt_in(&self, destination: Destination, kind: SubscriptionKind) -> bool {
        self.registry.opt_in(destination, kind).await
    }

    pub async fn on_opt_out(&self, destination: Destination, kind: SubscriptionKind) -> bool {
        self.registry.opt_out(destination, kind).await
    }

    pub async fn on_delete_command(
        &self,
        destination: Destination,
        count: Option<usize>,
        principal: &Principal,
    ) -> Result<RetractionReport> {
        self.cache.bulk_delete(destination, count, principal).await
    }

    pub async fn on_reply_delete(
        &self,
        destination: Destination,
        target: MessageId,
        command_message: Option<MessageId>,
        principal: &Principal,
    ) -> Result<ReplyDeleteOutcome> {
        self.cache
            .delete_by_reply(destination, target, command_message, principal)
            .await
    }

    /// Send a bot reply and remember its id for later retraction. A
    /// permanent failure drops the destination from the registry, same as
    /// during a firing.
    pub async fn send_tracked(
        &self,
        destination: Destination,
        text: &str,
    ) -> std::result::Result<MessageId, DeliveryError> {
        let result = match tokio::time::timeout(
            self.request_timeout,
            self.messenger.send(destination, text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transient("send timed out".into())),
        };
        match &result {
            Ok(message_id) => self.cache.record(destination, *message_id).await,
            Err(e) if e.is_permanent() => {
                self.registry.remove_on_failure(destination).await;
            }
            Err(e) => tracing::warn!("⚠️ {destination}: reply not delivered: {e}"),
        }
        result
    }

    /// Spawn the scheduler loop. Returns `false` if it is already running.
    pub async fn on_start(&self) -> bool {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return false;
        }
        let (shutdown, rx) = watch::channel(false);
        let scheduler = SchedulerLoop::new(self.schedule, self.fanout.clone(), self.poll_interval)
            .with_clock(self.clock.clone());
        let join = tokio::spawn(scheduler.run(rx));
        *slot = Some(SchedulerHandle { shutdown, join });
        true
    }

    /// Signal the scheduler and wait for it to finish its current cycle.
    /// Returns `false` if it was not running.
    pub async fn on_stop(&self) -> bool {
        let Some(handle) = self.scheduler.lock().await.take() else {
            return false;
        };
        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.join.await {
            tracing::error!("❌ Scheduler task ended abnormally: {e}");
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }
}
