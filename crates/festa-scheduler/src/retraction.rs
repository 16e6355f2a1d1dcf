//! Bot message retraction cache.
//!
//! Keeps the ids of the most recent bot-authored messages per chat so the
//! admin can wipe them later. The cache is a hint, not a source of truth:
//! the platform decides whether a message still exists, and the cache
//! reconciles against that answer.
//!
//! Each destination has two locks. `ids` is only held for in-memory edits,
//! never across a platform call, so a firing can record new ids while a
//! bulk delete is in progress. `pass` serializes retraction passes on the
//! same chat so two admins never delete the same id twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use festa_core::error::Result;
use festa_core::traits::Messenger;
use festa_core::types::{DeleteOutcome, Destination, MessageId, Principal};
use festa_security::PrincipalGuard;
use tokio::sync::Mutex;

#[derive(Default)]
struct MessageLog {
    ids: Mutex<VecDeque<MessageId>>,
    pass: Mutex<()>,
}

impl MessageLog {
    /// Drop resolved ids; returns how many remain.
    async fn forget(&self, resolved: &HashSet<MessageId>) -> usize {
        let mut ids = self.ids.lock().await;
        ids.retain(|id| !resolved.contains(id));
        ids.len()
    }
}

/// Outcome counts of a bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetractionReport {
    pub succeeded: usize,
    /// Messages that were already gone; dropped from the cache.
    pub already_gone: usize,
    pub failed: usize,
    /// Ids still cached after the pass.
    pub remaining: usize,
}

/// Result of a reply-triggered delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDeleteOutcome {
    Deleted,
    AlreadyGone,
    /// The replied-to message is not in the cache; nothing was attempted.
    NotTracked,
    Failed(String),
}

pub struct MessageRetractionCache {
    capacity: usize,
    guard: PrincipalGuard,
    messenger: Arc<dyn Messenger>,
    delete_delay: Duration,
    request_timeout: Duration,
    logs: Mutex<HashMap<Destination, Arc<MessageLog>>>,
}

impl MessageRetractionCache {
    pub fn new(capacity: usize, guard: PrincipalGuard, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            capacity: capacity.max(1),
            guard,
            messenger,
            delete_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(10),
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Pause between consecutive deletes (platform rate limits).
    pub fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn log_for(&self, destination: Destination) -> Arc<MessageLog> {
        self.logs
            .lock()
            .await
            .entry(destination)
            .or_default()
            .clone()
    }

    async fn existing_log(&self, destination: Destination) -> Option<Arc<MessageLog>> {
        self.logs.lock().await.get(&destination).cloned()
    }

    /// Remember a bot message, evicting the oldest beyond capacity.
    pub async fn record(&self, destination: Destination, message_id: MessageId) {
        let log = self.log_for(destination).await;
        let mut ids = log.ids.lock().await;
        ids.push_back(message_id);
        while ids.len() > self.capacity {
            if let Some(evicted) = ids.pop_front() {
                tracing::debug!("🗂️ {destination}: evicted message {evicted} from the cache");
            }
        }
    }

    /// Cached ids for a destination, oldest first.
    pub async fn snapshot(&self, destination: Destination) -> Vec<MessageId> {
        match self.existing_log(destination).await {
            Some(log) => log.ids.lock().await.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    pub async fn len(&self, destination: Destination) -> usize {
        match self.existing_log(destination).await {
            Some(log) => log.ids.lock().await.len(),
            None => 0,
        }
    }

    pub async fn contains(&self, destination: Destination, message_id: MessageId) -> bool {
        match self.existing_log(destination).await {
            Some(log) => log.ids.lock().await.contains(&message_id),
            None => false,
        }
    }

    async fn delete_remote(
        &self,
        destination: Destination,
        message_id: MessageId,
    ) -> DeleteOutcome {
        let request = self.messenger.delete(destination, message_id);
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(outcome) => outcome,
            Err(_) => DeleteOutcome::Failed("timed out".into()),
        }
    }

    /// Delete the `count` most recent cached messages (all when `None`),
    /// newest first. Only the privileged principal may do this; anyone
    /// else gets `Unauthorized` and nothing changes.
    pub async fn bulk_delete(
        &self,
        destination: Destination,
        count: Option<usize>,
        principal: &Principal,
    ) -> Result<RetractionReport> {
        self.guard.authorize(principal)?;

        let Some(log) = self.existing_log(destination).await else {
            return Ok(RetractionReport::default());
        };
        let _pass = log.pass.lock().await;

        let targets: Vec<MessageId> = {
            let ids = log.ids.lock().await;
            let take = count.unwrap_or(ids.len()).min(ids.len());
            ids.iter().rev().take(take).copied().collect()
        };

        let mut report = RetractionReport::default();
        let mut resolved = HashSet::new();
        for (i, message_id) in targets.iter().enumerate() {
            if i > 0 && !self.delete_delay.is_zero() {
                tokio::time::sleep(self.delete_delay).await;
            }
            match self.delete_remote(destination, *message_id).await {
                DeleteOutcome::Deleted => {
                    report.succeeded += 1;
                    resolved.insert(*message_id);
                }
                DeleteOutcome::NotFound => {
                    report.already_gone += 1;
                    resolved.insert(*message_id);
                }
                DeleteOutcome::Failed(reason) => {
                    report.failed += 1;
                    tracing::warn!(
                        "⚠️ {destination}: could not delete message {message_id}: {reason}"
                    );
                }
            }
        }

        report.remaining = log.forget(&resolved).await;
        tracing::info!(
            "🗑️ {destination}: deleted {} bot messages ({} already gone, {} failed, {} cached)",
            report.succeeded,
            report.already_gone,
            report.failed,
            report.remaining
        );
        Ok(report)
    }

    /// Delete one cached bot message the admin replied to. On success the
    /// admin's command message is removed too, best-effort.
    pub async fn delete_by_reply(
        &self,
        destination: Destination,
        target: MessageId,
        command_message: Option<MessageId>,
        principal: &Principal,
    ) -> Result<ReplyDeleteOutcome> {
        self.guard.authorize(principal)?;

        let Some(log) = self.existing_log(destination).await else {
            return Ok(ReplyDeleteOutcome::NotTracked);
        };
        let _pass = log.pass.lock().await;
        if !log.ids.lock().await.contains(&target) {
            return Ok(ReplyDeleteOutcome::NotTracked);
        }

        match self.delete_remote(destination, target).await {
            DeleteOutcome::Deleted => {
                log.forget(&HashSet::from([target])).await;
                if let Some(command) = command_message {
                    let outcome = self.delete_remote(destination, command).await;
                    if outcome != DeleteOutcome::Deleted {
                        tracing::debug!(
                            "{destination}: command message {command} not deleted: {outcome:?}"
                        );
                    }
                }
                tracing::info!("🗑️ {destination}: admin deleted bot message {target}");
                Ok(ReplyDeleteOutcome::Deleted)
            }
            DeleteOutcome::NotFound => {
                log.forget(&HashSet::from([target])).await;
                Ok(ReplyDeleteOutcome::AlreadyGone)
            }
            DeleteOutcome::Failed(reason) => {
                tracing::warn!("⚠️ {destination}: reply delete of {target} failed: {reason}");
                Ok(ReplyDeleteOutcome::Failed(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use festa_core::error::{DeliveryError, FestaError};
    use std::sync::Mutex as StdMutex;

    const CHAT: Destination = Destination(-100);

    /// Scripted platform: per-id delete outcomes, records every call.
    #[derive(Default)]
    struct FakeMessenger {
        outcomes: StdMutex<HashMap<i64, DeleteOutcome>>,
        deleted: StdMutex<Vec<i64>>,
        /// Ids whose delete never answers.
        hangs: StdMutex<HashSet<i64>>,
        /// Latency of every delete call.
        latency: StdMutex<Duration>,
    }

    impl FakeMessenger {
        fn script(&self, id: i64, outcome: DeleteOutcome) {
            self.outcomes.lock().unwrap().insert(id, outcome);
        }

        fn calls(&self) -> Vec<i64> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send(
            &self,
            _: Destination,
            _: &str,
        ) -> std::result::Result<MessageId, DeliveryError> {
            Ok(MessageId(0))
        }

        async fn delete(&self, _: Destination, message_id: MessageId) -> DeleteOutcome {
            self.deleted.lock().unwrap().push(message_id.0);
            let hangs = self.hangs.lock().unwrap().contains(&message_id.0);
            if hangs {
                std::future::pending::<()>().await;
            }
            let latency = *self.latency.lock().unwrap();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .get(&message_id.0)
                .cloned()
                .unwrap_or(DeleteOutcome::Deleted)
        }
    }

    fn admin() -> Principal {
        Principal::new(1, Some("keeper"))
    }

    fn cache(capacity: usize) -> (MessageRetractionCache, Arc<FakeMessenger>) {
        let messenger = Arc::new(FakeMessenger::default());
        let cache = MessageRetractionCache::new(
            capacity,
            PrincipalGuard::from_identifier("@keeper"),
            messenger.clone(),
        )
        .with_delete_delay(Duration::ZERO);
        (cache, messenger)
    }

    #[tokio::test]
    async fn test_eviction_keeps_last_n() {
        let (cache, _) = cache(3);
        for id in 1..=4 {
            cache.record(CHAT, MessageId(id)).await;
        }
        assert_eq!(
            cache.snapshot(CHAT).await,
            vec![MessageId(2), MessageId(3), MessageId(4)]
        );
    }

    #[tokio::test]
    async fn test_unauthorized_bulk_delete_changes_nothing() {
        let (cache, messenger) = cache(10);
        cache.record(CHAT, MessageId(1)).await;
        let result = cache
            .bulk_delete(CHAT, None, &Principal::new(2, Some("intruder")))
            .await;
        assert!(matches!(result, Err(FestaError::Unauthorized)));
        assert_eq!(cache.len(CHAT).await, 1);
        assert!(messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_delete_classifies_outcomes() {
        let (cache, messenger) = cache(10);
        for id in 1..=5 {
            cache.record(CHAT, MessageId(id)).await;
        }
        messenger.script(5, DeleteOutcome::NotFound);
        messenger.script(4, DeleteOutcome::Failed("too old".into()));

        let report = cache.bulk_delete(CHAT, Some(3), &admin()).await.unwrap();
        assert_eq!(messenger.calls(), vec![5, 4, 3]);
        assert_eq!(
            report,
            RetractionReport {
                succeeded: 1,
                already_gone: 1,
                failed: 1,
                remaining: 3,
            }
        );
        assert_eq!(
            cache.snapshot(CHAT).await,
            vec![MessageId(1), MessageId(2), MessageId(4)]
        );
    }

    #[tokio::test]
    async fn test_bulk_delete_all_and_oversized_count() {
        let (cache, _) = cache(10);
        cache.record(CHAT, MessageId(1)).await;
        cache.record(CHAT, MessageId(2)).await;
        let report = cache.bulk_delete(CHAT, Some(50), &admin()).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(cache.len(CHAT).await, 0);

        let empty = cache.bulk_delete(Destination(5), None, &admin()).await.unwrap();
        assert_eq!(empty, RetractionReport::default());
    }

    #[tokio::test]
    async fn test_reply_delete_removes_target_and_command() {
        let (cache, messenger) = cache(10);
        cache.record(CHAT, MessageId(10)).await;
        let outcome = cache
            .delete_by_reply(CHAT, MessageId(10), Some(MessageId(11)), &admin())
            .await
            .unwrap();
        assert_eq!(outcome, ReplyDeleteOutcome::Deleted);
        assert_eq!(messenger.calls(), vec![10, 11]);
        assert!(!cache.contains(CHAT, MessageId(10)).await);
    }

    #[tokio::test]
    async fn test_reply_delete_untracked_is_noop() {
        let (cache, messenger) = cache(10);
        cache.record(CHAT, MessageId(10)).await;
        let outcome = cache
            .delete_by_reply(CHAT, MessageId(99), Some(MessageId(100)), &admin())
            .await
            .unwrap();
        assert_eq!(outcome, ReplyDeleteOutcome::NotTracked);
        assert!(messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reply_delete_failure_keeps_entry() {
        let (cache, messenger) = cache(10);
        cache.record(CHAT, MessageId(10)).await;
        messenger.script(10, DeleteOutcome::Failed("no rights".into()));
        let outcome = cache
            .delete_by_reply(CHAT, MessageId(10), Some(MessageId(11)), &admin())
            .await
            .unwrap();
        assert_eq!(outcome, ReplyDeleteOutcome::Failed("no rights".into()));
        assert!(cache.contains(CHAT, MessageId(10)).await);
        assert_eq!(messenger.calls(), vec![10]);
    }

    #[tokio::test]
    async fn test_reply_delete_not_found_reconciles() {
        let (cache, messenger) = cache(10);
        cache.record(CHAT, MessageId(10)).await;
        messenger.script(10, DeleteOutcome::NotFound);
        let outcome = cache
            .delete_by_reply(CHAT, MessageId(10), None, &admin())
            .await
            .unwrap();
        assert_eq!(outcome, ReplyDeleteOutcome::AlreadyGone);
        assert_eq!(cache.len(CHAT).await, 0);
    }

    #[tokio::test]
    async fn test_reply_delete_refuses_non_admin() {
        let (cache, messenger) = cache(10);
        cache.record(CHAT, MessageId(10)).await;
        let result = cache
            .delete_by_reply(CHAT, MessageId(10), None, &Principal::new(9, None))
            .await;
        assert!(matches!(result, Err(FestaError::Unauthorized)));
        assert!(cache.contains(CHAT, MessageId(10)).await);
        assert!(messenger.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_delete_times_out_and_keeps_id() {
        let (cache, messenger) = cache(10);
        let cache = cache.with_request_timeout(Duration::from_secs(10));
        cache.record(CHAT, MessageId(1)).await;
        cache.record(CHAT, MessageId(2)).await;
        messenger.hangs.lock().unwrap().insert(2);

        let report = cache.bulk_delete(CHAT, None, &admin()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(cache.snapshot(CHAT).await, vec![MessageId(2)]);

        let outcome = cache
            .delete_by_reply(CHAT, MessageId(2), Some(MessageId(3)), &admin())
            .await
            .unwrap();
        assert_eq!(outcome, ReplyDeleteOutcome::Failed("timed out".into()));
        assert!(cache.contains(CHAT, MessageId(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_is_not_blocked_by_bulk_delete() {
        let (cache, messenger) = cache(10);
        *messenger.latency.lock().unwrap() = Duration::from_secs(5);
        for id in 1..=3 {
            cache.record(CHAT, MessageId(id)).await;
        }

        let cache = Arc::new(cache);
        let pass = tokio::spawn({
            let cache = cache.clone();
            async move { cache.bulk_delete(CHAT, None, &admin()).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let recorded = tokio::time::timeout(
            Duration::from_millis(10),
            cache.record(CHAT, MessageId(4)),
        )
        .await;
        assert!(recorded.is_ok(), "record waited for the delete pass");

        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.remaining, 1);
        assert_eq!(cache.snapshot(CHAT).await, vec![MessageId(4)]);
    }
}
