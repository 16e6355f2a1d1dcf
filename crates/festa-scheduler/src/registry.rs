//! Reminder registry — which chats want congratulations and tracking.
//!
//! In-memory only; subscriptions are rebuilt from chat commands after a
//! restart. Destinations that permanently reject delivery are dropped.

use std::collections::HashMap;

use festa_core::types::{Destination, SubscriptionKind};
use tokio::sync::RwLock;

/// Subscription flags for one destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscription {
    pub notifications_enabled: bool,
    pub tracking_enabled: bool,
}

impl Subscription {
    fn get(&self, kind: SubscriptionKind) -> bool {
        match kind {
            SubscriptionKind::Notifications => self.notifications_enabled,
            SubscriptionKind::Tracking => self.tracking_enabled,
        }
    }

    fn set(&mut self, kind: SubscriptionKind, value: bool) {
        match kind {
            SubscriptionKind::Notifications => self.notifications_enabled = value,
            SubscriptionKind::Tracking => self.tracking_enabled = value,
        }
    }

    fn is_empty(&self) -> bool {
        !self.notifications_enabled && !self.tracking_enabled
    }
}

/// Destination → subscription flags.
#[derive(Debug, Default)]
pub struct ReminderRegistry {
    entries: RwLock<HashMap<Destination, Subscription>>,
}

impl ReminderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn a flag on. Returns `true` if it was previously off.
    pub async fn opt_in(&self, destination: Destination, kind: SubscriptionKind) -> bool {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(destination).or_default();
        let changed = !entry.get(kind);
        entry.set(kind, true);
        if changed {
            tracing::info!("🔔 {destination}: {kind} enabled");
        }
        changed
    }

    /// Turn a flag off. Returns `true` if it was previously on.
    pub async fn opt_out(&self, destination: Destination, kind: SubscriptionKind) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&destination) else {
            return false;
        };
        let changed = entry.get(kind);
        entry.set(kind, false);
        if entry.is_empty() {
            entries.remove(&destination);
        }
        if changed {
            tracing::info!("🔕 {destination}: {kind} disabled");
        }
        changed
    }

    pub async fn is_enabled(&self, destination: Destination, kind: SubscriptionKind) -> bool {
        self.entries
            .read()
            .await
            .get(&destination)
            .is_some_and(|s| s.get(kind))
    }

    /// Flags for a destination (all off when unknown).
    pub async fn subscription(&self, destination: Destination) -> Subscription {
        self.entries
            .read()
            .await
            .get(&destination)
            .copied()
            .unwrap_or_default()
    }

    /// Every destination with `kind` enabled, in ascending id order.
    pub async fn all_enabled(&self, kind: SubscriptionKind) -> Vec<Destination> {
        let mut destinations: Vec<Destination> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.get(kind))
            .map(|(d, _)| *d)
            .collect();
        destinations.sort();
        destinations
    }

    /// Drop every flag for a destination after a permanent delivery error.
    pub async fn remove_on_failure(&self, destination: Destination) -> bool {
        let removed = self.entries.write().await.remove(&destination).is_some();
        if removed {
            tracing::warn!("🧹 {destination} removed from reminders (unreachable)");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
