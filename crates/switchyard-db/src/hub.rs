//! In-process wake-ups for build event subscribers.
//!
//! Each build with live subscribers has a `watch` channel whose value is a
//! change counter. Subscribers take a receiver *before* reading the log, so
//! an append that lands after their read always marks the receiver changed.
//! The channel is removed when its last [`Subscription`] drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use switchyard_core::BuildId;
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct EventHub {
    channels: Arc<Mutex<HashMap<BuildId, watch::Sender<u64>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, build_id: BuildId) -> Subscription {
        let receiver = self
            .lock()
            .entry(build_id)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe();
        Subscription {
            hub: self.clone(),
            build_id,
            receiver: Some(receiver),
        }
    }

    /// Wake every subscriber of a build.
    pub fn notify(&self, build_id: BuildId) {
        let mut channels = self.lock();
        if let Some(sender) = channels.get(&build_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&build_id);
            } else {
                sender.send_modify(|changes| *changes = changes.wrapping_add(1));
            }
        }
    }

    /// Wake every subscriber of every build. Used after notifications may
    /// have been lost, e.g. when the database listener reconnects.
    pub fn notify_all(&self) {
        let mut channels = self.lock();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        for sender in channels.values() {
            sender.send_modify(|changes| *changes = changes.wrapping_add(1));
        }
    }

    /// Number of builds with a registered channel.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BuildId, watch::Sender<u64>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live interest in one build's changes.
#[derive(Debug)]
pub struct Subscription {
    hub: EventHub,
    build_id: BuildId,
    // Only `None` while dropping.
    receiver: Option<watch::Receiver<u64>>,
}

impl Subscription {
    /// Wait for the next notification. Returns false if the channel was
    /// removed without one.
    pub async fn changed(&mut self) -> bool {
        match &mut self.receiver {
            Some(receiver) => receiver.changed().await.is_ok(),
            None => false,
        }
    }

    pub fn has_changed(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| receiver.has_changed().unwrap_or(false))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver goes under the lock so concurrent drops of the last
        // two subscriptions cannot both see the other one alive.
        let mut channels = self.hub.lock();
        drop(self.receiver.take());
        if channels
            .get(&self.build_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&self.build_id);
        }
    }
}
