//! Blocking cursors over a build's event log.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use switchyard_core::{BuildEvent, BuildId, Envelope};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::hub::EventHub;
use crate::repo::EventRepo;
use crate::{DbError, DbResult};

/// Reads one build's events in id order, waiting for new ones.
///
/// `next` resolves with the event at the cursor's offset once it exists,
/// with [`DbError::EndOfStream`] once the build is completed and every event
/// was read, or with [`DbError::StreamClosed`] after [`close`](Self::close).
/// Closing wakes a `next` that is already waiting.
pub struct EventCursor {
    build_id: BuildId,
    events: Arc<dyn EventRepo>,
    hub: EventHub,
    batch_size: usize,
    /// Id of the next event to return. Readable while `next` is waiting.
    offset: AtomicU64,
    /// Fetched but not yet returned. Held by `next` for its whole duration.
    buffered: Mutex<VecDeque<BuildEvent>>,
    closed: watch::Sender<bool>,
}

impl EventCursor {
    pub fn new(
        build_id: BuildId,
        from: u64,
        events: Arc<dyn EventRepo>,
        hub: EventHub,
        batch_size: usize,
    ) -> Self {
        Self {
            build_id,
            events,
            hub,
            batch_size: batch_size.max(1),
            offset: AtomicU64::new(from),
            buffered: Mutex::new(VecDeque::new()),
            closed: watch::channel(false).0,
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    /// Id of the next event this cursor returns.
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub async fn next(&self) -> DbResult<Envelope> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(DbError::StreamClosed);
        }

        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(DbError::StreamClosed),
            result = self.next_event() => result,
        }
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
        debug!(build_id = %self.build_id, "closed event cursor");
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn next_event(&self) -> DbResult<Envelope> {
        let mut buffered = self.buffered.lock().await;

        loop {
            if let Some(event) = buffered.pop_front() {
                self.offset.store(event.event_id + 1, Ordering::Release);
                return Ok(event.envelope);
            }

            let mut changed = self.hub.subscribe(self.build_id);
            let page = self
                .events
                .fetch(self.build_id, self.offset(), self.batch_size)
                .await?;

            match page {
                None => return Err(DbError::EndOfStream),
                Some(page) if page.events.is_empty() => {
                    if page.completed {
                        return Err(DbError::EndOfStream);
                    }
                    // False means the channel was dropped; re-subscribe.
                    changed.changed().await;
                }
                Some(page) => buffered.extend(page.events),
            }
        }
    }
}
