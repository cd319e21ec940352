use async_trait::async_trait;
use switchyard_core::{BuildEvent, BuildId, Event};

use super::MemoryStore;
use crate::DbResult;
use crate::repo::{EventPage, EventRepo};

#[async_trait]
impl EventRepo for MemoryStore {
    async fn append(&self, build_id: BuildId, event: &Event) -> DbResult<Option<u64>> {
        let envelope = event.envelope()?;
        let mut state = self.state.lock().await;
        let event_id = state.append(build_id, envelope);
        if event_id.is_some() {
            self.hub.notify(build_id);
        }
        Ok(event_id)
    }

    async fn fetch(
        &self,
        build_id: BuildId,
        from: u64,
        limit: usize,
    ) -> DbResult<Option<EventPage>> {
        let state = self.state.lock().await;
        let Some(build) = state.builds.get(&build_id) else {
            return Ok(None);
        };

        let events = build
            .events
            .iter()
            .enumerate()
            .skip(from as usize)
            .take(limit)
            .map(|(event_id, envelope)| BuildEvent {
                build_id,
                event_id: event_id as u64,
                envelope: envelope.clone(),
            })
            .collect();

        Ok(Some(EventPage {
            events,
            completed: build.record.completed,
        }))
    }
}
