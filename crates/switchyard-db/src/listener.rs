//! Forwards Postgres event notifications to the in-process hub.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use switchyard_core::BuildId;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::hub::EventHub;
use crate::repo::EVENTS_CHANNEL;

/// Spawn the listener loop. It reconnects forever; after every (re)connect
/// all subscribers are woken since notifications may have been missed.
pub fn spawn_event_listener(pool: PgPool, hub: EventHub) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    warn!(error = %e, "Failed to connect event listener");
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if let Err(e) = listener.listen(EVENTS_CHANNEL).await {
                warn!(error = %e, channel = EVENTS_CHANNEL, "Failed to listen for build events");
                sleep(Duration::from_secs(5)).await;
                continue;
            }

            info!(channel = EVENTS_CHANNEL, "Listening for build events");
            hub.notify_all();

            loop {
                match listener.recv().await {
                    Ok(notification) => match notification.payload().parse::<BuildId>() {
                        Ok(build_id) => hub.notify(build_id),
                        Err(e) => {
                            debug!(payload = notification.payload(), error = %e, "Ignoring notification")
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Event listener connection lost");
                        break;
                    }
                }
            }

            sleep(Duration::from_secs(1)).await;
        }
    })
}
