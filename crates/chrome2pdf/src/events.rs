//! Event Bus - render lifecycle notifications
//!
//! Design: Type-safe events on a broadcast channel.
//! Publishing never blocks and never fails the render.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::render::RenderState;

/// Render lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderEvent {
    StateChanged {
        render_id: Uuid,
        from: RenderState,
        to: RenderState,
    },
    BrowserLaunched {
        pid: Option<u32>,
        endpoint: String,
    },
    BrowserClosed {
        pid: Option<u32>,
    },
    SessionOpened {
        render_id: Uuid,
        session_id: String,
    },
    SessionClosed {
        render_id: Uuid,
        session_id: String,
    },
}

/// Slow subscribers lag (and skip) rather than slow renders down
const CAPACITY: usize = 1024;

/// Fan-out of render events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RenderEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: RenderEvent) {
        tracing::trace!(?event, "Render event");
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Receives everything published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
