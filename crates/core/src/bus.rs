// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus fanning events out to subscribers

use crate::event::Event;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Sender for event delivery
pub type EventSender = mpsc::UnboundedSender<Event>;
/// Receiver for event delivery
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Routes every published event to every live subscriber
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<EventSender>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all events published from now on
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: Event) {
        let mut closed = false;
        {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for tx in subs.iter() {
                closed |= tx.send(event.clone()).is_err();
            }
        }

        if closed {
            self.subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|tx| !tx.is_closed());
        }
    }

    /// Get count of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
