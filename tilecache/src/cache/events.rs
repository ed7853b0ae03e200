//! Lifecycle event stream.
//!
//! The cache publishes one [`TileEvent`] per lifecycle transition into a
//! bounded queue per subscriber. Publishing never blocks: a full queue drops
//! the event and counts it, a closed queue unsubscribes itself. Subscribers
//! drain their queue on their own threads, never under the cache lock.

use crate::cache::key::TileKey;
use crate::cache::owner::OwnerId;
use crate::cache::record::{TileRecord, TileState};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// One lifecycle transition of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEvent {
    /// Position in the cache-wide event order.
    pub sequence: u64,
    pub key: TileKey,
    pub owner: OwnerId,
    pub grid: (i32, i32),
    pub state: TileState,
    pub byte_size: u64,
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct TileEventReceiver {
    rx: mpsc::Receiver<TileEvent>,
}

impl TileEventReceiver {
    /// Next queued event, if any.
    pub fn try_recv(&mut self) -> Option<TileEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<TileEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next event from async code.
    pub async fn recv(&mut self) -> Option<TileEvent> {
        self.rx.recv().await
    }

    /// Block the current thread for the next event.
    ///
    /// Returns `None` once the cache is gone. Must not be called from inside
    /// an async runtime.
    pub fn blocking_recv(&mut self) -> Option<TileEvent> {
        self.rx.blocking_recv()
    }
}

/// Fan-out of events to subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::Sender<TileEvent>>,
    next_sequence: u64,
    dropped: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, capacity: usize) -> TileEventReceiver {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.push(tx);
        TileEventReceiver { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Events lost to full queues.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Publish the current state of `record`.
    pub fn publish_record(&mut self, record: &TileRecord) {
        self.publish(
            record.key(),
            record.owner(),
            record.grid(),
            record.state(),
            record.byte_size(),
        );
    }

    pub fn publish(
        &mut self,
        key: TileKey,
        owner: OwnerId,
        grid: (i32, i32),
        state: TileState,
        byte_size: u64,
    ) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if self.subscribers.is_empty() {
            return;
        }

        let event = TileEvent {
            sequence,
            key,
            owner,
            grid,
            state,
            byte_size,
        };
        let mut dropped = 0;
        self.subscribers
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        self.dropped += dropped;
    }
}
