//! Fan-out of room events to downstream consumers (timeline views,
//! notification evaluation).
//!
//! Processors are called after the events are committed, outside any store
//! lock. Encrypted events already carry their decryption outcome.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use strata_shared::{Event, RoomId};

/// Why a batch of room events is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventsMode {
    Paginating,
    InitialSync,
    IncrementalSync,
    LocalEcho,
}

impl fmt::Display for RoomEventsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoomEventsMode::Paginating => "paginating",
            RoomEventsMode::InitialSync => "initial_sync",
            RoomEventsMode::IncrementalSync => "incremental_sync",
            RoomEventsMode::LocalEcho => "local_echo",
        };
        f.write_str(s)
    }
}

pub trait RoomEventsProcessor: Send + Sync {
    /// Cheap pre-filter; `process` is only called when this returns true.
    fn should_process(&self, _mode: RoomEventsMode) -> bool {
        true
    }

    fn process(&self, mode: RoomEventsMode, room_id: &RoomId, events: &[Event]);
}

/// The registered processors, notified in registration order.
#[derive(Clone, Default)]
pub struct Processors {
    inner: Vec<Arc<dyn RoomEventsProcessor>>,
}

impl Processors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn RoomEventsProcessor>) {
        self.inner.push(processor);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn notify(&self, mode: RoomEventsMode, room_id: &RoomId, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        for processor in &self.inner {
            if processor.should_process(mode) {
                processor.process(mode, room_id, events);
            }
        }
    }
}

/// One notification, as delivered by [`ChannelProcessor`].
#[derive(Debug, Clone)]
pub struct RoomEventsUpdate {
    pub mode: RoomEventsMode,
    pub room_id: RoomId,
    pub events: Vec<Event>,
}

/// Forwards every batch over an unbounded channel, for consumers living on
/// their own task.
pub struct ChannelProcessor {
    tx: mpsc::UnboundedSender<RoomEventsUpdate>,
}

impl ChannelProcessor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RoomEventsUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RoomEventsProcessor for ChannelProcessor {
    fn process(&self, mode: RoomEventsMode, room_id: &RoomId, events: &[Event]) {
        let update = RoomEventsUpdate {
            mode,
            room_id: room_id.clone(),
            events: events.to_vec(),
        };
        if self.tx.send(update).is_err() {
            tracing::debug!(room_id = %room_id, %mode, "room events receiver dropped");
        }
    }
}
