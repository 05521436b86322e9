//! Harvest event bus: typed progress events from every pipeline stage.
//!
//! The EventBus is a `tokio::sync::broadcast` channel carrying
//! [`HarvestEvent`] values. The CLI prints them, tests assert on them. When no
//! subscribers exist, events are silently dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event a harvest run emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HarvestEvent {
    // ── Session ───────────────────────
    /// A browser context was opened for the run.
    SessionOpened { timestamp: String },
    /// The login sequence finished.
    LoginComplete { success: bool, state: String },
    /// The browser context was released.
    SessionClosed,

    // ── Discovery ─────────────────────
    /// A listing page was processed.
    PageScanned {
        page: u32,
        entries: usize,
        accepted: usize,
    },
    /// A listing page was skipped after exhausting its retries.
    PageSkipped { page: u32, attempts: u32 },
    /// An agency was placed in a letter bucket.
    AgencyDiscovered { letter: char, agency_name: String },
    /// Discovery stopped.
    DiscoveryComplete {
        pages: u32,
        agencies: usize,
        reason: String,
    },

    // ── Harvest ───────────────────────
    /// One agency's open and past feeds are done and checkpointed.
    AgencyHarvested {
        index: usize,
        total: usize,
        agency_name: String,
        open_count: usize,
        past_count: usize,
    },
    /// A feed gave up after all retries.
    FeedFailed {
        agency_name: String,
        feed: String,
        attempts: u32,
    },
    /// The accumulators were written to disk.
    CheckpointWritten { agencies: usize },

    // ── Run ───────────────────────────
    /// The run finished successfully.
    RunComplete {
        agencies: usize,
        open_opportunities: usize,
        past_opportunities: usize,
        elapsed_ms: u64,
    },
    /// The run aborted.
    RunFailed { error: String, elapsed_ms: u64 },
}

/// The central event bus for a harvest run.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HarvestEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: HarvestEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<HarvestEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Emit on an optional bus.
pub(crate) fn emit(bus: Option<&EventBus>, event: HarvestEvent) {
    if let Some(bus) = bus {
        bus.emit(event);
    }
}

/// RFC 3339 timestamp for the current time.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Drain every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<HarvestEvent>) -> Vec<HarvestEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
