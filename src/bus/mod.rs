//! Activity Bus Module
//!
//! Fan-out of gateway activity to any number of listeners.
//!
//! ```text
//! ┌─────────────┐  publish   ┌─────────────┐  subscribe  ┌──────────────┐
//! │   Session   │──────────> │ ActivityBus │ ──────────> │   progress   │
//! │ (per client)│            │ (broadcast) │ ──────────> │ achievements │
//! └─────────────┘            └─────────────┘             └──────────────┘
//! ```
//!
//! Publishing never blocks and never fails: with no subscribers the event
//! is dropped, and a subscriber that falls more than the buffer size behind
//! skips the oldest events.
//!
//! # Example
//!
//! ```
//! use labgate::bus::{ActivityBus, CommandActivity, CommandOutcome};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = ActivityBus::new();
//!     let mut rx = bus.subscribe();
//!
//!     bus.publish(CommandActivity::new("s1", None, "c1", "docker ps", CommandOutcome::Completed));
//!
//!     let activity = rx.recv().await.unwrap();
//!     assert_eq!(activity.command, "docker ps");
//! }
//! ```

pub mod activity;

pub use activity::{CommandActivity, CommandOutcome};

use tokio::sync::broadcast;
use tracing::trace;

/// Default number of events buffered per subscriber
const DEFAULT_BUFFER_SIZE: usize = 256;

/// Broadcast channel for [`CommandActivity`] events.
#[derive(Debug, Clone)]
pub struct ActivityBus {
    tx: broadcast::Sender<CommandActivity>,
}

impl ActivityBus {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Publish `activity` to current subscribers.
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, activity: CommandActivity) -> usize {
        match self.tx.send(activity) {
            Ok(n) => n,
            Err(_) => {
                trace!("No activity subscribers");
                0
            }
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CommandActivity> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new()
    }
}
