//! # Event Bus System
//!
//! Provides an event-driven architecture for the sync engine using
//! `tokio::sync::broadcast`. Operator mutations and transfer results are
//! published as typed events so tray icons, dashboards and loggers can react
//! without polling the store.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    emit     ┌───────────┐
//! │SyncController ├────────────>│           │    subscribe   ┌────────────┐
//! └───────────────┘             │ EventBus  ├───────────────>│ Subscriber │
//! ┌───────────────┐    emit     │ (broadcast│                └────────────┘
//! │ StateStore    ├────────────>│  channel) │
//! └───────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::ServerPaused { paused: true }))
//!     .ok();
//!
//! let received = stream.recv().await.unwrap();
//! assert!(matches!(received, CoreEvent::Sync(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting without subscribers returns `Err`; publishers ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Operator-driven changes to site assignments and pause state
    Sync(SyncEvent),
    /// Results reported by transfer workers
    Transfer(TransferEvent),
}

impl CoreEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Transfer(e) => e.description(),
        }
    }

    /// Get the severity level of the event
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Transfer(TransferEvent::Failed { exhausted: true, .. }) => {
                EventSeverity::Error
            }
            CoreEvent::Transfer(TransferEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::SiteRemoved { failed_deletions, .. })
                if *failed_deletions > 0 =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Transfer(TransferEvent::Progress { .. }) => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Operator mutations of the sync state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    SiteAdded {
        project: String,
        representation_id: String,
        site: String,
        forced: bool,
    },
    SiteRemoved {
        project: String,
        representation_id: String,
        site: String,
        deleted_files: usize,
        failed_deletions: usize,
    },
    FileStateReset {
        project: String,
        representation_id: String,
        site: String,
        file_id: Option<String>,
    },
    PriorityChanged {
        project: String,
        representation_id: String,
        site: String,
        file_id: Option<String>,
        priority: u32,
    },
    ServerPaused {
        paused: bool,
    },
    ProjectPaused {
        project: String,
        paused: bool,
    },
    RepresentationPaused {
        project: String,
        representation_id: String,
        /// `None` when the whole representation scope changed
        site: Option<String>,
        paused: bool,
    },
    ProjectCleared {
        project: String,
        site: String,
        representations: usize,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::SiteAdded { .. } => "Site added to representation",
            SyncEvent::SiteRemoved { .. } => "Site removed from representation",
            SyncEvent::FileStateReset { .. } => "File state reset",
            SyncEvent::PriorityChanged { .. } => "Transfer priority changed",
            SyncEvent::ServerPaused { .. } => "Sync server pause changed",
            SyncEvent::ProjectPaused { .. } => "Project pause changed",
            SyncEvent::RepresentationPaused { .. } => "Representation pause changed",
            SyncEvent::ProjectCleared { .. } => "Site cleared from project",
        }
    }
}

// ============================================================================
// Transfer Events
// ============================================================================

/// Transfer worker results recorded against a (file, site) cell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum TransferEvent {
    Progress {
        project: String,
        file_id: String,
        site: String,
        progress: f64,
    },
    Succeeded {
        project: String,
        file_id: String,
        site: String,
    },
    Failed {
        project: String,
        file_id: String,
        site: String,
        message: String,
        tries: u32,
        /// Retry limit reached; the file now reconciles as failed
        exhausted: bool,
    },
}

impl TransferEvent {
    fn description(&self) -> &str {
        match self {
            TransferEvent::Progress { .. } => "Transfer in progress",
            TransferEvent::Succeeded { .. } => "Transfer completed",
            TransferEvent::Failed { .. } => "Transfer failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Wrapper around a broadcast receiver with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let stream = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Transfer(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receive the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Try to receive the next matching event without waiting.
    ///
    /// Returns `None` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
