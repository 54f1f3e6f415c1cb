//! # Event Bus System
//!
//! Provides an event-driven architecture for the media library monitor using
//! `tokio::sync::broadcast`. The maintenance components publish here; the host
//! dashboard subscribes to drive its status line, its error banner and the
//! candidate table refresh.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for each domain
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Sync Tracker ├──────────────>│           │
//! └──────────────┘               │           │     subscribe    ┌────────────┐
//!                                │ EventBus  ├─────────────────>│ Status bar │
//! ┌──────────────┐     emit      │ (broadcast│                  └────────────┘
//! │ Bulk Delete  ├──────────────>│  channel) │     subscribe    ┌────────────┐
//! └──────────────┘               │           ├─────────────────>│ Candidates │
//! ┌──────────────┐     emit      │           │                  └────────────┘
//! │ Cross-Server ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Library(LibraryEvent::CandidatesStale { rule_id: 7 }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Library(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Publishers ignore the "no subscribers" error: a dashboard that is not
//! listening simply misses the notification.

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
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Library sync job tracking
    Sync(SyncEvent),
    /// Bulk and cross-server deletion runs
    Deletion(DeletionEvent),
    /// Candidate list invalidation
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Deletion(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::StartFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Deletion(DeletionEvent::Finished { kind, .. }) => match kind {
                DeletionKind::Success => EventSeverity::Info,
                DeletionKind::Partial => EventSeverity::Warning,
                DeletionKind::Error => EventSeverity::Error,
            },
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
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

/// Events emitted while library syncs started for a rule are tracked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Syncs are in flight for the rule (newly started or joined).
    Started {
        rule_id: i64,
        /// Encoded sync keys now tracked for the rule.
        keys: Vec<String>,
    },
    /// One library's sync could not be started.
    StartFailed {
        rule_id: i64,
        /// Display name of the library.
        library: String,
        message: String,
    },
    /// Status line derived from the latest snapshot.
    Progress { rule_id: i64, message: String },
    /// Every key finished; `refreshed` tells whether candidates were refetched.
    Completed { rule_id: i64, refreshed: bool },
    /// At least one key ended in error. One event per rule, not per key.
    Failed {
        rule_id: i64,
        /// Consolidated "Library: error" lines.
        message: String,
        /// Names of the failing libraries.
        libraries: Vec<String>,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Library sync started",
            SyncEvent::StartFailed { .. } => "Library sync could not be started",
            SyncEvent::Progress { .. } => "Library sync in progress",
            SyncEvent::Completed { .. } => "Library sync completed",
            SyncEvent::Failed { .. } => "Library sync failed",
        }
    }
}

// ============================================================================
// Deletion Events
// ============================================================================

/// Classification of a finished deletion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionKind {
    Success,
    Partial,
    Error,
}

/// Events describing a deletion run from submission to its terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DeletionEvent {
    /// A run was submitted.
    Started {
        run_id: String,
        rule_id: i64,
        total: u64,
    },
    /// Latest progress frame for the run.
    Progress {
        run_id: String,
        current: u64,
        total: u64,
        deleted: u64,
        failed: u64,
        skipped: u64,
        reclaimed_bytes: u64,
    },
    /// The run reached an outcome.
    Finished {
        run_id: String,
        kind: DeletionKind,
        message: String,
    },
    /// The run was cancelled before it produced an outcome.
    Aborted { run_id: String },
}

impl DeletionEvent {
    fn description(&self) -> &str {
        match self {
            DeletionEvent::Started { .. } => "Deletion started",
            DeletionEvent::Progress { .. } => "Deletion in progress",
            DeletionEvent::Finished { .. } => "Deletion finished",
            DeletionEvent::Aborted { .. } => "Deletion aborted",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Events telling views that their candidate data or selection changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// The candidate list for the rule must be refetched.
    CandidatesStale { rule_id: i64 },
    /// The active selection for the rule must be cleared.
    SelectionCleared { rule_id: i64 },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::CandidatesStale { .. } => "Candidate list is stale",
            LibraryEvent::SelectionCleared { .. } => "Candidate selection cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let deletions = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Deletion(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
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

// ============================================================================
// Tests
// ============================================================================
