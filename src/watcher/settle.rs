//! Per-path debounce state
//!
//! Each path is Idle until an event arrives, then Debouncing until its quiet
//! period passes without further events, at which point it settles and is
//! handed out once by [`SettleQueue::take_settled`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// What the filesystem reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Added,
    Changed,
    Removed,
}

/// One raw change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleState {
    Idle,
    Debouncing,
}

#[derive(Debug, Clone)]
struct Pending {
    kind: FsEventKind,
    deadline: Instant,
    events: usize,
}

/// Debounce timers keyed by path
#[derive(Debug)]
pub struct SettleQueue {
    quiet: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl SettleQueue {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: HashMap::new(),
        }
    }

    /// Start or restart the quiet period for the event's path
    pub fn record(&mut self, event: RawEvent, now: Instant) {
        let deadline = now + self.quiet;
        match self.pending.get_mut(&event.path) {
            Some(pending) => {
                // A file created during the window is still new when it settles
                pending.kind = match (pending.kind, event.kind) {
                    (FsEventKind::Added, FsEventKind::Changed) => FsEventKind::Added,
                    (_, kind) => kind,
                };
                pending.deadline = deadline;
                pending.events += 1;
            }
            None => {
                self.pending.insert(
                    event.path,
                    Pending {
                        kind: event.kind,
                        deadline,
                        events: 1,
                    },
                );
            }
        }
    }

    pub fn state(&self, path: &Path) -> SettleState {
        if self.pending.contains_key(path) {
            SettleState::Debouncing
        } else {
            SettleState::Idle
        }
    }

    /// Earliest instant at which some path settles
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every path whose quiet period has passed
    ///
    /// Events come back in the order they settled.
    pub fn take_settled(&mut self, now: Instant) -> Vec<RawEvent> {
        let mut settled: Vec<(Instant, RawEvent)> = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.deadline <= now {
                tracing::trace!("{:?} settled after {} events", path, pending.events);
                settled.push((pending.deadline, RawEvent::new(path.clone(), pending.kind)));
                false
            } else {
                true
            }
        });
        settled.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.path.cmp(&b.1.path)));
        settled.into_iter().map(|(_, event)| event).collect()
    }

    /// Settle everything immediately, regardless of timers
    pub fn drain(&mut self) -> Vec<RawEvent> {
        let mut events: Vec<_> = self
            .pending
            .drain()
            .map(|(path, pending)| (pending.deadline, RawEvent::new(path, pending.kind)))
            .collect();
        events.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.path.cmp(&b.1.path)));
        events.into_iter().map(|(_, event)| event).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
