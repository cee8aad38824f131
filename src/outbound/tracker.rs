//! Delivery tracker
//!
//! Counts the wire fragments of the in-flight message that the transport has
//! not yet confirmed. Submission is single-flight, so at most one entry is
//! ever open. Each entry gets a fresh [`Ticket`]; confirmations carrying an
//! older ticket belong to an abandoned submission and are ignored.
//!
//! An entry resolves once it is both sealed (the engine emitted its last
//! fragment) and drained (every registered fragment was confirmed).

use crate::core::Ticket;

/// Fragment accounting for the in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    ticket: Ticket,
    /// Fragments registered so far.
    registered: usize,
    /// Fragments not yet confirmed by the transport.
    outstanding: usize,
    /// No more fragments will be registered.
    sealed: bool,
}

impl Entry {
    fn open(ticket: Ticket) -> Self {
        Self {
            ticket,
            registered: 0,
            outstanding: 0,
            sealed: false,
        }
    }

    fn is_resolved(&self) -> bool {
        self.sealed && self.outstanding == 0
    }
}

/// Outcome of feeding the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The in-flight message still has fragments to confirm.
    Pending,
    /// Every fragment of the in-flight message was confirmed.
    Resolved {
        /// Number of fragments the message produced.
        fragments: usize,
    },
    /// The input did not belong to any open entry.
    Ignored,
}

/// Tracker for the single in-flight message.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    entry: Option<Entry>,
    issued: Ticket,
}

impl DeliveryTracker {
    /// Create an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether fragments emitted now belong to the in-flight message.
    pub fn is_collecting(&self) -> bool {
        !self.entry.is_some_and(|entry| entry.sealed)
    }

    /// Fragments still awaiting transport confirmation.
    pub fn outstanding(&self) -> usize {
        self.entry.map_or(0, |entry| entry.outstanding)
    }

    /// Ticket of the open entry.
    pub fn ticket(&self) -> Option<Ticket> {
        self.entry.map(|entry| entry.ticket)
    }

    /// Register one fragment before it is handed to the transport.
    ///
    /// The first registration opens an entry under a new ticket. Returns the
    /// ticket to attach to the fragment, or `None` (registering nothing) once
    /// the entry is sealed.
    pub fn register_fragment(&mut self) -> Option<Ticket> {
        let entry = self.open_entry();
        if entry.sealed {
            return None;
        }
        entry.registered += 1;
        entry.outstanding += 1;
        Some(entry.ticket)
    }

    /// The engine emitted the last fragment of the in-flight message.
    pub fn seal(&mut self) -> Progress {
        self.open_entry().sealed = true;
        self.settle()
    }

    /// The transport confirmed one fragment sent under `ticket`.
    pub fn acknowledge(&mut self, ticket: Ticket) -> Progress {
        match self.entry.as_mut() {
            Some(entry) if entry.ticket == ticket && entry.outstanding > 0 => {
                entry.outstanding -= 1;
                self.settle()
            }
            _ => Progress::Ignored,
        }
    }

    /// Drop the open entry (reset or destroy).
    pub fn clear(&mut self) {
        self.entry = None;
    }

    fn open_entry(&mut self) -> &mut Entry {
        if self.entry.is_none() {
            self.issued += 1;
        }
        let ticket = self.issued;
        self.entry.get_or_insert_with(|| Entry::open(ticket))
    }

    fn settle(&mut self) -> Progress {
        match self.entry {
            Some(entry) if entry.is_resolved() => {
                self.entry = None;
                Progress::Resolved {
                    fragments: entry.registered,
                }
            }
            Some(_) => Progress::Pending,
            None => Progress::Ignored,
        }
    }
}
