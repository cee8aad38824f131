//! Session lifecycle and reset controller.
//!
//! ```text
//! UNINITIALIZED ──► HANDSHAKING ──► ESTABLISHED ──► RESETTING ──┐
//!                        ▲                                      │
//!                        └──────────────────────────────────────┘
//!            (any) ──► DESTROYED
//! ```
//!
//! Every engine instance runs under a [`Generation`]. Beginning a reset
//! retires the current generation and advances the counter, so anything the
//! old engine still emits is recognisably stale except for its teardown
//! output. Resets requested while one is in progress are coalesced.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::Generation;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Not started yet.
    Uninitialized,
    /// Key exchange in progress.
    Handshaking,
    /// Encrypted channel up; messages flow.
    Established,
    /// Old engine is being torn down.
    Resetting,
    /// Terminal.
    Destroyed,
}

impl LifecycleState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Destroyed
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Handshaking => "handshaking",
            LifecycleState::Established => "established",
            LifecycleState::Resetting => "resetting",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Where an engine event comes from, relative to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The live engine.
    Current,
    /// The engine being torn down.
    Retiring,
    /// Anything older.
    Stale,
}

/// What follows a completed teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterTeardown {
    /// Build the engine for this generation and handshake again.
    Restart(Generation),
    /// Close the transport and stop.
    Close,
}

/// Drives [`LifecycleState`] transitions and engine generations.
#[derive(Debug)]
pub struct ResetController {
    state: LifecycleState,
    generation: Generation,
    retiring: Option<Generation>,
    deadline: Option<Instant>,
    teardown_timeout: Duration,
    resets: u64,
}

impl ResetController {
    /// Create a controller in [`LifecycleState::Uninitialized`].
    pub fn new(teardown_timeout: Duration) -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            generation: 0,
            retiring: None,
            deadline: None,
            teardown_timeout,
            resets: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Generation of the live (or next) engine.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Number of resets begun so far.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// When the pending teardown stops waiting for the old engine.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether an old engine is still being torn down.
    pub fn is_tearing_down(&self) -> bool {
        self.retiring.is_some()
    }

    /// Whether application messages may be submitted.
    pub fn can_send(&self) -> bool {
        self.state == LifecycleState::Established
    }

    /// Classify an event by the generation it was emitted under.
    pub fn origin(&self, generation: Generation) -> Origin {
        if self.retiring == Some(generation) {
            Origin::Retiring
        } else if generation == self.generation && self.state != LifecycleState::Destroyed {
            Origin::Current
        } else {
            Origin::Stale
        }
    }

    /// `UNINITIALIZED → HANDSHAKING`. Returns the first engine generation.
    pub fn start(&mut self) -> Option<Generation> {
        if self.state != LifecycleState::Uninitialized {
            return None;
        }
        self.generation = 1;
        self.state = LifecycleState::Handshaking;
        Some(self.generation)
    }

    /// `HANDSHAKING → ESTABLISHED`.
    pub fn establish(&mut self) -> bool {
        self.transition(LifecycleState::Handshaking, LifecycleState::Established)
    }

    /// `ESTABLISHED → HANDSHAKING`, when the peer restarts the key exchange
    /// on the live engine.
    pub fn rehandshake(&mut self) -> bool {
        self.transition(LifecycleState::Established, LifecycleState::Handshaking)
    }

    fn transition(&mut self, from: LifecycleState, to: LifecycleState) -> bool {
        if self.state != from {
            return false;
        }
        self.state = to;
        true
    }

    /// Enter `RESETTING`.
    ///
    /// Returns the generation to tear down, or `None` when the reset is
    /// coalesced into one already in progress (or the session is not live).
    pub fn begin_reset(&mut self, now: Instant) -> Option<Generation> {
        match self.state {
            LifecycleState::Handshaking | LifecycleState::Established => {}
            LifecycleState::Uninitialized
            | LifecycleState::Resetting
            | LifecycleState::Destroyed => return None,
        }

        let retiring = self.generation;
        self.generation += 1;
        self.retiring = Some(retiring);
        self.deadline = Some(now + self.teardown_timeout);
        self.state = LifecycleState::Resetting;
        self.resets += 1;
        Some(retiring)
    }

    /// Enter `DESTROYED`. Returns `false` if already destroyed.
    ///
    /// A live engine becomes the retiring one; a reset already tearing an
    /// engine down keeps waiting on it.
    pub fn destroy(&mut self, now: Instant) -> bool {
        match self.state {
            LifecycleState::Destroyed => return false,
            LifecycleState::Handshaking | LifecycleState::Established => {
                self.retiring = Some(self.generation);
                self.deadline = Some(now + self.teardown_timeout);
            }
            LifecycleState::Uninitialized | LifecycleState::Resetting => {}
        }
        self.state = LifecycleState::Destroyed;
        true
    }

    /// The retiring engine ended, or the deadline passed.
    pub fn finish_teardown(&mut self) -> Option<AfterTeardown> {
        self.retiring.take()?;
        self.deadline = None;
        match self.state {
            LifecycleState::Resetting => {
                self.state = LifecycleState::Handshaking;
                Some(AfterTeardown::Restart(self.generation))
            }
            LifecycleState::Destroyed => Some(AfterTeardown::Close),
            _ => None,
        }
    }
}
