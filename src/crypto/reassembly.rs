//! Reassembly of fragmented messages.
//!
//! Fragments are keyed by their sealed counter, so arrival order does not
//! matter. A message is a run of consecutive counters that opens with
//! [`FLAG_FIRST_FRAGMENT`] and closes with the first fragment lacking
//! [`FLAG_MORE_FRAGMENTS`]. Messages come out in counter order.
//!
//! A missing fragment holds back everything after it until newer fragments
//! arrive more than `window` counters past it. The gap is then given up for
//! lost along with the partial message around it.

use std::collections::BTreeMap;

use crate::core::{FLAG_FIRST_FRAGMENT, FLAG_MORE_FRAGMENTS};

#[derive(Debug)]
struct Piece {
    first: bool,
    more: bool,
    data: Vec<u8>,
}

/// What feeding one fragment produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reassembled {
    /// Messages completed, oldest first.
    pub messages: Vec<Vec<u8>>,
    /// Fragments thrown away because their message can no longer complete.
    pub discarded: usize,
}

/// Counter-ordered reassembly buffer for one direction of a session.
#[derive(Debug)]
pub struct Reassembly {
    /// Lowest counter not yet consumed.
    next: u64,
    pending: BTreeMap<u64, Piece>,
    window: u64,
}

impl Reassembly {
    /// Create an empty buffer tolerating gaps of up to `window` counters.
    pub fn new(window: u64) -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
            window,
        }
    }

    /// Fragments waiting for their message to complete.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed one authenticated fragment.
    pub fn push(&mut self, counter: u64, flags: u8, data: Vec<u8>) -> Reassembled {
        let mut out = Reassembled::default();
        if counter < self.next {
            // Belongs to a message already completed or given up.
            out.discarded += 1;
            return out;
        }

        self.pending.insert(
            counter,
            Piece {
                first: flags & FLAG_FIRST_FRAGMENT != 0,
                more: flags & FLAG_MORE_FRAGMENTS != 0,
                data,
            },
        );
        self.drain(&mut out);
        out
    }

    fn drain(&mut self, out: &mut Reassembled) {
        loop {
            let Some((oldest, first)) = self
                .pending
                .first_key_value()
                .map(|(&counter, piece)| (counter, piece.first))
            else {
                return;
            };

            if oldest > self.next {
                if !self.overdue(self.next) {
                    return;
                }
                self.next = oldest;
                continue;
            }

            if !first {
                // The head of its message is gone.
                self.pending.remove(&oldest);
                self.next = oldest + 1;
                out.discarded += 1;
                continue;
            }

            match self.run_end(oldest) {
                Ok(end) => {
                    let mut message = Vec::new();
                    for counter in oldest..=end {
                        if let Some(piece) = self.pending.remove(&counter) {
                            message.extend_from_slice(&piece.data);
                        }
                    }
                    self.next = end + 1;
                    out.messages.push(message);
                }
                Err(hole) => {
                    if !self.overdue(hole) {
                        return;
                    }
                    let kept = self.pending.split_off(&hole);
                    out.discarded += std::mem::replace(&mut self.pending, kept).len();
                    self.next = hole;
                }
            }
        }
    }

    /// Last counter of the message opening at `start`, or the first counter
    /// still missing from it.
    fn run_end(&self, start: u64) -> Result<u64, u64> {
        let mut expected = start;
        for (&counter, piece) in self.pending.range(start..) {
            if counter != expected {
                break;
            }
            if !piece.more {
                return Ok(counter);
            }
            expected += 1;
        }
        Err(expected)
    }

    fn overdue(&self, hole: u64) -> bool {
        self.pending
            .last_key_value()
            .is_some_and(|(&newest, _)| newest > hole.saturating_add(self.window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: u8 = FLAG_FIRST_FRAGMENT;
    const MIDDLE: u8 = FLAG_MORE_FRAGMENTS;
    const OPENING: u8 = FLAG_FIRST_FRAGMENT | FLAG_MORE_FRAGMENTS;
    const LAST: u8 = 0;

    fn messages(out: Reassembled) -> Vec<Vec<u8>> {
        out.messages
    }

    #[test]
    fn test_in_order_fragments() {
        let mut buffer = Reassembly::new(8);
        assert!(messages(buffer.push(0, OPENING, b"AAAA".to_vec())).is_empty());
        assert!(messages(buffer.push(1, MIDDLE, b"BBBB".to_vec())).is_empty());
        assert_eq!(messages(buffer.push(2, LAST, b"CC".to_vec())), vec![b"AAAABBBBCC".to_vec()]);
        assert_eq!(messages(buffer.push(3, FIRST, b"solo".to_vec())), vec![b"solo".to_vec()]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_reordered_fragments_reassemble_by_counter() {
        let mut buffer = Reassembly::new(8);
        assert!(messages(buffer.push(0, OPENING, b"AAAA".to_vec())).is_empty());
        assert!(messages(buffer.push(2, LAST, b"CCCC".to_vec())).is_empty());
        assert_eq!(
            messages(buffer.push(1, MIDDLE, b"BBBB".to_vec())),
            vec![b"AAAABBBBCCCC".to_vec()]
        );
    }

    #[test]
    fn test_later_message_waits_for_earlier_one() {
        let mut buffer = Reassembly::new(8);
        assert!(messages(buffer.push(1, FIRST, b"second".to_vec())).is_empty());
        assert_eq!(
            messages(buffer.push(0, FIRST, b"first".to_vec())),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    #[test]
    fn test_lost_fragment_never_splices_messages() {
        let mut buffer = Reassembly::new(4);
        buffer.push(0, OPENING, b"AAAA".to_vec());
        // Counter 1 ("BBBB", last) is lost
        for counter in 2..=5 {
            let out = buffer.push(counter, FIRST, vec![b'a' + counter as u8]);
            assert!(out.messages.is_empty());
        }

        // Counter 6 pushes the gap out of the window
        let out = buffer.push(6, FIRST, b"g".to_vec());
        assert_eq!(out.discarded, 1);
        assert_eq!(
            out.messages,
            vec![b"c".to_vec(), b"d".to_vec(), b"e".to_vec(), b"f".to_vec(), b"g".to_vec()]
        );
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_orphaned_tail_is_discarded() {
        let mut buffer = Reassembly::new(2);
        // Counter 0 (the head) is lost
        buffer.push(1, MIDDLE, b"BBBB".to_vec());
        buffer.push(2, LAST, b"CC".to_vec());
        let out = buffer.push(3, FIRST, b"next".to_vec());

        assert_eq!(out.discarded, 2);
        assert_eq!(out.messages, vec![b"next".to_vec()]);
    }

    #[test]
    fn test_late_fragment_after_giving_up_is_discarded() {
        let mut buffer = Reassembly::new(1);
        buffer.push(1, FIRST, b"x".to_vec());
        let out = buffer.push(2, FIRST, b"y".to_vec());
        assert_eq!(out.messages, vec![b"x".to_vec(), b"y".to_vec()]);

        let out = buffer.push(0, FIRST, b"late".to_vec());
        assert_eq!(out.discarded, 1);
        assert!(out.messages.is_empty());
    }
}
