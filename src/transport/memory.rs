//! In-process transport pair.
//!
//! Frames travel in order over an unbounded channel and are pushed into the
//! peer's [`FrameSink`] by a tokio task. Each hand-off can be dropped with a
//! configured probability and is then retried, up to a bound, before the
//! receipt fails. This models a link with its own retransmission below the
//! session.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core::{FrameSink, SendReceipt, Transport, TransportError};

/// Default bound on hand-off attempts per frame.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// Loss model for a [`MemoryLink`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Probability in `[0, 1]` that one hand-off attempt is lost.
    pub loss_rate: f64,
    /// Seed for the loss generator; `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Attempts per frame before the receipt fails.
    pub max_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            seed: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl LinkConfig {
    /// A link that loses nothing.
    pub fn lossless() -> Self {
        Self::default()
    }

    /// A link losing `rate` of all hand-off attempts.
    pub fn lossy(rate: f64) -> Self {
        Self {
            loss_rate: rate,
            ..Self::default()
        }
    }

    /// Use a fixed seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the attempt bound.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    fn effective_loss_rate(&self) -> f64 {
        if self.loss_rate.is_finite() {
            self.loss_rate.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }
}

/// Factory for connected [`MemoryTransport`] pairs.
#[derive(Debug)]
pub struct MemoryLink;

impl MemoryLink {
    /// Create two transports wired to each other.
    pub fn pair(config: LinkConfig) -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = MemoryTransport::new("a", &config, 0, b_tx, a_rx);
        let b = MemoryTransport::new("b", &config, 1, a_tx, b_rx);
        (a, b)
    }
}

/// One end of a [`MemoryLink`].
#[derive(Debug)]
pub struct MemoryTransport {
    name: &'static str,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    inbox: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    forwarder: Option<JoinHandle<()>>,
    rng: StdRng,
    loss_rate: f64,
    max_attempts: u32,
    sent: u64,
    lost: u64,
}

impl MemoryTransport {
    fn new(
        name: &'static str,
        config: &LinkConfig,
        stream: u64,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            name,
            outbound: Some(outbound),
            inbox: Some(inbox),
            forwarder: None,
            rng: config.rng(stream),
            loss_rate: config.effective_loss_rate(),
            max_attempts: config.max_attempts.max(1),
            sent: 0,
            lost: 0,
        }
    }

    /// Frames handed to the peer so far.
    pub fn frames_sent(&self) -> u64 {
        self.sent
    }

    /// Hand-off attempts lost so far.
    pub fn attempts_lost(&self) -> u64 {
        self.lost
    }

    fn attempt_lost(&mut self) -> bool {
        self.loss_rate > 0.0 && self.rng.gen_bool(self.loss_rate)
    }
}

impl Transport for MemoryTransport {
    fn attach(&mut self, inbound: FrameSink) {
        let Some(mut inbox) = self.inbox.take() else {
            debug!(link = self.name, "memory transport already attached");
            return;
        };
        let name = self.name;
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                if inbound.deliver(frame).is_err() {
                    trace!(link = name, "receiving session is gone");
                    break;
                }
            }
        }));
    }

    fn send(&mut self, frame: Vec<u8>, receipt: SendReceipt) {
        let Some(outbound) = self.outbound.clone() else {
            receipt.complete(Err(TransportError::Closed));
            return;
        };

        for attempt in 1..=self.max_attempts {
            if self.attempt_lost() {
                self.lost += 1;
                trace!(link = self.name, attempt, len = frame.len(), "frame lost");
                continue;
            }
            let result = outbound.send(frame).map_err(|_| TransportError::Closed);
            if result.is_ok() {
                self.sent += 1;
            }
            receipt.complete(result);
            return;
        }

        debug!(link = self.name, attempts = self.max_attempts, "giving up on frame");
        receipt.complete(Err(TransportError::Rejected(format!(
            "lost {} times",
            self.max_attempts
        ))));
    }

    fn reset(&mut self) {
        debug!(link = self.name, sent = self.sent, lost = self.lost, "session reset");
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        debug!(link = self.name, sent = self.sent, lost = self.lost, "memory transport closed");
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Recorder, Signal};

    fn sent_results(recorder: &mut Recorder) -> Vec<Result<(), TransportError>> {
        let mut results = Vec::new();
        while let Some(signal) = recorder.try_next() {
            if let Signal::Sent { result, .. } = signal {
                results.push(result);
            }
        }
        results
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (mut a, mut b) = MemoryLink::pair(LinkConfig::lossless());
        let mut a_recorder = Recorder::new();
        let mut b_recorder = Recorder::new();
        a.attach(a_recorder.frame_sink());
        b.attach(b_recorder.frame_sink());

        for i in 0..10u8 {
            a.send(vec![i], a_recorder.receipt(1, Some(1)));
        }
        assert_eq!(sent_results(&mut a_recorder).len(), 10);

        for i in 0..10u8 {
            match b_recorder.next().await {
                Some(Signal::Inbound(frame)) => assert_eq!(frame, vec![i]),
                other => panic!("unexpected signal: {other:?}"),
            }
        }
        assert_eq!(a.frames_sent(), 10);
    }

    #[tokio::test]
    async fn test_loss_is_retried() {
        let (mut a, mut b) = MemoryLink::pair(LinkConfig::lossy(0.5).with_seed(7));
        let mut a_recorder = Recorder::new();
        let mut b_recorder = Recorder::new();
        b.attach(b_recorder.frame_sink());

        for i in 0..100u8 {
            a.send(vec![i], a_recorder.receipt(1, Some(1)));
        }
        assert!(sent_results(&mut a_recorder).iter().all(Result::is_ok));
        assert!(a.attempts_lost() > 0);

        for i in 0..100u8 {
            match b_recorder.next().await {
                Some(Signal::Inbound(frame)) => assert_eq!(frame, vec![i]),
                other => panic!("unexpected signal: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_total_loss_rejects() {
        let config = LinkConfig::lossy(1.0).with_max_attempts(3);
        let (mut a, _b) = MemoryLink::pair(config);
        let mut recorder = Recorder::new();

        a.send(vec![1], recorder.receipt(1, Some(1)));
        let results = sent_results(&mut recorder);
        assert!(matches!(results.as_slice(), [Err(TransportError::Rejected(_))]));
        assert_eq!(a.attempts_lost(), 3);
    }

    #[tokio::test]
    async fn test_closed_link_fails_receipts() {
        let (mut a, b) = MemoryLink::pair(LinkConfig::lossless());
        let mut recorder = Recorder::new();

        a.close();
        a.send(vec![1], recorder.receipt(1, None));
        assert!(matches!(
            sent_results(&mut recorder).as_slice(),
            [Err(TransportError::Closed)]
        ));

        // Peer gone
        let (mut c, d) = MemoryLink::pair(LinkConfig::lossless());
        drop(d);
        drop(b);
        c.send(vec![2], recorder.receipt(1, None));
        assert!(matches!(
            sent_results(&mut recorder).as_slice(),
            [Err(TransportError::Closed)]
        ));
    }

    #[test]
    fn test_loss_rate_is_sanitised() {
        assert_eq!(LinkConfig::lossy(f64::NAN).effective_loss_rate(), 0.0);
        assert_eq!(LinkConfig::lossy(3.0).effective_loss_rate(), 1.0);
        assert_eq!(LinkConfig::lossy(-1.0).effective_loss_rate(), 0.0);
    }
}
