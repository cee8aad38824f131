//! End-to-end scenarios: two sessions running the Noise engine over a link.

use std::future::IntoFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cipherlink::core::{
    EncryptionEngine, EngineError, EngineEvents, EngineFactory, EngineParams, FrameSink,
    SendReceipt,
};
use cipherlink::crypto::{FrameType, NoiseEngine, encode_unsealed};
use cipherlink::prelude::*;
use tokio::time::{Instant, timeout};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn within<F: IntoFuture>(future: F) -> F::Output {
    timeout(Duration::from_secs(20), future.into_future())
        .await
        .expect("scenario timed out")
}

fn identity() -> IdentityKeypair {
    IdentityKeypair::generate()
}

fn config(identity: IdentityKeypair) -> SessionConfig {
    SessionConfig::builder().identity(identity).build().unwrap()
}

struct Peer {
    handle: SessionHandle,
    events: SessionEvents,
}

impl Peer {
    fn spawn<T: Transport>(config: SessionConfig, transport: T) -> Self {
        let (handle, events) = SessionManager::spawn(config, NoiseEngineFactory, transport).unwrap();
        Self { handle, events }
    }

    async fn established(&self) {
        within(self.handle.wait_for(LifecycleState::Established))
            .await
            .unwrap();
    }

    async fn message(&mut self) -> Vec<u8> {
        within(self.events.next_message())
            .await
            .expect("event stream ended")
    }
}

fn linked(link: LinkConfig, a: SessionConfig, b: SessionConfig) -> (Peer, Peer) {
    let (left, right) = MemoryLink::pair(link);
    (Peer::spawn(a, left), Peer::spawn(b, right))
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn hey_ho() {
    init_tracing();
    let (mut a, mut b) = linked(LinkConfig::lossless(), config(identity()), config(identity()));

    let hey = a.handle.send("hey").unwrap();
    let ho = b.handle.send("ho").unwrap();

    within(hey).await.unwrap();
    within(ho).await.unwrap();
    assert_eq!(b.message().await, b"hey");
    assert_eq!(a.message().await, b"ho");
    assert_eq!(a.handle.state(), LifecycleState::Established);
}

#[tokio::test]
async fn deliveries_confirm_in_submission_order() {
    init_tracing();
    let (a, mut b) = linked(LinkConfig::lossless(), config(identity()), config(identity()));

    let deliveries: Vec<_> = (0..20)
        .map(|i| a.handle.send(format!("message {i}")).unwrap())
        .collect();

    let mut confirmed = Vec::new();
    for (i, delivery) in deliveries.into_iter().enumerate() {
        within(delivery).await.unwrap();
        confirmed.push(i);
    }
    assert_eq!(confirmed, (0..20).collect::<Vec<_>>());

    for i in 0..20 {
        assert_eq!(b.message().await, format!("message {i}").into_bytes());
    }
}

#[tokio::test]
async fn payload_sizes_survive_fragmentation() {
    init_tracing();
    let a_config = SessionConfig::builder()
        .identity(identity())
        .max_fragment_payload(1000)
        .build()
        .unwrap();
    let (a, mut b) = linked(LinkConfig::lossless(), a_config, config(identity()));

    let large = pattern(200_000, 3);
    for payload in [Vec::new(), vec![0x42], large] {
        within(a.handle.send(payload.clone()).unwrap()).await.unwrap();
        assert_eq!(b.message().await, payload);
    }
}

#[tokio::test]
async fn fingerprint_mismatch_is_reported_once() {
    init_tracing();
    let a_identity = identity();
    let b_identity = identity();
    let a_fingerprint = a_identity.fingerprint();
    let impostor = identity().fingerprint();

    let a_config = SessionConfig::builder()
        .identity(a_identity)
        .expected_fingerprint(impostor)
        .build()
        .unwrap();
    let b_config = SessionConfig::builder()
        .identity(b_identity)
        .expected_fingerprint(a_fingerprint)
        .build()
        .unwrap();
    let (mut a, mut b) = linked(LinkConfig::lossless(), a_config, b_config);

    within(b.handle.send("ping").unwrap()).await.unwrap();
    within(a.handle.send("pong").unwrap()).await.unwrap();

    let mut mismatches = Vec::new();
    loop {
        match within(a.events.next()).await {
            Some(SessionEvent::IdentityMismatch { actual, expected }) => {
                mismatches.push((actual, expected))
            }
            Some(SessionEvent::Message(payload)) => {
                assert_eq!(payload, b"ping");
                break;
            }
            Some(_) => {}
            None => panic!("event stream ended"),
        }
    }
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].1, impostor);
    // Advisory only
    assert_eq!(a.handle.state(), LifecycleState::Established);

    loop {
        match within(b.events.next()).await {
            Some(SessionEvent::IdentityMismatch { .. }) => panic!("matching fingerprint flagged"),
            Some(SessionEvent::Message(payload)) => {
                assert_eq!(payload, b"pong");
                break;
            }
            Some(_) => {}
            None => panic!("event stream ended"),
        }
    }
}

#[tokio::test]
async fn established_event_reports_peer() {
    init_tracing();
    let b_identity = identity();
    let b_fingerprint = b_identity.fingerprint();
    let tag = InstanceTag::new(0x2222).unwrap();
    let b_config = SessionConfig::builder()
        .identity(b_identity)
        .instance_tag(tag)
        .build()
        .unwrap();
    let (mut a, _b) = linked(LinkConfig::lossless(), config(identity()), b_config);

    match within(a.events.next()).await {
        Some(SessionEvent::Established {
            fingerprint,
            instance_tag,
        }) => {
            assert_eq!(fingerprint, b_fingerprint);
            assert_eq!(instance_tag, Some(tag));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn explicit_reset_replays_in_flight_message() {
    init_tracing();
    let (mut a, mut b) = linked(LinkConfig::lossless(), config(identity()), config(identity()));
    a.established().await;
    b.established().await;

    let payload = pattern(20_000, 9);
    let delivery = a.handle.send(payload.clone()).unwrap();
    a.handle.reset().unwrap();

    within(delivery).await.unwrap();
    assert_eq!(b.message().await, payload);

    // The channel works after the reset
    within(a.handle.send("after").unwrap()).await.unwrap();
    loop {
        let message = b.message().await;
        if message == b"after" {
            break;
        }
        // A replayed copy of the in-flight message may arrive first.
        assert_eq!(message, payload);
    }
    within(b.handle.send("back").unwrap()).await.unwrap();
    assert_eq!(a.message().await, b"back");
}

/// Memory transport that also exposes its inbound sink.
struct Tap {
    inner: MemoryTransport,
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl Transport for Tap {
    fn attach(&mut self, inbound: FrameSink) {
        *self.sink.lock().unwrap() = Some(inbound.clone());
        self.inner.attach(inbound);
    }

    fn send(&mut self, frame: Vec<u8>, receipt: SendReceipt) {
        self.inner.send(frame, receipt);
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[tokio::test]
async fn injected_plaintext_triggers_reset() {
    init_tracing();
    let (left, right) = MemoryLink::pair(LinkConfig::lossless());
    let sink = Arc::new(Mutex::new(None));
    let tap = Tap {
        inner: right,
        sink: Arc::clone(&sink),
    };
    let mut a = Peer::spawn(config(identity()), left);
    let mut b = Peer::spawn(config(identity()), tap);
    a.established().await;
    b.established().await;

    let inject = sink.lock().unwrap().clone().unwrap();
    inject
        .deliver(encode_unsealed(FrameType::Plaintext, b"sneaky"))
        .unwrap();

    let mut faulted = false;
    loop {
        match within(b.events.next()).await {
            Some(SessionEvent::Error(SessionError::UnexpectedPlaintext)) => faulted = true,
            // A fresh handshake after the fault
            Some(SessionEvent::Established { .. }) if faulted => break,
            Some(SessionEvent::Message(payload)) => panic!("plaintext surfaced: {payload:?}"),
            Some(_) => {}
            None => panic!("event stream ended"),
        }
    }

    // Both sides recover and keep talking
    within(a.handle.send("still here").unwrap()).await.unwrap();
    assert_eq!(b.message().await, b"still here");
    within(b.handle.send("me too").unwrap()).await.unwrap();
    assert_eq!(a.message().await, b"me too");
}

#[tokio::test]
async fn destroy_is_idempotent_and_cancels_pending() {
    init_tracing();
    // Nobody answers on the other end, so nothing is ever confirmed.
    let (left, _silent) = MemoryLink::pair(LinkConfig::lossless());
    let mut a = Peer::spawn(config(identity()), left);

    let first = a.handle.send("one").unwrap();
    let second = a.handle.send("two").unwrap();
    assert_eq!(a.handle.state(), LifecycleState::Handshaking);

    let teardown = a.handle.destroy();
    within(a.handle.destroy()).await;
    within(teardown).await;

    assert!(matches!(within(first).await, Err(SessionError::Cancelled)));
    assert!(matches!(within(second).await, Err(SessionError::Cancelled)));
    assert!(matches!(a.handle.send("three"), Err(SessionError::SessionClosed)));
    assert!(a.handle.is_closed());
    assert_eq!(a.handle.state(), LifecycleState::Destroyed);
    assert!(within(a.events.next()).await.is_none());
}

#[tokio::test]
async fn lossy_link_delivers_large_payloads() {
    init_tracing();
    let link = LinkConfig::lossy(0.5).with_seed(0x5eed);
    let (mut a, mut b) = linked(link, config(identity()), config(identity()));

    let from_a = pattern(48_000, 1);
    let from_b = pattern(32_000, 2);
    let a_delivery = a.handle.send(from_a.clone()).unwrap();
    let b_delivery = b.handle.send(from_b.clone()).unwrap();

    within(a_delivery).await.unwrap();
    within(b_delivery).await.unwrap();
    assert_eq!(b.message().await, from_a);
    assert_eq!(a.message().await, from_b);
}

/// Noise engine that never confirms its teardown.
struct Stubborn(NoiseEngine);

impl EncryptionEngine for Stubborn {
    fn initiate(&mut self) -> Result<(), EngineError> {
        self.0.initiate()
    }

    fn encrypt_and_send(&mut self, plaintext: &[u8]) -> Result<(), EngineError> {
        self.0.encrypt_and_send(plaintext)
    }

    fn receive(&mut self, frame: &[u8]) {
        self.0.receive(frame);
    }

    fn end_session(&mut self) {}

    fn peer_fingerprint(&self) -> Option<Fingerprint> {
        self.0.peer_fingerprint()
    }

    fn peer_instance_tag(&self) -> Option<InstanceTag> {
        self.0.peer_instance_tag()
    }
}

struct StubbornFactory;

impl EngineFactory for StubbornFactory {
    type Engine = Stubborn;

    fn create(&mut self, params: &EngineParams, events: EngineEvents) -> Result<Stubborn, EngineError> {
        Ok(Stubborn(NoiseEngine::new(params, events)))
    }
}

#[tokio::test]
async fn hung_teardown_is_bounded() {
    init_tracing();
    let timeout_after = Duration::from_millis(150);
    let a_config = SessionConfig::builder()
        .identity(identity())
        .teardown_timeout(timeout_after)
        .build()
        .unwrap();
    let (left, right) = MemoryLink::pair(LinkConfig::lossless());
    let (a, _a_events) = SessionManager::spawn(a_config, StubbornFactory, left).unwrap();
    let mut b = Peer::spawn(config(identity()), right);

    within(a.wait_for(LifecycleState::Established)).await.unwrap();
    b.established().await;

    let started = Instant::now();
    a.reset().unwrap();
    within(a.wait_for(LifecycleState::Resetting)).await.unwrap();
    within(a.wait_for(LifecycleState::Established)).await.unwrap();
    assert!(started.elapsed() >= timeout_after);

    within(a.send("recovered").unwrap()).await.unwrap();
    assert_eq!(b.message().await, b"recovered");

    // Destroy is bounded the same way
    let started = Instant::now();
    within(a.destroy()).await;
    assert!(started.elapsed() >= timeout_after);
}

#[tokio::test]
async fn sessions_over_udp() {
    init_tracing();
    let left = DatagramTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let right = DatagramTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    left.connect(right.local_addr().unwrap()).await.unwrap();
    right.connect(left.local_addr().unwrap()).await.unwrap();

    let mut a = Peer::spawn(config(identity()), left);
    let mut b = Peer::spawn(config(identity()), right);

    within(a.handle.send("hey").unwrap()).await.unwrap();
    within(b.handle.send("ho").unwrap()).await.unwrap();
    assert_eq!(b.message().await, b"hey");
    assert_eq!(a.message().await, b"ho");

    within(a.handle.destroy()).await;
    within(b.handle.destroy()).await;
}
