//! UDP datagram transport.
//!
//! One datagram carries one frame. Delivery is best effort: the socket is
//! connected to a single peer, and a frame counts as sent once the kernel
//! accepted it. A single writer task sends frames in the order they were
//! handed over.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::core::{FrameSink, SendReceipt, Transport, TransportError};

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM_SIZE: usize = 65507;

type Outgoing = (Vec<u8>, SendReceipt);

#[derive(Debug)]
struct Writer {
    tx: mpsc::UnboundedSender<Outgoing>,
    task: JoinHandle<()>,
}

impl Writer {
    fn spawn(socket: Arc<UdpSocket>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let task = tokio::spawn(async move {
            while let Some((frame, receipt)) = rx.recv().await {
                let result = socket
                    .send(&frame)
                    .await
                    .map(|_| ())
                    .map_err(TransportError::from);
                if let Err(error) = &result {
                    debug!(%error, len = frame.len(), "datagram send failed");
                }
                receipt.complete(result);
            }
        });
        Self { tx, task }
    }
}

/// [`Transport`] over a connected tokio [`UdpSocket`].
#[derive(Debug)]
pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
    recv_buffer_size: usize,
    receiver: Option<JoinHandle<()>>,
    writer: Option<Writer>,
}

impl DatagramTransport {
    /// Bind a socket to `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        DatagramTransportBuilder::new().bind(addr).await
    }

    /// Start building a transport with custom options.
    pub fn builder() -> DatagramTransportBuilder {
        DatagramTransportBuilder::new()
    }

    /// Wrap an existing socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        DatagramTransportBuilder::new().from_socket(socket)
    }

    /// Local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Connected peer address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Connect to the peer. Must happen before the session starts.
    pub async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        self.socket.connect(addr).await
    }

    fn stop_receiver(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }

    fn stop_writer(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.task.abort();
        }
    }
}

impl Transport for DatagramTransport {
    fn attach(&mut self, inbound: FrameSink) {
        self.stop_receiver();
        let socket = Arc::clone(&self.socket);
        let mut buffer = vec![0u8; self.recv_buffer_size];

        self.receiver = Some(tokio::spawn(async move {
            loop {
                match socket.recv(&mut buffer).await {
                    Ok(len) => {
                        if inbound.deliver(buffer[..len].to_vec()).is_err() {
                            trace!("receiving session is gone");
                            break;
                        }
                    }
                    // ICMP unreachable surfaces here on connected sockets.
                    Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                        trace!("peer unreachable");
                    }
                    Err(e) => {
                        warn!(error = %e, "datagram receive failed");
                        break;
                    }
                }
            }
        }));
    }

    fn send(&mut self, frame: Vec<u8>, receipt: SendReceipt) {
        if frame.len() > MAX_DATAGRAM_SIZE {
            receipt.complete(Err(TransportError::Rejected(format!(
                "frame of {} bytes exceeds a datagram",
                frame.len()
            ))));
            return;
        }

        let socket = &self.socket;
        let writer = self
            .writer
            .get_or_insert_with(|| Writer::spawn(Arc::clone(socket)));
        if let Err(mpsc::error::SendError((_, receipt))) = writer.tx.send((frame, receipt)) {
            receipt.complete(Err(TransportError::Closed));
        }
    }

    fn reset(&mut self) {
        debug!(peer = ?self.socket.peer_addr().ok(), "session reset");
    }

    fn close(&mut self) {
        self.stop_receiver();
        self.stop_writer();
        debug!(local = ?self.socket.local_addr().ok(), "datagram transport closed");
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.stop_receiver();
        self.stop_writer();
    }
}

/// Builder for [`DatagramTransport`].
#[derive(Debug, Clone)]
pub struct DatagramTransportBuilder {
    recv_buffer_size: usize,
}

impl Default for DatagramTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatagramTransportBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }

    /// Set the receive buffer size. Longer datagrams are truncated.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Bind to the given address and create a transport.
    pub async fn bind(self, addr: SocketAddr) -> io::Result<DatagramTransport> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(self.from_socket(socket))
    }

    /// Create a transport from an existing socket.
    pub fn from_socket(self, socket: UdpSocket) -> DatagramTransport {
        DatagramTransport {
            socket: Arc::new(socket),
            recv_buffer_size: self.recv_buffer_size,
            receiver: None,
            writer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::{Recorder, Signal};

    async fn connected_pair() -> (DatagramTransport, DatagramTransport) {
        let a = DatagramTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let b = DatagramTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (a, b)
    }

    async fn next_signal(recorder: &mut Recorder) -> Signal {
        tokio::time::timeout(Duration::from_secs(5), recorder.next())
            .await
            .expect("timed out")
            .expect("recorder closed")
    }

    #[tokio::test]
    async fn test_bind() {
        let transport = DatagramTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert!(transport.local_addr().unwrap().port() != 0);
    }

    #[tokio::test]
    async fn test_frames_cross_the_socket() {
        let (mut a, mut b) = connected_pair().await;
        assert_eq!(a.peer_addr().unwrap(), b.local_addr().unwrap());

        let mut a_recorder = Recorder::new();
        let mut b_recorder = Recorder::new();
        a.attach(a_recorder.frame_sink());
        b.attach(b_recorder.frame_sink());

        a.send(b"over udp".to_vec(), a_recorder.receipt(4, Some(1)));
        match next_signal(&mut a_recorder).await {
            Signal::Sent {
                generation, result, ..
            } => {
                assert_eq!(generation, 4);
                assert!(result.is_ok());
            }
            other => panic!("unexpected signal: {other:?}"),
        }
        match next_signal(&mut b_recorder).await {
            Signal::Inbound(frame) => assert_eq!(frame, b"over udp"),
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frames_leave_in_submission_order() {
        let (mut a, mut b) = connected_pair().await;
        let mut a_recorder = Recorder::new();
        let mut b_recorder = Recorder::new();
        a.attach(a_recorder.frame_sink());
        b.attach(b_recorder.frame_sink());

        for i in 0..64u8 {
            a.send(vec![i; 512], a_recorder.receipt(1, Some(u64::from(i))));
        }

        for i in 0..64u8 {
            match next_signal(&mut a_recorder).await {
                Signal::Sent { ticket, result, .. } => {
                    assert_eq!(ticket, Some(u64::from(i)));
                    assert!(result.is_ok());
                }
                other => panic!("unexpected signal: {other:?}"),
            }
        }
        for i in 0..64u8 {
            match next_signal(&mut b_recorder).await {
                Signal::Inbound(frame) => assert_eq!(frame, vec![i; 512]),
                other => panic!("unexpected signal: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, _b) = connected_pair().await;
        let mut recorder = Recorder::new();

        a.send(vec![0; MAX_DATAGRAM_SIZE + 1], recorder.receipt(1, Some(1)));
        assert!(matches!(
            recorder.try_next(),
            Some(Signal::Sent {
                result: Err(TransportError::Rejected(_)),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_builder() {
        let transport = DatagramTransport::builder()
            .recv_buffer_size(4096)
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(transport.recv_buffer_size, 4096);
    }
}
