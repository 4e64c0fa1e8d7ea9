use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, trace};

use crate::error::NetError;

/// The send half of the datagram endpoint, as seen by the rest of the messaging layer. It is
///  passed around as `Arc<dyn Transport>` so the components that emit frames (retry sweep,
///  acknowledgments, handshake replies) can be exercised without sockets.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_addr(&self) -> SocketAddr;

    async fn try_send(&self, to: SocketAddr, frame: &[u8]) -> Result<(), NetError>;

    /// send, containing socket errors: they are logged per call and never crash the caller
    async fn send(&self, to: SocketAddr, frame: &[u8]) {
        if let Err(e) = self.try_send(to, frame).await {
            error!("error sending datagram to {}: {}", to, e);
        }
    }
}

/// One unreliable datagram endpoint. A background task receives into an unbounded queue;
///  [UdpTransport::poll_datagram] drains it from a single consumer (the endpoint tick), so no
///  application logic ever runs on the receive task.
///
/// Datagrams larger than the configured receive buffer are truncated by the socket and fail
///  checksum verification downstream.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    inbound: Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
    recv_task: JoinHandle<()>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr, max_datagram_size: usize) -> anyhow::Result<UdpTransport> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let recv_socket = socket.clone();
        let recv_task = tokio::spawn(async move {
            let mut buf = vec![0u8; max_datagram_size];
            loop {
                let (num_read, from) = match recv_socket.recv_from(&mut buf).await {
                    Ok(x) => x,
                    Err(e) => {
                        error!("socket error: {}", e);
                        continue;
                    }
                };

                if sender.send((Bytes::copy_from_slice(&buf[..num_read]), from)).is_err() {
                    // consumer gone, we are shutting down
                    break;
                }
            }
        });

        Ok(UdpTransport {
            socket,
            local_addr,
            inbound: Mutex::new(receiver),
            recv_task,
        })
    }

    /// the next queued datagram, if any
    pub async fn poll_datagram(&self) -> Option<(Bytes, SocketAddr)> {
        self.inbound.lock().await.try_recv().ok()
    }

    /// Unblock and stop the receive task. In-flight datagrams still in the queue can be
    ///  drained afterwards; new ones are not accepted.
    pub fn shutdown(&self) {
        self.recv_task.abort();
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn try_send(&self, to: SocketAddr, frame: &[u8]) -> Result<(), NetError> {
        let num_sent = self.socket.send_to(frame, to).await?;
        trace!("sent {} bytes to {}", num_sent, to);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    async fn bind_test_transport() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 1472).await.unwrap()
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let a = bind_test_transport().await;
        let b = bind_test_transport().await;

        assert_ne!(a.local_addr().port(), 0);

        a.send(b.local_addr(), b"hello over udp").await;

        for _ in 0..100 {
            if let Some((datagram, from)) = b.poll_datagram().await {
                assert_eq!(&datagram[..], b"hello over udp");
                assert_eq!(from, a.local_addr());
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("datagram was not received");
    }

    #[tokio::test]
    async fn test_poll_on_empty_queue() {
        let transport = bind_test_transport().await;
        assert!(transport.poll_datagram().await.is_none());
    }

    #[tokio::test]
    async fn test_queued_datagrams_survive_shutdown() {
        let a = bind_test_transport().await;
        let b = bind_test_transport().await;

        a.send(b.local_addr(), b"queued").await;

        // wait for the receive task to enqueue it, then stop the task
        for _ in 0..100 {
            sleep(Duration::from_millis(5)).await;
            if !b.inbound.lock().await.is_empty() {
                break;
            }
        }
        b.shutdown();

        assert!(b.poll_datagram().await.is_some());
        assert!(b.poll_datagram().await.is_none());
    }
}
