//! Stand-alone sender/receiver pair with selectable delivery semantics.
//! Shares wire-level framing with [`crate::transport`] but is deliberately
//! a separate, smaller implementation: it has neither a vector clock nor a
//! holdback queue, and `exactly_once`'s dedup id is sender-chosen rather
//! than transport-assigned.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::DeliverySemantic;
use crate::error::EndpointError;

const MAX_DATAGRAM_SIZE: usize = 1024;

/// A minimal endpoint speaking one of three delivery semantics over a
/// single UDP socket.
pub struct SimpleEndpoint {
    socket: Arc<UdpSocket>,
    semantic: DeliverySemantic,
    ack_timeout: Duration,
    max_retries: u32,
    delivered_ids: Mutex<HashSet<u64>>,
}

impl SimpleEndpoint {
    /// Binds a new endpoint. `semantic` governs both `send` and `recv_next`.
    pub async fn bind(
        address: &str,
        port: u16,
        semantic: DeliverySemantic,
        ack_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, EndpointError> {
        let socket = UdpSocket::bind(format!("{address}:{port}"))
            .await
            .map_err(EndpointError::PortUnavailable)?;
        Ok(Self {
            socket: Arc::new(socket),
            semantic,
            ack_timeout,
            max_retries,
            delivered_ids: Mutex::new(HashSet::new()),
        })
    }

    /// Sends `payload` to `dest`. `id` is the sender-chosen identifier used
    /// only by `exactly_once`; it is ignored for the other two semantics.
    pub async fn send(&self, dest: SocketAddr, id: u64, payload: &str) -> Result<(), EndpointError> {
        match self.semantic {
            DeliverySemantic::AtMostOnce => {
                self.socket
                    .send_to(payload.as_bytes(), dest)
                    .await
                    .map_err(|_| EndpointError::TransportClosed)?;
                Ok(())
            }
            DeliverySemantic::AtLeastOnce => self.send_until_acked(dest, payload.as_bytes().to_vec(), "ACK").await,
            DeliverySemantic::ExactlyOnce => {
                let frame = format!("{id}:{payload}");
                let expected_ack = format!("ACK:{id}");
                self.send_until_acked(dest, frame.into_bytes(), &expected_ack).await
            }
        }
    }

    async fn send_until_acked(
        &self,
        dest: SocketAddr,
        frame: Vec<u8>,
        expected_ack: &str,
    ) -> Result<(), EndpointError> {
        let mut attempts = 0u32;
        loop {
            self.socket
                .send_to(&frame, dest)
                .await
                .map_err(|_| EndpointError::TransportClosed)?;

            match timeout(self.ack_timeout, self.wait_for_ack(expected_ack)).await {
                Ok(()) => return Ok(()),
                Err(_) => {
                    if attempts >= self.max_retries {
                        let id = expected_ack
                            .strip_prefix("ACK:")
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(0);
                        return Err(EndpointError::DeliveryGaveUp(id));
                    }
                    attempts += 1;
                    println!("[simple] no ack for {expected_ack:?} within timeout, retrying (attempt {attempts})");
                }
            }
        }
    }

    async fn wait_for_ack(&self, expected: &str) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            if let Ok((n, _addr)) = self.socket.recv_from(&mut buf).await {
                if let Ok(text) = std::str::from_utf8(&buf[..n]) {
                    if text == expected {
                        return;
                    }
                }
            }
        }
    }

    /// Receives the next application-visible datagram, handling framing and
    /// ACKs per the configured semantic. For `at_least_once` every received
    /// datagram is delivered (no dedup, by definition of the semantic); for
    /// `exactly_once`, duplicates are ACKed again but not redelivered.
    pub async fn recv_next(&self) -> Result<(String, SocketAddr), EndpointError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (n, addr) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|_| EndpointError::TransportClosed)?;

            let text = match std::str::from_utf8(&buf[..n]) {
                Ok(t) => t.to_string(),
                Err(_) => {
                    println!("[simple] malformed frame from {addr}: not valid UTF-8");
                    continue;
                }
            };

            match self.semantic {
                DeliverySemantic::AtMostOnce => return Ok((text, addr)),
                DeliverySemantic::AtLeastOnce => {
                    let _ = self.socket.send_to(b"ACK", addr).await;
                    return Ok((text, addr));
                }
                DeliverySemantic::ExactlyOnce => {
                    let Some((id_str, payload)) = text.split_once(':') else {
                        println!("[simple] malformed exactly-once frame from {addr}: {text:?}");
                        continue;
                    };
                    let Ok(id) = id_str.parse::<u64>() else {
                        println!("[simple] malformed exactly-once id from {addr}: {id_str:?}");
                        continue;
                    };

                    let ack = format!("ACK:{id}");
                    let _ = self.socket.send_to(ack.as_bytes(), addr).await;

                    let is_new = self.delivered_ids.lock().await.insert(id);
                    if is_new {
                        return Ok((payload.to_string(), addr));
                    }
                    // Already delivered once; ACKed again above, but no
                    // second up-call.
                }
            }
        }
    }
}
