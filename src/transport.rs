//! Reliable-over-unreliable unicast transport.
//!
//! `UnreliableTransport` owns a single pooled UDP socket and runs as a
//! single actor task that is the sole mutator of its ACK map, duplicate
//! set, and outbound retry state — a single owning activity with message
//! passing for mutations, rather than a lock shared across threads.
//! [`TransportHandle`] is a cheap, cloneable front for submitting sends and
//! observing shutdown.
//!
//! A datagram dropped pre-wire by `loss_probability` still arms a retry
//! timer exactly as a datagram that reached the wire but never got ACKed
//! would. Otherwise a lossy first attempt would never retry or give up at
//! all. Every attempt — the initial one and every retry — independently
//! rolls `loss_probability`.
//!
//! Similarly, duplicate data frames are dropped from *up-call* delivery (a
//! message id is delivered at most once) but still get an ACK attempt on
//! every receipt — an ACK-only receiver otherwise has no way to recover
//! from a lost first ACK once the sender has already given up retrying.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::config::EndpointConfig;
use crate::error::EndpointError;

const MAX_DATAGRAM_SIZE: usize = 1024;

/// Event surfaced to the layer above the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A fresh (non-duplicate) data frame, handed up as its raw decoded
    /// text plus the address it arrived from.
    Frame(String, SocketAddr),
    /// `max_retries` was exhausted for this outbound message without an ACK.
    GaveUp(u64),
}

enum ActorMsg {
    Send {
        dest: SocketAddr,
        payload: String,
        resp: oneshot::Sender<u64>,
    },
    EmitInitial {
        msg_id: u64,
    },
    RetryTimer {
        msg_id: u64,
    },
    Shutdown,
}

struct Outbound {
    payload: String,
    dest: SocketAddr,
    retries: u32,
}

/// Cheap, cloneable handle to a running transport actor.
#[derive(Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<ActorMsg>,
}

impl TransportHandle {
    /// Sends `payload` to `dest`. Returns the assigned message id. The send
    /// itself is asynchronous (delay, retries, ACK) and happens entirely in
    /// the actor task; this call only enqueues it.
    pub async fn send(&self, dest: SocketAddr, payload: String) -> Result<u64, EndpointError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ActorMsg::Send {
                dest,
                payload,
                resp: resp_tx,
            })
            .map_err(|_| EndpointError::TransportClosed)?;
        resp_rx.await.map_err(|_| EndpointError::TransportClosed)
    }

    /// Requests an orderly shutdown of the transport actor.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActorMsg::Shutdown);
    }
}

/// Spawns the transport actor bound to `config.address:config.listen_port`
/// and returns a handle plus the channel of events it produces.
pub async fn spawn(
    config: &EndpointConfig,
) -> Result<(TransportHandle, mpsc::UnboundedReceiver<TransportEvent>), EndpointError> {
    let bind_addr = format!("{}:{}", config.address, config.listen_port);
    let socket = UdpSocket::bind(&bind_addr)
        .await
        .map_err(EndpointError::PortUnavailable)?;

    let (actor_tx, actor_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let actor = TransportActor {
        socket: Arc::new(socket),
        outbound: HashMap::new(),
        received_ids: HashSet::new(),
        max_delay: config.max_delay,
        loss_probability: config.loss_probability,
        ack_loss_probability: config.ack_loss_probability,
        ack_timeout: config.ack_timeout,
        max_retries: config.max_retries,
        self_tx: actor_tx.clone(),
        event_tx,
    };

    tokio::spawn(actor.run(actor_rx));

    Ok((TransportHandle { tx: actor_tx }, event_rx))
}

struct TransportActor {
    socket: Arc<UdpSocket>,
    outbound: HashMap<u64, Outbound>,
    received_ids: HashSet<u64>,
    max_delay: f64,
    loss_probability: f64,
    ack_loss_probability: f64,
    ack_timeout: Duration,
    max_retries: u32,
    self_tx: mpsc::UnboundedSender<ActorMsg>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportActor {
    async fn run(mut self, mut actor_rx: mpsc::UnboundedReceiver<ActorMsg>) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                msg = actor_rx.recv() => {
                    match msg {
                        Some(ActorMsg::Shutdown) | None => break,
                        Some(ActorMsg::Send { dest, payload, resp }) => {
                            let msg_id = self.start_send(dest, payload).await;
                            let _ = resp.send(msg_id);
                        }
                        Some(ActorMsg::EmitInitial { msg_id }) => self.on_emit_initial(msg_id).await,
                        Some(ActorMsg::RetryTimer { msg_id }) => self.on_retry_timer(msg_id).await,
                    }
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((n, addr)) => self.on_datagram(&buf[..n], addr).await,
                        Err(e) => {
                            eprintln!("[transport] recv error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn start_send(&mut self, dest: SocketAddr, payload: String) -> u64 {
        let msg_id: u64 = rand::random();
        self.outbound.insert(
            msg_id,
            Outbound {
                payload,
                dest,
                retries: 0,
            },
        );

        let delay = sample_delay(self.max_delay);
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let _ = self_tx.send(ActorMsg::EmitInitial { msg_id });
        });

        msg_id
    }

    async fn on_emit_initial(&mut self, msg_id: u64) {
        self.emit_attempt(msg_id).await;
    }

    async fn on_retry_timer(&mut self, msg_id: u64) {
        let Some(retries) = self.outbound.get(&msg_id).map(|o| o.retries) else {
            return; // ACKed or already abandoned; stale timer.
        };

        if retries < self.max_retries {
            if let Some(o) = self.outbound.get_mut(&msg_id) {
                o.retries += 1;
            }
            self.emit_attempt(msg_id).await;
        } else {
            self.outbound.remove(&msg_id);
            println!("[transport] giving up on message {msg_id} after {retries} retries");
            let _ = self.event_tx.send(TransportEvent::GaveUp(msg_id));
        }
    }

    /// Performs one emission attempt (the initial send or a retransmission)
    /// and arms the next retry timer unconditionally, per the reconciliation
    /// described in the module doc comment.
    async fn emit_attempt(&mut self, msg_id: u64) {
        let Some(o) = self.outbound.get(&msg_id) else {
            return;
        };

        if roll(self.loss_probability) {
            println!("[transport] dropping outbound datagram {msg_id} (injected loss)");
        } else {
            let frame = format!("{msg_id}:{}", o.payload);
            if let Err(e) = self.socket.send_to(frame.as_bytes(), o.dest).await {
                eprintln!("[transport] send error for {msg_id}: {e}");
            }
        }

        let self_tx = self.self_tx.clone();
        let timeout = self.ack_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let _ = self_tx.send(ActorMsg::RetryTimer { msg_id });
        });
    }

    async fn on_datagram(&mut self, bytes: &[u8], addr: SocketAddr) {
        let text = match std::str::from_utf8(bytes) {
            Ok(t) => t,
            Err(_) => {
                log_malformed(addr, "not valid UTF-8".to_string());
                return;
            }
        };

        if let Some(rest) = text.strip_prefix("ACK:") {
            match rest.parse::<u64>() {
                Ok(msg_id) => {
                    if self.outbound.remove(&msg_id).is_some() {
                        println!("[transport] ACK received for {msg_id}");
                    }
                    // Unknown-id ACKs are ignored.
                }
                Err(_) => log_malformed(addr, format!("bad ACK {text:?}")),
            }
            return;
        }

        let Some((id_str, payload)) = text.split_once(':') else {
            log_malformed(addr, format!("{text:?} has no ':' separator"));
            return;
        };

        let msg_id = match id_str.parse::<u64>() {
            Ok(id) => id,
            Err(_) => {
                log_malformed(addr, format!("bad message id {id_str:?}"));
                return;
            }
        };

        let is_new = self.received_ids.insert(msg_id);
        if is_new {
            let _ = self
                .event_tx
                .send(TransportEvent::Frame(payload.to_string(), addr));
        }

        if roll(self.ack_loss_probability) {
            println!("[transport] dropping outgoing ACK for {msg_id} (injected loss)");
        } else {
            let ack = format!("ACK:{msg_id}");
            if let Err(e) = self.socket.send_to(ack.as_bytes(), addr).await {
                eprintln!("[transport] ack send error for {msg_id}: {e}");
            }
        }
    }
}

/// Logs a frame the receive loop could not parse. Never fatal: the caller
/// drops the datagram and keeps serving the socket.
fn log_malformed(addr: SocketAddr, reason: String) {
    let err = EndpointError::MalformedFrame(reason);
    println!("[transport] dropping malformed frame from {addr}: {err}");
}

fn sample_delay(max_delay: f64) -> Duration {
    if max_delay <= 0.0 {
        return Duration::ZERO;
    }
    let secs = rand::thread_rng().gen_range(0.0..=max_delay);
    Duration::from_secs_f64(secs)
}

fn roll(probability: f64) -> bool {
    if probability <= 0.0 {
        false
    } else if probability >= 1.0 {
        true
    } else {
        rand::thread_rng().gen_bool(probability)
    }
}
