//! The glue that wires the vector clock, transport, and causal delivery
//! layers together and exposes the three operations an external HTTP/CLI
//! layer would consume: `send`, `receive`, `id`. This crate does not
//! implement that outer HTTP/CLI layer, only the contract it would call.

use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::causal::{self, CausalHandle};
use crate::config::EndpointConfig;
use crate::error::EndpointError;
use crate::transport::{self, TransportHandle};

/// A fully wired causal messaging endpoint: vector clock + unreliable
/// transport + causal delivery, behind a three-operation control surface.
pub struct Endpoint {
    process_id: usize,
    causal: CausalHandle,
    transport: TransportHandle,
    delivery_rx: Mutex<mpsc::UnboundedReceiver<(String, String)>>,
    gave_up_rx: Mutex<mpsc::UnboundedReceiver<u64>>,
}

impl Endpoint {
    /// Validates `config`, binds the transport, and starts the causal actor.
    pub async fn new(config: EndpointConfig) -> Result<Self, EndpointError> {
        config.validate()?;

        let (transport_handle, transport_events) = transport::spawn(&config).await?;
        let (causal_handle, delivery_rx, gave_up_rx) = causal::spawn(
            config.process_id,
            config.address.clone(),
            config.num_processes,
            transport_handle.clone(),
            transport_events,
        )?;

        Ok(Self {
            process_id: config.process_id,
            causal: causal_handle,
            transport: transport_handle,
            delivery_rx: Mutex::new(delivery_rx),
            gave_up_rx: Mutex::new(gave_up_rx),
        })
    }

    /// Enqueues an outbound causal send to `dest_addr`.
    pub fn send(&self, payload: String, dest_addr: &str) -> Result<(), EndpointError> {
        let dest: SocketAddr = dest_addr
            .parse()
            .map_err(|_| EndpointError::InvalidConfig(format!("invalid destination address {dest_addr:?}")))?;
        self.causal.send(dest, payload)
    }

    /// Non-blocking pop from the delivery queue. Returns `None` when
    /// nothing has been causally delivered yet.
    pub fn receive(&self) -> Option<(String, String)> {
        self.delivery_rx.lock().expect("delivery queue poisoned").try_recv().ok()
    }

    /// Non-blocking pop of the next message id whose outbound delivery was
    /// abandoned after exhausting its retry budget. Returns `None` when
    /// there is nothing to report. Callers that care about delivery
    /// failures for their own sends should poll this alongside `receive`.
    pub fn gave_up(&self) -> Option<u64> {
        self.gave_up_rx.lock().expect("gave-up queue poisoned").try_recv().ok()
    }

    /// This endpoint's static process id.
    pub fn id(&self) -> usize {
        self.process_id
    }

    /// Cancels outstanding transport timers and closes the listen socket.
    /// Operations issued after shutdown return `TransportClosed`.
    pub fn shutdown(&self) {
        self.transport.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    fn config_for(listen_port: u16, send_port: u16, process_id: usize) -> EndpointConfig {
        EndpointConfig {
            process_id,
            num_processes: 2,
            listen_port,
            send_port,
            address: "127.0.0.1".to_string(),
            max_delay: 0.0,
            loss_probability: 0.0,
            ack_loss_probability: 0.0,
            ack_timeout: Duration::from_millis(150),
            max_retries: 3,
            semantic: None,
        }
    }

    #[tokio::test]
    async fn send_then_receive_round_trip() {
        let p0 = Endpoint::new(config_for(19_000, 19_001, 0)).await.unwrap();
        let p1 = Endpoint::new(config_for(19_001, 19_000, 1)).await.unwrap();

        assert_eq!(p0.id(), 0);
        assert_eq!(p1.id(), 1);
        assert!(p1.receive().is_none());

        p0.send("hello".to_string(), "127.0.0.1:19001").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut delivered = None;
        while tokio::time::Instant::now() < deadline {
            if let Some(entry) = p1.receive() {
                delivered = Some(entry);
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        let (payload, sender_ip) = delivered.expect("message should have been delivered");
        assert_eq!(payload, "hello");
        assert_eq!(sender_ip, "127.0.0.1");
    }

    #[tokio::test]
    async fn invalid_destination_address_is_rejected() {
        let p0 = Endpoint::new(config_for(19_010, 19_011, 0)).await.unwrap();
        let result = p0.send("hello".to_string(), "not-an-address");
        assert!(matches!(result, Err(EndpointError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn unreachable_peer_surfaces_gave_up_through_the_control_surface() {
        let mut config = config_for(19_020, 19_021, 0);
        config.max_retries = 1;
        config.ack_timeout = Duration::from_millis(40);
        let p0 = Endpoint::new(config).await.unwrap();

        assert!(p0.gave_up().is_none());

        // Nobody is listening on the peer port, so no ACK ever arrives.
        p0.send("hello".to_string(), "127.0.0.1:19021").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let mut gave_up = None;
        while tokio::time::Instant::now() < deadline {
            if let Some(msg_id) = p0.gave_up() {
                gave_up = Some(msg_id);
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        assert!(gave_up.is_some(), "give-up should surface through the control surface");
    }
}
