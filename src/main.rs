//! Demo entrypoint for the causal messaging endpoint.
//!
//! Wires together a small two-node scenario: by default, ports `5000` and
//! `5001` act as process 0 and process 1 of a two-process group, each
//! sending a greeting to the other and printing whatever arrives in causal
//! order. This binary is a thin driver over [`Endpoint`]; a full HTTP/CLI
//! control surface is not implemented here.

mod causal;
mod clock;
mod config;
mod endpoint;
mod error;
mod simple;
mod transport;

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;

#[tokio::main]
async fn main() -> Result<()> {
    let port = env::args()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(5000);

    let (process_id, peer_port) = match port {
        5000 => (0, 5001),
        5001 => (1, 5000),
        _ => {
            anyhow::bail!("usage: causal-endpoint [5000|5001]");
        }
    };

    let config = EndpointConfig {
        process_id,
        num_processes: 2,
        listen_port: port,
        send_port: peer_port,
        address: "127.0.0.1".to_string(),
        max_delay: 0.0,
        loss_probability: 0.0,
        ack_loss_probability: 0.0,
        ack_timeout: Duration::from_millis(300),
        max_retries: 5,
        semantic: None,
    };

    println!("[endpoint {process_id}] listening on 127.0.0.1:{port}, peer at 127.0.0.1:{peer_port}");

    let endpoint = Endpoint::new(config)
        .await
        .context("failed to start causal endpoint")?;

    let peer_addr = format!("127.0.0.1:{peer_port}");
    endpoint
        .send(format!("hello from process {process_id}"), &peer_addr)
        .context("failed to enqueue greeting")?;

    loop {
        if let Some((payload, sender_ip)) = endpoint.receive() {
            println!("[endpoint {process_id}] delivered {payload:?} from {sender_ip}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
