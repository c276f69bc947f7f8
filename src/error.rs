use thiserror::Error;

/// Error taxonomy for the endpoint.
///
/// `InvalidConfig` and `PortUnavailable` are fatal at construction time.
/// `MalformedFrame`/`MalformedVector` are recoverable: the receive loop
/// logs and drops rather than propagating them. `DeliveryGaveUp` is
/// surfaced to the caller after `max_retries` is exhausted but does not
/// tear down the endpoint. `TransportClosed` is returned by any operation
/// attempted after shutdown and should be treated as normal termination.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("port unavailable: {0}")]
    PortUnavailable(std::io::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed vector: {0}")]
    MalformedVector(String),

    #[error("delivery gave up for message {0} after exhausting retries")]
    DeliveryGaveUp(u64),

    #[error("transport closed")]
    TransportClosed,
}
