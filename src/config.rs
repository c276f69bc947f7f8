//! Endpoint configuration.
//!
//! Parsing this struct out of argv, a file, or environment variables is a
//! hosting process's job; this crate only validates and consumes an
//! already-constructed [`EndpointConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Delivery semantic selected for [`crate::simple::SimpleEndpoint`]. Not
/// used by the causal layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliverySemantic {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl DeliverySemantic {
    /// Parses one of the three delivery semantic names. An unknown name
    /// fails with `InvalidConfig`.
    pub fn parse(name: &str) -> Result<Self, EndpointError> {
        match name {
            "at_most_once" => Ok(Self::AtMostOnce),
            "at_least_once" => Ok(Self::AtLeastOnce),
            "exactly_once" => Ok(Self::ExactlyOnce),
            other => Err(EndpointError::InvalidConfig(format!(
                "unknown delivery semantic {other:?}, expected one of \
                 at_most_once, at_least_once, exactly_once"
            ))),
        }
    }
}

/// Every configuration knob an endpoint needs to bind and run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Index into the vector clock; required, must be in `[0, num_processes)`.
    pub process_id: usize,
    /// Vector length N; required, must be greater than zero.
    pub num_processes: usize,
    /// UDP port this endpoint listens on.
    pub listen_port: u16,
    /// UDP port peers should use when replying to this endpoint.
    pub send_port: u16,
    /// Local bind address.
    pub address: String,
    /// Upper bound of the uniform pre-send delay distribution, in seconds.
    pub max_delay: f64,
    /// Pre-send drop probability for data frames, in `[0, 1]`.
    pub loss_probability: f64,
    /// Drop probability for outgoing ACKs, in `[0, 1]`.
    pub ack_loss_probability: f64,
    /// Retransmission timer duration.
    pub ack_timeout: Duration,
    /// Retry cap before abandonment.
    pub max_retries: u32,
    /// Delivery semantic for the simple sender/receiver pair; unused by the
    /// causal layer.
    pub semantic: Option<DeliverySemantic>,
}

impl EndpointConfig {
    /// Validates the configuration, surfacing every failure mode as
    /// `InvalidConfig`.
    pub fn validate(&self) -> Result<(), EndpointError> {
        if self.num_processes == 0 {
            return Err(EndpointError::InvalidConfig(
                "num_processes must be greater than zero".to_string(),
            ));
        }
        if self.process_id >= self.num_processes {
            return Err(EndpointError::InvalidConfig(format!(
                "process_id {} out of range [0, {})",
                self.process_id, self.num_processes
            )));
        }
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(EndpointError::InvalidConfig(
                "loss_probability must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ack_loss_probability) {
            return Err(EndpointError::InvalidConfig(
                "ack_loss_probability must be in [0, 1]".to_string(),
            ));
        }
        if self.max_delay < 0.0 {
            return Err(EndpointError::InvalidConfig(
                "max_delay must be non-negative".to_string(),
            ));
        }
        if self.ack_timeout.is_zero() {
            return Err(EndpointError::InvalidConfig(
                "ack_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> EndpointConfig {
        EndpointConfig {
            process_id: 0,
            num_processes: 2,
            listen_port: 6000,
            send_port: 6001,
            address: "127.0.0.1".to_string(),
            max_delay: 0.0,
            loss_probability: 0.0,
            ack_loss_probability: 0.0,
            ack_timeout: Duration::from_millis(200),
            max_retries: 3,
            semantic: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn process_id_out_of_range_is_rejected() {
        let mut config = base_config();
        config.process_id = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_processes_is_rejected() {
        let mut config = base_config();
        config.num_processes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_probabilities_are_rejected() {
        let mut config = base_config();
        config.loss_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.ack_loss_probability = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ack_timeout_is_rejected() {
        let mut config = base_config();
        config.ack_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_semantic_name_is_rejected() {
        assert!(DeliverySemantic::parse("best_effort").is_err());
        assert!(matches!(
            DeliverySemantic::parse("exactly_once"),
            Ok(DeliverySemantic::ExactlyOnce)
        ));
    }
}
