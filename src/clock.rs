//! Vector clock: a fixed-length vector of logical timestamps, one slot per
//! process in the group.
//!
//! `CausalProcess` uses [`VectorClock::merge`] (max-only) together with
//! [`VectorClock::expected_clock_for`] to decide whether a received message
//! is the next causally deliverable one from its sender — the two
//! operations are only consistent with each other if merge does not also
//! bump the own slot.

use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// A process's logical clock: `vector[i]` is this process's best knowledge
/// of process `i`'s event count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    vector: Vec<u64>,
    process_id: usize,
}

impl VectorClock {
    /// Creates a new all-zero vector clock for `process_id` within a group
    /// of `num_processes`.
    ///
    /// Fails with `InvalidConfig` if `num_processes == 0` or
    /// `process_id >= num_processes`.
    pub fn new(num_processes: usize, process_id: usize) -> Result<Self, EndpointError> {
        if num_processes == 0 {
            return Err(EndpointError::InvalidConfig(
                "num_processes must be greater than zero".to_string(),
            ));
        }
        if process_id >= num_processes {
            return Err(EndpointError::InvalidConfig(format!(
                "process_id {process_id} out of range [0, {num_processes})"
            )));
        }

        Ok(Self {
            vector: vec![0; num_processes],
            process_id,
        })
    }

    /// This process's index into the vector.
    pub fn process_id(&self) -> usize {
        self.process_id
    }

    /// Number of slots (the size of the process group).
    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Read-only view of the current vector.
    pub fn as_slice(&self) -> &[u64] {
        &self.vector
    }

    /// Adds 1 to the own slot. Called exactly once per locally-originated
    /// application send.
    pub fn increment(&mut self) {
        self.vector[self.process_id] += 1;
    }

    /// Merges a received vector into the local one: `local[i] = max(local[i], R[i])`.
    ///
    /// Does not touch the own slot, which keeps this consistent with
    /// [`Self::expected_clock_for`] as a causal-readiness predicate — a
    /// merge that also advanced the own slot would make the predicate
    /// unsatisfiable. Panics if `received.len() != self.len()`; callers
    /// only reach this after `decode` has already checked the length
    /// against the group size.
    pub fn merge(&mut self, received: &[u64]) {
        assert_eq!(
            received.len(),
            self.vector.len(),
            "merge called with a vector of the wrong length"
        );
        for (local, remote) in self.vector.iter_mut().zip(received.iter()) {
            *local = (*local).max(*remote);
        }
    }

    /// Returns a copy of the local vector with slot `sender_id` incremented
    /// by one — the vector a message from `sender_id` must carry to be the
    /// next deliverable message from that sender.
    pub fn expected_clock_for(&self, sender_id: usize) -> Vec<u64> {
        let mut expected = self.vector.clone();
        expected[sender_id] += 1;
        expected
    }

    /// Serializes the vector as comma-separated decimal integers, e.g.
    /// `"3,0,7"`. No brackets are emitted, though [`Self::decode`] tolerates
    /// them on input.
    pub fn encode(&self) -> String {
        self.vector
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses a comma-separated vector, tolerating surrounding `[`/`]`.
    ///
    /// Fails with `MalformedVector` if any element fails to parse as a
    /// non-negative integer, or if the element count does not match `n`.
    pub fn decode(s: &str, n: usize) -> Result<Vec<u64>, EndpointError> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        if trimmed.is_empty() && n == 0 {
            return Ok(Vec::new());
        }

        let mut values = Vec::with_capacity(n);
        for part in trimmed.split(',') {
            let part = part.trim();
            let value: u64 = part
                .parse()
                .map_err(|_| EndpointError::MalformedVector(format!("not an integer: {part:?}")))?;
            values.push(value);
        }

        if values.len() != n {
            return Err(EndpointError::MalformedVector(format!(
                "expected {n} elements, got {}",
                values.len()
            )));
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_invalid_group() {
        assert!(VectorClock::new(0, 0).is_err());
        assert!(VectorClock::new(2, 2).is_err());
        assert!(VectorClock::new(2, 0).is_ok());
    }

    #[test]
    fn increment_bumps_own_slot_only() {
        let mut clock = VectorClock::new(3, 1).unwrap();
        clock.increment();
        assert_eq!(clock.as_slice(), &[0, 1, 0]);
    }

    #[test]
    fn merge_takes_elementwise_max_without_own_bump() {
        let mut clock = VectorClock::new(3, 0).unwrap();
        clock.increment(); // [1,0,0]
        clock.merge(&[0, 2, 1]);
        assert_eq!(clock.as_slice(), &[1, 2, 1]);
    }

    #[test]
    fn expected_clock_for_increments_sender_slot_only() {
        let clock = VectorClock::new(3, 0).unwrap();
        assert_eq!(clock.expected_clock_for(1), vec![0, 1, 0]);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut clock = VectorClock::new(3, 0).unwrap();
        clock.merge(&[3, 0, 7]);
        assert_eq!(clock.encode(), "3,0,7");
        assert_eq!(VectorClock::decode(&clock.encode(), 3).unwrap(), vec![3, 0, 7]);
    }

    #[test]
    fn decode_tolerates_brackets_and_whitespace() {
        assert_eq!(VectorClock::decode("[3, 0, 7]", 3).unwrap(), vec![3, 0, 7]);
    }

    #[test]
    fn decode_rejects_wrong_length_or_non_integer() {
        assert!(VectorClock::decode("1,2", 3).is_err());
        assert!(VectorClock::decode("1,x,3", 3).is_err());
    }

    #[test]
    fn single_process_group_reduces_to_a_scalar() {
        // A single-process group reduces the vector to one slot, and every
        // increment affects it.
        let mut clock = VectorClock::new(1, 0).unwrap();
        assert_eq!(clock.as_slice(), &[0]);
        clock.increment();
        assert_eq!(clock.as_slice(), &[1]);
        assert_eq!(clock.encode(), "1");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut clock = VectorClock::new(2, 0).unwrap();
        clock.merge(&[2, 5]);
        let once = clock.as_slice().to_vec();
        clock.merge(&[2, 5]);
        assert_eq!(clock.as_slice(), once.as_slice());
    }
}
