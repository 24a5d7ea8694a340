//! Sequence numbers and in-flight command tracking.
//!
//! Every command frame carries a 16 bit sequence number that the bridge
//! echoes in its `0x88` acknowledgement. The [`SequenceCounter`] hands out
//! numbers to any thread building commands; the [`SequenceTracker`] lives
//! with the session and remembers which numbers are still unconfirmed.
//!
//! ## Lost commands
//!
//! Commands without acknowledgement are never retried. After
//! [`MAX_PACKET_IN_FLIGHT_MS`] they are evicted by
//! [`SequenceTracker::evict_expired`] and reported only in the log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use milight_protocol::MAX_PACKET_IN_FLIGHT_MS;

/// Thread-safe source of sequence numbers. Wraps around at `u16::MAX`.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU16,
}

impl SequenceCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence number.
    pub fn allocate(&self) -> u16 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Tracks commands that have been sent but not yet acknowledged.
#[derive(Debug)]
pub struct SequenceTracker {
    /// Sequence number -> time the command was built.
    in_flight: BTreeMap<u16, Instant>,
    /// Age after which a command counts as lost.
    max_age: Duration,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    /// Create a tracker with the protocol's in-flight limit.
    pub fn new() -> Self {
        Self::with_max_age(Duration::from_millis(MAX_PACKET_IN_FLIGHT_MS))
    }

    /// Create a tracker with a custom in-flight limit.
    pub fn with_max_age(max_age: Duration) -> Self {
        SequenceTracker {
            in_flight: BTreeMap::new(),
            max_age,
        }
    }

    /// Remember that a command with this sequence number was sent.
    pub fn track(&mut self, sequence: u16, sent_at: Instant) {
        self.in_flight.insert(sequence, sent_at);
    }

    /// Mark a command as delivered.
    ///
    /// Returns how long the acknowledgement took, or `None` if the sequence
    /// number was not in flight.
    pub fn confirm(&mut self, sequence: u16, now: Instant) -> Option<Duration> {
        self.in_flight
            .remove(&sequence)
            .map(|sent_at| now.saturating_duration_since(sent_at))
    }

    /// Remove commands older than the in-flight limit.
    ///
    /// Returns the evicted sequence numbers in ascending order.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<u16> {
        let expired: Vec<u16> = self
            .in_flight
            .iter()
            .filter(|(_, sent_at)| now.saturating_duration_since(**sent_at) > self.max_age)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in &expired {
            self.in_flight.remove(seq);
        }
        expired
    }

    /// Forget all tracked commands.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// Number of commands in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether no command is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Whether the given sequence number is in flight.
    pub fn contains(&self, sequence: u16) -> bool {
        self.in_flight.contains_key(&sequence)
    }
}
