//! Packet Relay/Batching Buffer.
//!
//! Inbound packet words are accumulated into an `OutboundBatch` and relayed
//! as one transport message when the batch fills, or when a pause or exit
//! forces a partial batch out. A send is retried until the transport
//! accepts it; under a bounded retry policy an exhausted send leaves the
//! batch intact so the next flush sends the same words again.
//!
//! ```text
//! Idle --on_packet--> Filling --count == capacity--> Full --flush--> Idle
//!   ^                   |                                           |
//!   +---- force_flush --+                                           |
//!   +---------------------------------------------------------------+
//! ```

use crate::common::data::Packet;
use crate::common::error::TransportBusy;
use crate::fabric::clock::Sleeper;
use crate::fabric::transport::{OutboundMessage, Routing, Transport};
use crate::runtime::buffer::OutboundBatch;
use crate::runtime::retry::{self, RetryPolicy};
use tracing::{debug, warn};

/// Why a batch was flushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    /// The batch reached capacity.
    Full,
    /// A pause or exit drained a partial batch.
    Forced,
    /// The application requested a flush.
    Explicit,
}

/// Outcome of a flush that sent a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushReport {
    pub reason: FlushReason,
    /// Payload words sent.
    pub count: usize,
    /// Transport attempts needed, including the accepted one.
    pub attempts: u32,
}

/// A packet could not be accepted because the full batch could not be sent.
///
/// The packet is handed back so the caller can hold on to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backpressure {
    pub packet: Packet,
    pub busy: TransportBusy,
}

/// Counters kept by the relay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayCounters {
    pub packets: u64,
    pub full_flushes: u64,
    pub forced_flushes: u64,
    pub explicit_flushes: u64,
    pub words_sent: u64,
    pub send_attempts: u64,
    pub busy_retries: u64,
    pub failed_flushes: u64,
}

/// Transport end of the relay: routing, retry policy and the wait source.
pub struct BatchSender {
    transport: Box<dyn Transport>,
    routing: Routing,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl BatchSender {
    pub fn new(
        transport: Box<dyn Transport>,
        routing: Routing,
        policy: RetryPolicy,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            routing,
            policy,
            sleeper,
        }
    }

    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// Sends `payloads` as one message, retrying per the policy.
    ///
    /// # Returns
    ///
    /// The number of attempts made, or `TransportBusy` once the policy is
    /// exhausted.
    fn send(&mut self, payloads: &[u32]) -> Result<u32, TransportBusy> {
        let message = OutboundMessage {
            routing: self.routing,
            payloads: payloads.to_vec(),
        };
        let transport = &mut self.transport;
        retry::run(&self.policy, self.sleeper.as_mut(), || {
            transport.try_send(&message)
        })
        .map(|ok| ok.attempts)
        .map_err(|exhausted| TransportBusy {
            attempts: exhausted.attempts,
        })
    }
}

/// Batching buffer in front of the outbound transport.
pub struct RelayBuffer {
    batch: OutboundBatch,
    sender: BatchSender,
    counters: RelayCounters,
}

impl RelayBuffer {
    pub fn new(capacity: usize, sender: BatchSender) -> Self {
        Self {
            batch: OutboundBatch::new(capacity),
            sender,
            counters: RelayCounters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.batch.capacity()
    }

    /// Words waiting in the current batch.
    pub fn pending(&self) -> usize {
        self.batch.count()
    }

    pub fn counters(&self) -> RelayCounters {
        self.counters
    }

    /// Adds a packet to the current batch, flushing when it becomes full.
    ///
    /// A batch left full by an earlier failed flush is sent first.
    pub fn on_packet(&mut self, packet: Packet) -> Result<Option<FlushReport>, Backpressure> {
        if self.batch.is_full() {
            self.flush(FlushReason::Full)
                .map_err(|busy| Backpressure { packet, busy })?;
        }

        self.batch.push(packet.word());
        self.counters.packets += 1;

        if self.batch.is_full() {
            // The packet is already stored; a failed send keeps it batched.
            return Ok(self.flush(FlushReason::Full).unwrap_or(None));
        }
        Ok(None)
    }

    /// Sends all occupied slots as one message and empties the batch.
    ///
    /// Flushing an empty batch sends nothing and returns `Ok(None)`.
    pub fn flush(&mut self, reason: FlushReason) -> Result<Option<FlushReport>, TransportBusy> {
        if self.batch.is_empty() {
            return Ok(None);
        }

        let count = self.batch.count();
        match self.sender.send(self.batch.as_slice()) {
            Ok(attempts) => {
                self.batch.clear();
                self.counters.words_sent += count as u64;
                self.counters.send_attempts += u64::from(attempts);
                self.counters.busy_retries += u64::from(attempts - 1);
                match reason {
                    FlushReason::Full => self.counters.full_flushes += 1,
                    FlushReason::Forced => self.counters.forced_flushes += 1,
                    FlushReason::Explicit => self.counters.explicit_flushes += 1,
                }
                debug!(?reason, count, attempts, "batch flushed");
                Ok(Some(FlushReport {
                    reason,
                    count,
                    attempts,
                }))
            }
            Err(busy) => {
                self.counters.send_attempts += u64::from(busy.attempts);
                self.counters.busy_retries += u64::from(busy.attempts);
                self.counters.failed_flushes += 1;
                warn!(?reason, count, attempts = busy.attempts, "transport busy, batch retained");
                Err(busy)
            }
        }
    }

    /// Drains a partially filled batch at pause or exit.
    pub fn force_flush(&mut self) -> Result<Option<FlushReport>, TransportBusy> {
        self.flush(FlushReason::Forced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::clock::ManualClock;
    use crate::fabric::transport::LoopbackTransport;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn relay(capacity: usize, transport: LoopbackTransport, policy: RetryPolicy) -> RelayBuffer {
        let sender = BatchSender::new(
            Box::new(transport),
            Routing::default(),
            policy,
            Box::new(ManualClock::new()),
        );
        RelayBuffer::new(capacity, sender)
    }

    #[test]
    fn full_batch_left_by_failed_flush_is_resent_first() {
        let transport = LoopbackTransport::with_busy_attempts(2);
        let log = transport.log();
        let policy = RetryPolicy::fixed(Duration::from_micros(1)).bounded(2);
        let mut relay = relay(2, transport, policy);

        assert_eq!(relay.on_packet(Packet::key_only(1)), Ok(None));
        // Fills the batch; both attempts are refused.
        assert_eq!(relay.on_packet(Packet::key_only(2)), Ok(None));
        assert_eq!(relay.pending(), 2);
        assert_eq!(relay.counters().failed_flushes, 1);

        // Third attempt overall is accepted, then the new packet starts a batch.
        let report = relay.on_packet(Packet::key_only(3)).unwrap();
        assert_eq!(report, None);
        assert_eq!(relay.pending(), 1);
        assert_eq!(log.delivered_words(), vec![1, 2]);
    }

    #[test]
    fn backpressure_returns_the_packet() {
        let transport = LoopbackTransport::with_busy_attempts(10);
        let policy = RetryPolicy::fixed(Duration::from_micros(1)).bounded(1);
        let mut relay = relay(1, transport, policy);

        assert_eq!(relay.on_packet(Packet::key_only(1)), Ok(None));
        let err = relay.on_packet(Packet::key_only(2)).unwrap_err();
        assert_eq!(err.packet, Packet::key_only(2));
        assert_eq!(relay.pending(), 1);
    }

    #[traced_test]
    #[test]
    fn exhausted_flush_is_logged_and_counted() {
        let transport = LoopbackTransport::with_busy_attempts(3);
        let policy = RetryPolicy::fixed(Duration::from_micros(2)).bounded(3);
        let mut relay = relay(4, transport, policy);

        relay.on_packet(Packet::key_only(9)).unwrap();
        assert_eq!(relay.force_flush(), Err(TransportBusy { attempts: 3 }));
        assert_eq!(relay.pending(), 1);

        let counters = relay.counters();
        assert_eq!(counters.failed_flushes, 1);
        assert_eq!(counters.send_attempts, 3);
        assert_eq!(counters.forced_flushes, 0);
        assert!(logs_contain("transport busy, batch retained"));

        // The transport accepts the fourth attempt.
        let report = relay.force_flush().unwrap().unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.attempts, 1);
        assert_eq!(relay.counters().forced_flushes, 1);
    }
}
