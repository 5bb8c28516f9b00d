//! Integration tests for the packet relay batching buffer.

use std::time::Duration;

use fabric_runtime::common::data::Packet;
use fabric_runtime::common::error::TransportBusy;
use fabric_runtime::fabric::clock::ManualClock;
use fabric_runtime::fabric::transport::{LoopbackTransport, Routing, TransportLog};
use fabric_runtime::runtime::relay::{BatchSender, FlushReason, RelayBuffer};
use fabric_runtime::runtime::retry::RetryPolicy;
use proptest::prelude::*;

fn relay_with(
    capacity: usize,
    transport: LoopbackTransport,
    policy: RetryPolicy,
) -> (RelayBuffer, TransportLog, ManualClock) {
    let log = transport.log();
    let clock = ManualClock::new();
    let routing = Routing {
        tag: 7,
        dest_port: 1,
        ..Routing::default()
    };
    let sender = BatchSender::new(Box::new(transport), routing, policy, Box::new(clock.clone()));
    (RelayBuffer::new(capacity, sender), log, clock)
}

fn relay(capacity: usize) -> (RelayBuffer, TransportLog) {
    let (relay, log, _) = relay_with(capacity, LoopbackTransport::new(), RetryPolicy::default());
    (relay, log)
}

/// Tests 130 packets through a 64-slot batch: two full flushes, then the
/// remaining two go out with the forced flush at pause.
#[test]
fn test_batches_then_forced_flush() {
    let (mut relay, log) = relay(64);
    let mut reports = Vec::new();
    for key in 0..130 {
        if let Some(report) = relay.on_packet(Packet::key_only(key)).unwrap() {
            reports.push(report);
        }
    }

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.reason == FlushReason::Full && r.count == 64));
    assert_eq!(relay.pending(), 2);

    let forced = relay.force_flush().unwrap().unwrap();
    assert_eq!(forced.reason, FlushReason::Forced);
    assert_eq!(forced.count, 2);
    assert_eq!(relay.pending(), 0);

    let counts: Vec<usize> = log.delivered().iter().map(|m| m.count()).collect();
    assert_eq!(counts, vec![64, 64, 2]);
    assert_eq!(log.delivered_words(), (0..130).collect::<Vec<u32>>());

    let counters = relay.counters();
    assert_eq!(counters.full_flushes, 2);
    assert_eq!(counters.forced_flushes, 1);
    assert_eq!(counters.words_sent, 130);
}

/// Tests that flushing an empty batch sends nothing.
#[test]
fn test_empty_flush_sends_nothing() {
    let (mut relay, log) = relay(8);
    assert_eq!(relay.flush(FlushReason::Explicit), Ok(None));
    assert_eq!(relay.force_flush(), Ok(None));
    assert_eq!(log.attempts(), 0);
    assert_eq!(relay.counters().explicit_flushes, 0);
}

/// Tests that the packet after a full batch starts a new batch of one.
#[test]
fn test_capacity_plus_one() {
    let (mut relay, log) = relay(4);
    for key in 0..3 {
        assert_eq!(relay.on_packet(Packet::key_only(key)), Ok(None));
    }
    let report = relay.on_packet(Packet::key_only(3)).unwrap().unwrap();
    assert_eq!(report.count, 4);
    assert_eq!(relay.pending(), 0);

    assert_eq!(relay.on_packet(Packet::key_only(4)), Ok(None));
    assert_eq!(relay.pending(), 1);
    assert_eq!(log.message_count(), 1);
}

/// Tests that payloads are relayed in place of keys when present.
#[test]
fn test_payload_word_is_relayed() {
    let (mut relay, log) = relay(2);
    relay.on_packet(Packet::with_payload(1, 100)).unwrap();
    relay.on_packet(Packet::key_only(2)).unwrap();
    assert_eq!(log.delivered_words(), vec![100, 2]);

    let delivered = log.delivered();
    let message = &delivered[0];
    assert_eq!(message.routing.tag, 7);
    assert_eq!(message.routing.dest_port, 1);
}

/// Tests that busy refusals are retried with back-off until delivery.
#[test]
fn test_busy_transport_is_retried() {
    let policy = RetryPolicy::exponential(Duration::from_micros(1), Duration::from_micros(4), 2);
    let (mut relay, log, clock) = relay_with(2, LoopbackTransport::with_busy_attempts(3), policy);

    relay.on_packet(Packet::key_only(1)).unwrap();
    let report = relay.on_packet(Packet::key_only(2)).unwrap().unwrap();

    assert_eq!(report.attempts, 4);
    assert_eq!(clock.sleeps(), 3);
    assert_eq!(clock.elapsed(), Duration::from_micros(1 + 2 + 4));
    assert_eq!(log.refusals(), 3);
    assert_eq!(log.delivered_words(), vec![1, 2]);

    let counters = relay.counters();
    assert_eq!(counters.send_attempts, 4);
    assert_eq!(counters.busy_retries, 3);
    assert_eq!(counters.failed_flushes, 0);
}

/// Tests that an exhausted bounded policy keeps the batch and pushes back.
#[test]
fn test_bounded_retry_retains_batch() {
    let policy = RetryPolicy::fixed(Duration::from_micros(1)).bounded(2);
    let (mut relay, log, _) = relay_with(2, LoopbackTransport::with_busy_attempts(100), policy);

    relay.on_packet(Packet::key_only(1)).unwrap();
    assert_eq!(relay.on_packet(Packet::key_only(2)), Ok(None));
    assert_eq!(relay.pending(), 2);

    let pushback = relay.on_packet(Packet::key_only(3)).unwrap_err();
    assert_eq!(pushback.packet, Packet::key_only(3));
    assert_eq!(pushback.busy, TransportBusy { attempts: 2 });
    assert_eq!(relay.pending(), 2);
    assert_eq!(relay.counters().failed_flushes, 2);
    assert_eq!(relay.counters().packets, 2);
    assert!(log.delivered().is_empty());
}

proptest! {
    /// Tests that N packets produce floor(N / C) full flushes, in order,
    /// and the forced flush delivers the rest.
    #[test]
    fn prop_batches_preserve_order(capacity in 1usize..32, keys in prop::collection::vec(any::<u32>(), 0..300)) {
        let (mut relay, log) = relay(capacity);
        for key in &keys {
            relay.on_packet(Packet::key_only(*key)).unwrap();
        }

        let full = keys.len() / capacity;
        prop_assert_eq!(relay.counters().full_flushes, full as u64);
        prop_assert_eq!(relay.pending(), keys.len() % capacity);
        prop_assert_eq!(log.delivered_words(), keys[..full * capacity].to_vec());

        relay.force_flush().unwrap();
        prop_assert_eq!(log.delivered_words(), keys.clone());
        prop_assert!(log.delivered().iter().all(|m| m.count() <= capacity));
    }
}
