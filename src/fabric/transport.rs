//! Outbound Transport.
//!
//! The transport is the scarce resource batches are relayed through. It can
//! refuse a message while busy; callers retry through
//! `runtime::retry`. Routing fields are fixed once at bring-up.

use crate::common::error::TransportBusy;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};

/// Routing header attached to every outbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Routing {
    /// Tag identifying the host-side listener.
    #[serde(default)]
    pub tag: u8,
    /// Destination port on the receiving side.
    #[serde(default)]
    pub dest_port: u8,
    /// Destination chip X coordinate.
    #[serde(default)]
    pub dest_x: u8,
    /// Destination chip Y coordinate.
    #[serde(default)]
    pub dest_y: u8,
    /// Destination core on the chip.
    #[serde(default)]
    pub dest_core: u8,
}

/// A single transport message: routing header plus payload words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub routing: Routing,
    pub payloads: Vec<u32>,
}

impl OutboundMessage {
    /// Number of payload words carried.
    pub fn count(&self) -> usize {
        self.payloads.len()
    }
}

/// Outbound transport capable of refusing a send while busy.
pub trait Transport {
    /// Returns the user-friendly name of the transport, for logs.
    fn name(&self) -> &str;

    /// Attempts a single send.
    ///
    /// # Returns
    ///
    /// `Err(TransportBusy)` if the transport could not accept the message;
    /// the caller still owns the data and may retry.
    fn try_send(&mut self, message: &OutboundMessage) -> Result<(), TransportBusy>;
}

#[derive(Debug, Default)]
struct LogInner {
    delivered: Vec<OutboundMessage>,
    attempts: u64,
    refusals: u64,
}

/// Shared view of everything a `LoopbackTransport` has seen.
#[derive(Debug, Default, Clone)]
pub struct TransportLog {
    inner: Arc<Mutex<LogInner>>,
}

impl TransportLog {
    fn with<R>(&self, f: impl FnOnce(&mut LogInner) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Messages accepted so far, in delivery order.
    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.with(|log| log.delivered.clone())
    }

    /// All payload words accepted so far, in delivery order.
    pub fn delivered_words(&self) -> Vec<u32> {
        self.with(|log| {
            log.delivered
                .iter()
                .flat_map(|m| m.payloads.iter().copied())
                .collect()
        })
    }

    /// Number of accepted messages.
    pub fn message_count(&self) -> usize {
        self.with(|log| log.delivered.len())
    }

    /// Number of send attempts, accepted or not.
    pub fn attempts(&self) -> u64 {
        self.with(|log| log.attempts)
    }

    /// Number of attempts refused as busy.
    pub fn refusals(&self) -> u64 {
        self.with(|log| log.refusals)
    }
}

/// Transport that delivers into a shared in-memory log.
///
/// Can be configured to refuse each message a fixed number of times before
/// accepting it, modeling a transport that is momentarily busy.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    log: TransportLog,
    busy_per_send: u32,
    refused_current: u32,
}

impl LoopbackTransport {
    /// Creates a transport that accepts every message immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport that refuses each message `busy_per_send` times.
    pub fn with_busy_attempts(busy_per_send: u32) -> Self {
        Self {
            busy_per_send,
            ..Self::default()
        }
    }

    /// Returns a handle to the delivery log.
    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    fn try_send(&mut self, message: &OutboundMessage) -> Result<(), TransportBusy> {
        let busy = self.refused_current < self.busy_per_send;
        self.log.with(|log| {
            log.attempts += 1;
            if busy {
                log.refusals += 1;
            } else {
                log.delivered.push(message.clone());
            }
        });

        if busy {
            self.refused_current += 1;
            Err(TransportBusy {
                attempts: self.refused_current,
            })
        } else {
            self.refused_current = 0;
            Ok(())
        }
    }
}
