//! Fixed-capacity buffers.
//!
//! Neither buffer ever grows past the capacity it was created with. The
//! inbound `PacketBuffer` drops and counts packets it has no room for; the
//! `OutboundBatch` refuses pushes once full and must be flushed and cleared.

use crate::common::data::Packet;

/// Ring of inbound packets awaiting background processing.
#[derive(Debug)]
pub struct PacketBuffer {
    slots: Box<[Packet]>,
    head: usize,
    len: usize,
    accepted: u64,
    dropped: u64,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Packet::default(); capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
            accepted: 0,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Packets accepted by `push`.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Packets rejected because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Appends a packet at the tail.
    ///
    /// # Returns
    ///
    /// `false` if the ring was full; the packet is dropped and counted.
    pub fn push(&mut self, packet: Packet) -> bool {
        if self.is_full() {
            self.dropped += 1;
            return false;
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = packet;
        self.len += 1;
        self.accepted += 1;
        true
    }

    /// Returns a packet to the head of the ring so it is the next one popped.
    ///
    /// # Returns
    ///
    /// `false` if the ring was full; the packet is dropped and counted.
    pub fn push_front(&mut self, packet: Packet) -> bool {
        if self.is_full() {
            self.dropped += 1;
            return false;
        }
        self.head = (self.head + self.slots.len() - 1) % self.slots.len();
        self.slots[self.head] = packet;
        self.len += 1;
        true
    }

    /// Removes the oldest packet.
    pub fn pop(&mut self) -> Option<Packet> {
        if self.len == 0 {
            return None;
        }
        let packet = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        Some(packet)
    }
}

/// Payload words accumulated for one outbound message.
#[derive(Debug)]
pub struct OutboundBatch {
    payloads: Box<[u32]>,
    count: usize,
}

impl OutboundBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            payloads: vec![0; capacity.max(1)].into_boxed_slice(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.payloads.len()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.payloads.len()
    }

    /// Appends a word.
    ///
    /// # Returns
    ///
    /// `false` if the batch was already full and the word was not stored.
    pub fn push(&mut self, word: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.payloads[self.count] = word;
        self.count += 1;
        true
    }

    /// The occupied slots, oldest first.
    pub fn as_slice(&self) -> &[u32] {
        &self.payloads[..self.count]
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }
}
