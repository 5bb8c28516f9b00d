//! Deterministic Core Simulator.
//!
//! Drives a `Core` in simulated microseconds. The hardware timer fires once
//! per timer period for as long as the core has not exited; injected events
//! (packets, DMA completions, host commands) are delivered at their
//! scheduled time, ahead of a timer tick due at the same instant.

use crate::common::data::{Event, Packet};
use crate::common::error::Fault;
use crate::runtime::context::Core;
use crate::runtime::lifecycle::Phase;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tracing::trace;

#[derive(Debug)]
struct Scheduled {
    at_us: u64,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at_us, self.seq).cmp(&(other.at_us, other.seq))
    }
}

/// Event-driven harness around a single core.
pub struct Simulator {
    core: Core,
    now_us: u64,
    next_tick_us: u64,
    queue: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
}

impl Simulator {
    /// Wraps a booted core. The first timer tick fires one period after start.
    pub fn new(core: Core) -> Self {
        let period = u64::from(core.ctx.lifecycle.timer_period_us());
        Self {
            core,
            now_us: 0,
            next_tick_us: period,
            queue: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Starts the core (closes handler registration).
    pub fn start(&mut self) {
        self.core.start();
    }

    /// Schedules `event` at absolute time `at_us`. Times in the past are
    /// delivered on the next step.
    pub fn inject(&mut self, at_us: u64, event: Event) {
        let at_us = at_us.max(self.now_us);
        self.queue.push(Reverse(Scheduled {
            at_us,
            seq: self.seq,
            event,
        }));
        self.seq += 1;
    }

    /// Schedules `packets` starting at `start_us`, `spacing_us` apart.
    pub fn inject_packets(
        &mut self,
        start_us: u64,
        spacing_us: u64,
        packets: impl IntoIterator<Item = Packet>,
    ) {
        for (i, packet) in packets.into_iter().enumerate() {
            self.inject(start_us + spacing_us * i as u64, Event::Packet(packet));
        }
    }

    fn timer_running(&self) -> bool {
        self.core.phase() != Phase::Exited
    }

    /// Time of the next occurrence, if any.
    fn next_at(&self) -> Option<u64> {
        let injected = self.queue.peek().map(|Reverse(s)| s.at_us);
        let tick = self.timer_running().then_some(self.next_tick_us);
        match (injected, tick) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Delivers the next occurrence. Returns `false` when nothing is left.
    pub fn step(&mut self) -> Result<bool, Fault> {
        let Some(at) = self.next_at() else {
            return Ok(false);
        };
        self.now_us = at;

        let injected_due = self.queue.peek().is_some_and(|Reverse(s)| s.at_us == at);
        if injected_due {
            if let Some(Reverse(scheduled)) = self.queue.pop() {
                trace!(at_us = at, source = scheduled.event.source().name(), "deliver");
                self.core.deliver(scheduled.event)?;
            }
        } else {
            self.next_tick_us += u64::from(self.core.ctx.lifecycle.timer_period_us());
            self.core.deliver(Event::TimerTick)?;
        }
        Ok(true)
    }

    /// Runs every occurrence up to and including `now + duration_us`.
    pub fn run_for(&mut self, duration_us: u64) -> Result<(), Fault> {
        let end = self.now_us + duration_us;
        while self.next_at().is_some_and(|at| at <= end) {
            self.step()?;
        }
        self.now_us = end;
        Ok(())
    }

    /// Runs until the core pauses for a host read or exits, or until
    /// `limit_us` of simulated time has passed.
    ///
    /// Events already due at the current instant, such as a resume injected
    /// while paused, are delivered first.
    pub fn run_until_paused(&mut self, limit_us: u64) -> Result<Phase, Fault> {
        let end = self.now_us + limit_us;
        while self.next_at().is_some_and(|at| at <= self.now_us) {
            self.step()?;
        }
        while self.core.phase() == Phase::Running || self.core.phase() == Phase::Uninitialized {
            match self.next_at() {
                Some(at) if at <= end => {
                    self.step()?;
                }
                _ => {
                    self.now_us = end;
                    break;
                }
            }
        }
        Ok(self.core.phase())
    }

    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    pub fn into_core(self) -> Core {
        self.core
    }
}
