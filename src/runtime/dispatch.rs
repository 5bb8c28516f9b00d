//! Interrupt Dispatch Core.
//!
//! Maps each event source to exactly one handler and an explicit priority.
//! Lower priority values are more urgent. A single thread of control runs
//! one handler at a time; a running handler is only ever interrupted, at a
//! `preemption_point`, by events on a strictly more urgent source, and never
//! while it holds the context's preemption mask.

use crate::common::data::{Event, EventSource};
use crate::common::error::{ConfigError, DispatchError, Fault, LogicalFault};
use crate::runtime::context::RuntimeContext;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace, warn};

/// Urgency of an event source. Lower values preempt higher ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i8);

impl Priority {
    /// Returns `true` if an event at `self` may interrupt a handler at `other`.
    pub fn preempts(self, other: Priority) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority assigned to each event source at bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatchPriorities {
    #[serde(default = "default_packet")]
    pub packet: Priority,
    #[serde(default = "default_dma")]
    pub dma: Priority,
    #[serde(default = "default_host_command")]
    pub host_command: Priority,
    #[serde(default = "default_timer")]
    pub timer: Priority,
    #[serde(default = "default_background")]
    pub background: Priority,
}

fn default_packet() -> Priority {
    Priority(-1)
}

fn default_dma() -> Priority {
    Priority(0)
}

fn default_host_command() -> Priority {
    Priority(1)
}

fn default_timer() -> Priority {
    Priority(2)
}

fn default_background() -> Priority {
    Priority(3)
}

impl Default for DispatchPriorities {
    fn default() -> Self {
        Self {
            packet: default_packet(),
            dma: default_dma(),
            host_command: default_host_command(),
            timer: default_timer(),
            background: default_background(),
        }
    }
}

impl DispatchPriorities {
    pub fn for_source(&self, source: EventSource) -> Priority {
        match source {
            EventSource::PacketReceived => self.packet,
            EventSource::DmaComplete => self.dma,
            EventSource::HostCommand => self.host_command,
            EventSource::TimerTick => self.timer,
            EventSource::Background => self.background,
        }
    }

    /// Checks network > DMA > timer > background, and that every source has
    /// a distinct priority.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chain = [
            (EventSource::PacketReceived, self.packet),
            (EventSource::DmaComplete, self.dma),
            (EventSource::TimerTick, self.timer),
            (EventSource::Background, self.background),
        ];
        for pair in chain.windows(2) {
            let ((hi, hp), (lo, lp)) = (pair[0], pair[1]);
            if !hp.preempts(lp) {
                return Err(ConfigError::PriorityOrder(format!(
                    "{} ({}) must be more urgent than {} ({})",
                    hi.name(),
                    hp,
                    lo.name(),
                    lp
                )));
            }
        }
        if let Some((clash, _)) = chain.iter().find(|(_, p)| *p == self.host_command) {
            return Err(ConfigError::PriorityOrder(format!(
                "host commands share priority {} with {}",
                self.host_command,
                clash.name()
            )));
        }
        Ok(())
    }
}

/// Reaction to events on one source.
pub trait EventHandler {
    /// Handles one event to completion.
    ///
    /// `irq` gives access to the dispatcher for raising follow-up events and
    /// for yielding to more urgent sources at a preemption point.
    fn handle(
        &mut self,
        event: Event,
        ctx: &mut RuntimeContext,
        irq: &mut Dispatcher,
    ) -> Result<(), Fault>;
}

impl<F> EventHandler for F
where
    F: FnMut(Event, &mut RuntimeContext, &mut Dispatcher) -> Result<(), Fault>,
{
    fn handle(
        &mut self,
        event: Event,
        ctx: &mut RuntimeContext,
        irq: &mut Dispatcher,
    ) -> Result<(), Fault> {
        self(event, ctx, irq)
    }
}

struct Slot {
    source: EventSource,
    priority: Priority,
    /// `None` while the handler is running.
    handler: Option<Box<dyn EventHandler>>,
    pending: VecDeque<Event>,
    handled: u64,
    overflowed: u64,
}

/// Per-dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub handled: u64,
    pub overflowed: u64,
    pub max_nesting: usize,
}

/// Priority-ordered registry of event handlers with per-source pending queues.
pub struct Dispatcher {
    /// Sorted most urgent first.
    slots: Vec<Slot>,
    /// Priorities of the handlers currently on the (logical) stack.
    running: Vec<Priority>,
    started: bool,
    max_pending: usize,
    trace_events: bool,
    max_nesting: usize,
}

impl Dispatcher {
    /// Creates an empty dispatcher whose per-source queues hold at most
    /// `max_pending` events.
    pub fn new(max_pending: usize) -> Self {
        Self {
            slots: Vec::new(),
            running: Vec::new(),
            started: false,
            max_pending: max_pending.max(1),
            trace_events: cfg!(feature = "always-trace"),
            max_nesting: 0,
        }
    }

    /// Logs every dispatched event at debug level instead of trace.
    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled || cfg!(feature = "always-trace");
    }

    /// Registers `handler` for `source` at `priority`.
    ///
    /// Each source may be registered once, only before `start`, and no two
    /// sources may share a priority.
    pub fn register(
        &mut self,
        source: EventSource,
        priority: Priority,
        handler: Box<dyn EventHandler>,
    ) -> Result<(), DispatchError> {
        if self.started {
            return Err(DispatchError::RegistrationClosed(source));
        }
        if self.slot_index(source).is_some() {
            return Err(DispatchError::AlreadyRegistered(source));
        }
        if let Some(existing) = self.slots.iter().find(|s| s.priority == priority) {
            return Err(DispatchError::PriorityConflict {
                requested: source,
                existing: existing.source,
                priority: priority.0,
            });
        }

        debug!(source = source.name(), %priority, "handler registered");
        self.slots.push(Slot {
            source,
            priority,
            handler: Some(handler),
            pending: VecDeque::new(),
            handled: 0,
            overflowed: 0,
        });
        self.slots.sort_by_key(|s| s.priority);
        Ok(())
    }

    /// Closes registration and enables dispatch.
    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_registered(&self, source: EventSource) -> bool {
        self.slot_index(source).is_some()
    }

    /// Registered sources, most urgent first.
    pub fn registrations(&self) -> Vec<(EventSource, Priority)> {
        self.slots.iter().map(|s| (s.source, s.priority)).collect()
    }

    /// Priority of the innermost running handler, if any.
    pub fn current_priority(&self) -> Option<Priority> {
        self.running.last().copied()
    }

    /// Events queued across all sources.
    pub fn pending(&self) -> usize {
        self.slots.iter().map(|s| s.pending.len()).sum()
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            handled: self.slots.iter().map(|s| s.handled).sum(),
            overflowed: self.slots.iter().map(|s| s.overflowed).sum(),
            max_nesting: self.max_nesting,
        }
    }

    fn slot_index(&self, source: EventSource) -> Option<usize> {
        self.slots.iter().position(|s| s.source == source)
    }

    /// Queues `event` on its source.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if the source's queue was full and the event was dropped.
    /// Events on unregistered sources are a logical fault.
    pub fn raise(&mut self, event: Event) -> Result<bool, LogicalFault> {
        let source = event.source();
        let idx = self
            .slot_index(source)
            .ok_or(LogicalFault::UnregisteredSource(source))?;
        let max_pending = self.max_pending;
        let slot = &mut self.slots[idx];
        if slot.pending.len() >= max_pending {
            slot.overflowed += 1;
            warn!(source = source.name(), "event queue full, event dropped");
            return Ok(false);
        }
        slot.pending.push_back(event);
        Ok(true)
    }

    /// Queues `event` unless an event on the same source is already pending.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the event was queued.
    pub fn trigger(&mut self, event: Event) -> Result<bool, LogicalFault> {
        let source = event.source();
        let idx = self
            .slot_index(source)
            .ok_or(LogicalFault::UnregisteredSource(source))?;
        if !self.slots[idx].pending.is_empty() {
            return Ok(false);
        }
        self.raise(event)
    }

    /// Most urgent slot with a pending event that may run now.
    fn next_ready(&self) -> Option<usize> {
        let ceiling = self.current_priority();
        self.slots.iter().position(|s| {
            !s.pending.is_empty()
                && s.handler.is_some()
                && ceiling.map_or(true, |c| s.priority.preempts(c))
        })
    }

    /// Runs pending events to completion, most urgent first.
    ///
    /// Called from inside a handler, only sources strictly more urgent than
    /// that handler are serviced, and nothing runs while the context masks
    /// preemption.
    ///
    /// # Returns
    ///
    /// The number of events handled.
    pub fn dispatch(&mut self, ctx: &mut RuntimeContext) -> Result<usize, Fault> {
        if !self.started || (!self.running.is_empty() && ctx.preemption_masked()) {
            return Ok(0);
        }

        let mut handled = 0;
        while let Some(idx) = self.next_ready() {
            self.run_slot(idx, ctx)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Lets strictly more urgent pending events run inside the current handler.
    pub fn preemption_point(&mut self, ctx: &mut RuntimeContext) -> Result<usize, Fault> {
        self.dispatch(ctx)
    }

    fn run_slot(&mut self, idx: usize, ctx: &mut RuntimeContext) -> Result<(), Fault> {
        let slot = &mut self.slots[idx];
        let Some(mut handler) = slot.handler.take() else {
            return Ok(());
        };
        let Some(event) = slot.pending.pop_front() else {
            slot.handler = Some(handler);
            return Ok(());
        };
        let (source, priority) = (slot.source, slot.priority);
        slot.handled += 1;

        if self.trace_events {
            debug!(source = source.name(), %priority, depth = self.running.len(), ?event, "dispatch");
        } else {
            trace!(source = source.name(), %priority, depth = self.running.len(), ?event, "dispatch");
        }

        self.running.push(priority);
        self.max_nesting = self.max_nesting.max(self.running.len());
        let result = handler.handle(event, ctx, self);
        self.running.pop();

        // Slots are only reordered by `register`, which is closed once started.
        if let Some(slot) = self.slots.iter_mut().find(|s| s.source == source) {
            slot.handler = Some(handler);
        }
        result
    }
}
