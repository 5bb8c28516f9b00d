//! Packet relay application.
//!
//! The reference application built on the runtime: packets received from
//! the network are queued by a high-priority handler, batched by background
//! work, and relayed to the host through the outbound transport. Each tick
//! can optionally record how many words were relayed since the last one.
//!
//! Region declaration order:
//!
//! | index | region     | contents                                            |
//! |-------|------------|-----------------------------------------------------|
//! | 0     | system     | identity hash, timer period, tick budget, infinite  |
//! | 1     | params     | batch capacity, inbound capacity, record flags      |
//! | 2     | recording  | recording channels (optional)                       |
//! | 3     | provenance | provenance counters (optional)                      |

use crate::common::constants::{DEFAULT_MAX_PENDING_EVENTS, WORD_BYTES};
use crate::common::data::{Event, EventSource};
use crate::common::error::{ConfigError, Fault};
use crate::fabric::clock::{Sleeper, ThreadSleeper};
use crate::fabric::host::HostLink;
use crate::fabric::memory::Sdram;
use crate::fabric::transport::{Routing, Transport};
use crate::runtime::buffer::PacketBuffer;
use crate::runtime::context::{Core, PreemptionMask, RuntimeContext};
use crate::runtime::dispatch::{DispatchPriorities, Dispatcher, EventHandler};
use crate::runtime::lifecycle::{Lifecycle, RunCapability, TickOutcome};
use crate::runtime::provenance::ProvenanceRegion;
use crate::runtime::recording::RecordingSink;
use crate::runtime::regions::{RegionDescriptor, RegionTable};
use crate::runtime::relay::{BatchSender, RelayBuffer};
use crate::runtime::retry::RetryPolicy;
use tracing::{error, info, trace};

/// Name the application identity hash is derived from.
pub const APP_NAME: &str = "packet_relay";

/// Identity hash the system region must carry.
pub const RELAY_APP_IDENTITY: u32 = identity_hash(APP_NAME);

/// Params flag: record every relayed word on channel 0.
pub const RECORD_PACKETS: u32 = 1 << 0;

/// Params flag: record a per-tick summary on channel 1.
pub const RECORD_TICKS: u32 = 1 << 1;

/// Channel receiving relayed words.
pub const PACKET_CHANNEL: u8 = 0;

/// Channel receiving tick summaries.
pub const TICK_CHANNEL: u8 = 1;

const PARAMS_WORDS: u64 = 3;

/// 32-bit FNV-1a over `name`.
pub const fn identity_hash(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash: u32 = 0x811c_9dc5;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

/// Region indices in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum RelayRegion {
    System = 0,
    Params = 1,
    Recording = 2,
    Provenance = 3,
}

impl RelayRegion {
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Contents of the params region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayParams {
    pub batch_capacity: u32,
    pub inbound_capacity: u32,
    pub record_flags: u32,
}

impl RelayParams {
    pub fn parse(region: &RegionDescriptor, memory: &Sdram) -> Result<Self, ConfigError> {
        region.require_len((PARAMS_WORDS * WORD_BYTES) as u32)?;
        let params = Self {
            batch_capacity: region.read_word(memory, 0)?,
            inbound_capacity: region.read_word(memory, 1)?,
            record_flags: region.read_word(memory, 2)?,
        };
        if params.batch_capacity == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "batch_capacity",
                value: 0,
            });
        }
        if params.inbound_capacity == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "inbound_capacity",
                value: 0,
            });
        }
        if params.record_flags & !(RECORD_PACKETS | RECORD_TICKS) != 0 {
            return Err(ConfigError::InvalidParameter {
                field: "record_flags",
                value: params.record_flags,
            });
        }
        Ok(params)
    }
}

/// Everything bring-up needs besides the blob itself.
pub struct BootOptions {
    /// Address of the configuration blob inside SDRAM.
    pub blob_base: u64,
    pub transport: Box<dyn Transport>,
    pub sleeper: Box<dyn Sleeper>,
    pub routing: Routing,
    pub retry: RetryPolicy,
    pub priorities: DispatchPriorities,
    pub max_pending: usize,
    pub trace_events: bool,
}

impl BootOptions {
    /// Defaults: real-time sleeper, unbounded fixed-delay retry, standard
    /// priorities.
    pub fn new(blob_base: u64, transport: Box<dyn Transport>) -> Self {
        Self {
            blob_base,
            transport,
            sleeper: Box::new(ThreadSleeper),
            routing: Routing::default(),
            retry: RetryPolicy::default(),
            priorities: DispatchPriorities::default(),
            max_pending: DEFAULT_MAX_PENDING_EVENTS,
            trace_events: false,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_priorities(mut self, priorities: DispatchPriorities) -> Self {
        self.priorities = priorities;
        self
    }
}

/// Brings up a relay core from the blob in `memory`.
///
/// A failed bring-up leaves its diagnostic on `host` and registers nothing
/// that could run.
pub fn boot(memory: Sdram, host: HostLink, options: BootOptions) -> Result<Core, Fault> {
    let reporter = host.clone();
    bring_up(memory, host, options).map_err(|fault| {
        error!(%fault, "bring-up failed");
        reporter.report_abort(fault.to_string());
        fault
    })
}

fn bring_up(memory: Sdram, host: HostLink, options: BootOptions) -> Result<Core, Fault> {
    options.priorities.validate()?;
    let regions = RegionTable::load(&memory, options.blob_base)?;
    let priorities = &options.priorities;

    let mut dispatcher = Dispatcher::new(options.max_pending);
    dispatcher.set_trace_events(options.trace_events);

    let lifecycle = Lifecycle::initialize(
        regions.require(RelayRegion::System.index())?,
        &memory,
        RELAY_APP_IDENTITY,
        RunCapability::FiniteOrInfinite,
        priorities,
        &mut dispatcher,
    )?;

    let params = RelayParams::parse(regions.require(RelayRegion::Params.index())?, &memory)?;

    let recording = if params.record_flags != 0 {
        let sink = RecordingSink::initialize(regions.get(RelayRegion::Recording.index()), &memory)
            .map_err(ConfigError::from)?;
        let needed = if params.record_flags & RECORD_TICKS != 0 {
            TICK_CHANNEL
        } else {
            PACKET_CHANNEL
        };
        if sink.channel_count() <= needed as usize {
            return Err(ConfigError::InvalidParameter {
                field: "recording channels",
                value: sink.channel_count() as u32,
            }
            .into());
        }
        sink
    } else {
        RecordingSink::disabled()
    };

    let provenance = regions
        .get(RelayRegion::Provenance.index())
        .map(ProvenanceRegion::new)
        .transpose()?;

    let sender = BatchSender::new(
        options.transport,
        options.routing,
        options.retry,
        options.sleeper,
    );

    let ctx = RuntimeContext {
        memory,
        regions,
        lifecycle,
        inbound: PacketBuffer::new(params.inbound_capacity as usize),
        relay: RelayBuffer::new(params.batch_capacity as usize, sender),
        recording,
        provenance,
        host,
        relay_record_channel: (params.record_flags & RECORD_PACKETS != 0).then_some(PACKET_CHANNEL),
        dma_completions: 0,
        packets_after_exit: 0,
        preemption: PreemptionMask::default(),
    };

    dispatcher
        .register(
            EventSource::PacketReceived,
            priorities.packet,
            Box::new(PacketArrival),
        )
        .map_err(ConfigError::from)?;
    dispatcher
        .register(EventSource::DmaComplete, priorities.dma, Box::new(DmaDone))
        .map_err(ConfigError::from)?;
    dispatcher
        .register(
            EventSource::TimerTick,
            priorities.timer,
            Box::new(RelayTimer {
                record_ticks: params.record_flags & RECORD_TICKS != 0,
                last_sent: 0,
            }),
        )
        .map_err(ConfigError::from)?;
    dispatcher
        .register(
            EventSource::Background,
            priorities.background,
            Box::new(DrainInbound),
        )
        .map_err(ConfigError::from)?;

    info!(
        batch_capacity = params.batch_capacity,
        inbound_capacity = params.inbound_capacity,
        record_flags = params.record_flags,
        "relay core ready"
    );
    Ok(Core::new(dispatcher, ctx))
}

/// Queues arriving packets and schedules background draining.
struct PacketArrival;

impl EventHandler for PacketArrival {
    fn handle(
        &mut self,
        event: Event,
        ctx: &mut RuntimeContext,
        irq: &mut Dispatcher,
    ) -> Result<(), Fault> {
        let Event::Packet(packet) = event else {
            return Ok(());
        };
        if ctx.accept_packet(packet) {
            irq.trigger(Event::Background { arg0: 0, arg1: 0 })?;
        }
        Ok(())
    }
}

/// Counts DMA completions.
struct DmaDone;

impl EventHandler for DmaDone {
    fn handle(
        &mut self,
        event: Event,
        ctx: &mut RuntimeContext,
        _irq: &mut Dispatcher,
    ) -> Result<(), Fault> {
        if let Event::DmaComplete { tag } = event {
            ctx.dma_completions += 1;
            trace!(tag, "dma complete");
        }
        Ok(())
    }
}

/// Moves queued packets into the relay batch.
struct DrainInbound;

impl EventHandler for DrainInbound {
    fn handle(
        &mut self,
        _event: Event,
        ctx: &mut RuntimeContext,
        _irq: &mut Dispatcher,
    ) -> Result<(), Fault> {
        ctx.drain_inbound();
        Ok(())
    }
}

/// Drives the lifecycle and records per-tick summaries.
struct RelayTimer {
    record_ticks: bool,
    last_sent: u64,
}

impl EventHandler for RelayTimer {
    fn handle(
        &mut self,
        _event: Event,
        ctx: &mut RuntimeContext,
        irq: &mut Dispatcher,
    ) -> Result<(), Fault> {
        let TickOutcome::Tick(tick) = ctx.on_timer_tick() else {
            return Ok(());
        };

        // Packet arrivals queued behind this tick are serviced first.
        irq.preemption_point(ctx)?;

        if self.record_ticks {
            let sent = ctx.relay.counters().words_sent;
            let delta = u32::try_from(sent - self.last_sent).unwrap_or(u32::MAX);
            self.last_sent = sent;

            let mut summary = [0u8; 8];
            summary[..4].copy_from_slice(&tick.to_le_bytes());
            summary[4..].copy_from_slice(&delta.to_le_bytes());
            if let Err(err) = ctx.record(TICK_CHANNEL, &summary) {
                trace!(%err, tick, "tick summary not recorded");
            }
        }
        Ok(())
    }
}
