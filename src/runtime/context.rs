//! Runtime context.
//!
//! All mutable state of a core lives in one `RuntimeContext`, threaded
//! explicitly through every handler invocation. `Core` pairs it with the
//! dispatcher that owns the handlers.

use crate::common::data::{Event, HostCommand, Packet};
use crate::common::error::{Fault, RecordError};
use crate::fabric::host::{HostHandle, HostLink};
use crate::fabric::memory::Sdram;
use crate::runtime::buffer::PacketBuffer;
use crate::runtime::dispatch::Dispatcher;
use crate::runtime::lifecycle::{Lifecycle, Phase, TickOutcome};
use crate::runtime::provenance::ProvenanceRegion;
use crate::runtime::recording::RecordingSink;
use crate::runtime::regions::RegionTable;
use crate::runtime::relay::RelayBuffer;
use crate::stats::RuntimeStats;
use tracing::{debug, error, info, trace, warn};

/// Nesting depth of critical sections.
///
/// While non-zero, no handler may be preempted.
#[derive(Debug, Default)]
pub struct PreemptionMask {
    depth: u32,
}

/// Mutable state of one core.
pub struct RuntimeContext {
    pub memory: Sdram,
    pub regions: RegionTable,
    pub lifecycle: Lifecycle,
    /// Packets received but not yet batched.
    pub inbound: PacketBuffer,
    pub relay: RelayBuffer,
    pub recording: RecordingSink,
    pub provenance: Option<ProvenanceRegion>,
    pub host: HostLink,
    /// Recording channel receiving every relayed word, if any.
    pub relay_record_channel: Option<u8>,
    pub dma_completions: u64,
    /// Packets refused because the core had exited.
    pub packets_after_exit: u64,
    pub preemption: PreemptionMask,
}

impl RuntimeContext {
    /// Runs `f` with preemption disabled.
    ///
    /// Used around state shared between priority classes.
    pub fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.preemption.depth += 1;
        let out = f(self);
        self.preemption.depth -= 1;
        out
    }

    pub fn preemption_masked(&self) -> bool {
        self.preemption.depth > 0
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Appends a record under a critical section.
    ///
    /// Failures are counted by the sink and never fatal.
    pub fn record(&mut self, channel: u8, bytes: &[u8]) -> Result<(), RecordError> {
        self.critical(|ctx| ctx.recording.record(&mut ctx.memory, channel, bytes))
    }

    /// Queues an arriving packet for the background drain.
    ///
    /// # Returns
    ///
    /// `false` if the packet was dropped, either because the inbound ring is
    /// full or because the core has exited.
    pub fn accept_packet(&mut self, packet: Packet) -> bool {
        if self.phase() == Phase::Exited {
            self.packets_after_exit += 1;
            trace!(key = packet.key, "core exited, packet refused");
            return false;
        }
        if !self.critical(|ctx| ctx.inbound.push(packet)) {
            trace!(key = packet.key, "inbound queue full, packet dropped");
            return false;
        }
        true
    }

    /// Moves queued inbound packets into the relay batch while running.
    ///
    /// While paused, packets stay queued until the next resume so that they
    /// land in that segment's recording.
    ///
    /// # Returns
    ///
    /// The number of packets moved.
    pub fn drain_inbound(&mut self) -> usize {
        if self.phase() != Phase::Running {
            return 0;
        }
        self.move_inbound()
    }

    /// Moves queued packets into the relay batch regardless of phase.
    ///
    /// Stops early if the transport pushes back; the refused packet goes back
    /// to the head of the queue.
    fn move_inbound(&mut self) -> usize {
        let mut moved = 0;
        while let Some(packet) = self.critical(|ctx| ctx.inbound.pop()) {
            if let Err(pushback) = self.critical(|ctx| ctx.relay.on_packet(packet)) {
                self.critical(|ctx| ctx.inbound.push_front(pushback.packet));
                warn!(queued = self.inbound.len(), "relay backpressure, draining deferred");
                break;
            }
            moved += 1;
            if let Some(channel) = self.relay_record_channel {
                if let Err(err) = self.record(channel, &packet.word().to_le_bytes()) {
                    trace!(%err, key = packet.key, "relayed word not recorded");
                }
            }
        }
        moved
    }

    /// Applies the tick to the lifecycle, pausing if the budget was reached.
    pub fn on_timer_tick(&mut self) -> TickOutcome {
        let outcome = self.lifecycle.on_timer_tick();
        if outcome == TickOutcome::Paused {
            self.finalize_segment();
            self.host.raise_ready_to_read();
        }
        outcome
    }

    /// Flushes trailing data, seals recordings and writes provenance.
    fn finalize_segment(&mut self) {
        self.move_inbound();
        if let Err(busy) = self.critical(|ctx| ctx.relay.force_flush()) {
            warn!(%busy, pending = self.relay.pending(), "final flush failed, batch retained");
        }
        self.recording.finalize(&mut self.memory);
        self.write_provenance();
    }

    /// Copies the current counters into the provenance region, if any.
    pub fn write_provenance(&mut self) {
        let stats = self.stats();
        if let Some(region) = self.provenance {
            if let Err(fault) = region.write(&mut self.memory, &stats) {
                warn!(%fault, "provenance write failed");
            }
        }
    }

    /// Starts a new run segment if paused.
    pub fn resume(&mut self) -> bool {
        if !self.lifecycle.handle_resume() {
            warn!(phase = ?self.phase(), "resume ignored: core not paused");
            return false;
        }
        self.recording.reset();
        self.host.consume_resume();
        let moved = self.move_inbound();
        if moved > 0 {
            debug!(moved, "packets queued while paused drained");
        }
        true
    }

    /// Drains, flushes, finalizes and raises `exited`. Only the first call
    /// has an effect.
    ///
    /// Stopping from a pause appends to the already published recording
    /// instead of rewinding it.
    pub fn exit(&mut self) -> bool {
        let was_paused = self.phase() == Phase::PausedAwaitingRead;
        if !self.lifecycle.stop() {
            return false;
        }
        if was_paused {
            self.recording.reopen();
        }
        self.finalize_segment();
        self.host.raise_exited()
    }

    /// Applies a command received from the host.
    pub fn handle_host_command(&mut self, command: HostCommand) -> Result<(), Fault> {
        debug!(?command, "host command");
        match command {
            HostCommand::Resume => {
                self.resume();
            }
            HostCommand::SetRuntime { ticks, infinite } => {
                self.lifecycle.set_run_length(ticks, infinite)?;
            }
            HostCommand::Stop => {
                self.exit();
            }
            HostCommand::GatherProvenance => self.write_provenance(),
        }
        Ok(())
    }

    /// Records the fault for the host and marks the core aborted.
    pub fn abort(&self, fault: &Fault) {
        error!(%fault, "core aborting");
        self.host.report_abort(fault.to_string());
    }

    /// Counters of every component owned by the context.
    pub fn stats(&self) -> RuntimeStats {
        let relay = self.relay.counters();
        let recording = self.recording.counters();
        RuntimeStats {
            ticks_total: self.lifecycle.ticks_total(),
            pauses: self.lifecycle.pauses(),
            resumes: self.lifecycle.resumes(),
            packets_received: self.inbound.accepted(),
            inbound_dropped: self.inbound.dropped(),
            packets_relayed: relay.packets,
            full_flushes: relay.full_flushes,
            forced_flushes: relay.forced_flushes,
            explicit_flushes: relay.explicit_flushes,
            failed_flushes: relay.failed_flushes,
            words_sent: relay.words_sent,
            send_attempts: relay.send_attempts,
            busy_retries: relay.busy_retries,
            records_written: recording.records,
            record_bytes: recording.bytes,
            records_dropped: recording.dropped,
            dma_completions: self.dma_completions,
            packets_after_exit: self.packets_after_exit,
            ..RuntimeStats::default()
        }
    }
}

/// A booted core: its dispatcher and the context handlers run against.
pub struct Core {
    pub dispatcher: Dispatcher,
    pub ctx: RuntimeContext,
}

impl Core {
    pub fn new(dispatcher: Dispatcher, ctx: RuntimeContext) -> Self {
        Self { dispatcher, ctx }
    }

    /// Closes registration and enters the run phase.
    pub fn start(&mut self) {
        self.dispatcher.start();
        if self.ctx.lifecycle.start() {
            self.ctx.host.set_running();
        }
        info!(handlers = self.dispatcher.registrations().len(), "core started");
    }

    /// Queues an interrupt. Unregistered sources abort the core.
    pub fn raise(&mut self, event: Event) -> Result<bool, Fault> {
        self.dispatcher.raise(event).map_err(|fault| {
            let fault = Fault::from(fault);
            self.ctx.abort(&fault);
            fault
        })
    }

    /// Runs every pending handler to completion.
    pub fn dispatch(&mut self) -> Result<usize, Fault> {
        self.dispatcher.dispatch(&mut self.ctx).map_err(|fault| {
            self.ctx.abort(&fault);
            fault
        })
    }

    /// Raises `event` and dispatches everything pending.
    pub fn deliver(&mut self, event: Event) -> Result<usize, Fault> {
        self.raise(event)?;
        self.dispatch()
    }

    pub fn phase(&self) -> Phase {
        self.ctx.phase()
    }

    pub fn host_handle(&self) -> HostHandle {
        self.ctx.host.handle()
    }

    pub fn stats(&self) -> RuntimeStats {
        let dispatch = self.dispatcher.counters();
        RuntimeStats {
            events_handled: dispatch.handled,
            events_dropped: dispatch.overflowed,
            max_nesting: dispatch.max_nesting,
            ..self.ctx.stats()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::DEFAULT_SDRAM_BASE;
    use crate::fabric::clock::ManualClock;
    use crate::fabric::transport::LoopbackTransport;
    use crate::runtime::app::{self, BootOptions};
    use crate::runtime::retry::RetryPolicy;
    use crate::sim::loader::RelayImage;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn relay_core(ticks: u32, busy_per_send: u32, retry: RetryPolicy) -> Core {
        let image = RelayImage {
            ticks,
            ..RelayImage::default()
        };
        let memory = Sdram::with_image(DEFAULT_SDRAM_BASE, 64 * 1024, &image.build());
        let (host, _) = HostLink::new();
        let options = BootOptions::new(
            DEFAULT_SDRAM_BASE,
            Box::new(LoopbackTransport::with_busy_attempts(busy_per_send)),
        )
        .with_retry(retry)
        .with_sleeper(Box::new(ManualClock::new()));
        let mut core = app::boot(memory, host, options).unwrap();
        core.start();
        core
    }

    #[traced_test]
    #[test]
    fn refused_final_flush_is_logged_and_retained() {
        let retry = RetryPolicy::fixed(Duration::from_micros(1)).bounded(1);
        let mut core = relay_core(0, 1, retry);
        core.deliver(Event::Packet(Packet::key_only(4))).unwrap();
        core.deliver(Event::TimerTick).unwrap();

        assert_eq!(core.phase(), Phase::PausedAwaitingRead);
        assert_eq!(core.ctx.relay.pending(), 1);
        assert!(logs_contain("final flush failed, batch retained"));
    }

    #[test]
    fn relay_calls_leave_preemption_unmasked() {
        let mut core = relay_core(1, 0, RetryPolicy::default());
        for key in 0..3 {
            core.deliver(Event::Packet(Packet::key_only(key))).unwrap();
        }
        core.deliver(Event::TimerTick).unwrap();
        core.deliver(Event::TimerTick).unwrap();

        assert_eq!(core.phase(), Phase::PausedAwaitingRead);
        assert!(!core.ctx.preemption_masked());
        assert_eq!(core.ctx.preemption.depth, 0);
    }

    #[test]
    fn exit_from_pause_republishes_recording() {
        let mut core = relay_core(0, 0, RetryPolicy::default());
        core.deliver(Event::TimerTick).unwrap();
        assert!(core.ctx.recording.is_finalized());

        assert!(core.ctx.exit());
        assert!(core.ctx.recording.is_finalized());
        assert!(!core.ctx.exit());
    }
}
