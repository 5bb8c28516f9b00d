//! Simulation Lifecycle Controller.
//!
//! Tracks logical time against the tick budget and owns the phase machine:
//!
//! ```text
//! Uninitialized --start--> Running --budget reached--> PausedAwaitingRead
//!                             ^                               |
//!                             +----------- resume ------------+
//! any phase but Exited --stop--> Exited
//! ```
//!
//! Time is a phase-local logical clock. Before the first tick of a run
//! segment it holds no value; the first tick yields 0. A resume clears it
//! again, so the first tick after any resume is always tick 0.

use crate::common::constants::{SYSTEM_REGION_WORDS, WORD_BYTES};
use crate::common::data::{Event, EventSource};
use crate::common::error::{ConfigError, Fault};
use crate::fabric::memory::Sdram;
use crate::runtime::context::RuntimeContext;
use crate::runtime::dispatch::{DispatchPriorities, Dispatcher, EventHandler};
use crate::runtime::regions::RegionDescriptor;
use tracing::{debug, info, warn};

/// Lifecycle phase of a core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Running,
    PausedAwaitingRead,
    Exited,
}

/// How long a run segment lasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunLength {
    /// Pause when the logical clock reaches this tick.
    Finite(u32),
    /// Never pause on time.
    Infinite,
}

/// Whether an application can run without a tick budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunCapability {
    FiniteOnly,
    FiniteOrInfinite,
}

/// What a timer tick means for the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Run tick-triggered logic for this logical tick.
    Tick(u32),
    /// The budget was reached on this tick; the core is now paused.
    Paused,
    /// Paused or not yet started; the tick is ignored.
    Suspended,
    /// The core has exited; the tick is ignored.
    Exited,
}

/// Logical tick counter with an explicit "before first tick" state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogicalClock {
    elapsed: Option<u32>,
}

impl LogicalClock {
    /// Advances one tick and returns the new tick number.
    ///
    /// Saturates at `u32::MAX`. A finite budget always pauses before that;
    /// an infinite run keeps reporting `u32::MAX` from then on.
    pub fn advance(&mut self) -> u32 {
        let next = self.elapsed.map_or(0, |t| t.saturating_add(1));
        self.elapsed = Some(next);
        next
    }

    /// Returns to the state before the first tick.
    pub fn reset(&mut self) {
        self.elapsed = None;
    }

    pub fn elapsed(&self) -> Option<u32> {
        self.elapsed
    }
}

/// Timing state of the current run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimulationState {
    pub clock: LogicalClock,
    pub run_length: RunLength,
    pub timer_period_us: u32,
    pub phase: Phase,
}

/// Lifecycle controller for one core.
#[derive(Debug)]
pub struct Lifecycle {
    state: SimulationState,
    capability: RunCapability,
    ticks_total: u64,
    pauses: u32,
    resumes: u32,
}

fn run_length(ticks: u32, infinite: bool, capability: RunCapability) -> Result<RunLength, ConfigError> {
    if !infinite {
        return Ok(RunLength::Finite(ticks));
    }
    match capability {
        RunCapability::FiniteOrInfinite => Ok(RunLength::Infinite),
        RunCapability::FiniteOnly => Err(ConfigError::InfiniteRunUnsupported),
    }
}

impl Lifecycle {
    /// Parses the system region without touching the dispatcher.
    ///
    /// Layout: identity hash, timer period (µs), tick budget, infinite flag.
    pub fn parse(
        config_region: &RegionDescriptor,
        memory: &Sdram,
        app_identity_hash: u32,
        capability: RunCapability,
    ) -> Result<Self, ConfigError> {
        config_region.require_len((SYSTEM_REGION_WORDS * WORD_BYTES) as u32)?;

        let found = config_region.read_word(memory, 0)?;
        if found != app_identity_hash {
            return Err(ConfigError::IdentityMismatch {
                found,
                expected: app_identity_hash,
            });
        }

        let timer_period_us = config_region.read_word(memory, 1)?;
        if timer_period_us == 0 {
            return Err(ConfigError::ZeroTimerPeriod);
        }

        let ticks = config_region.read_word(memory, 2)?;
        let infinite = match config_region.read_word(memory, 3)? {
            0 => false,
            1 => true,
            other => return Err(ConfigError::BadInfiniteFlag(other)),
        };

        Ok(Self {
            state: SimulationState {
                clock: LogicalClock::default(),
                run_length: run_length(ticks, infinite, capability)?,
                timer_period_us,
                phase: Phase::Uninitialized,
            },
            capability,
            ticks_total: 0,
            pauses: 0,
            resumes: 0,
        })
    }

    /// Parses the system region and registers the host command handler that
    /// drives pause/resume.
    pub fn initialize(
        config_region: &RegionDescriptor,
        memory: &Sdram,
        app_identity_hash: u32,
        capability: RunCapability,
        priorities: &DispatchPriorities,
        dispatcher: &mut Dispatcher,
    ) -> Result<Self, ConfigError> {
        let lifecycle = Self::parse(config_region, memory, app_identity_hash, capability)?;
        dispatcher.register(
            EventSource::HostCommand,
            priorities.host_command,
            Box::new(HostCommandHandler),
        )?;
        info!(
            timer_period_us = lifecycle.state.timer_period_us,
            run_length = ?lifecycle.state.run_length,
            "lifecycle initialized"
        );
        Ok(lifecycle)
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn timer_period_us(&self) -> u32 {
        self.state.timer_period_us
    }

    pub fn run_length(&self) -> RunLength {
        self.state.run_length
    }

    /// Logical tick of the current segment, `None` before its first tick.
    pub fn elapsed_ticks(&self) -> Option<u32> {
        self.state.clock.elapsed()
    }

    /// Ticks that ran application logic, across all segments.
    pub fn ticks_total(&self) -> u64 {
        self.ticks_total
    }

    pub fn pauses(&self) -> u32 {
        self.pauses
    }

    pub fn resumes(&self) -> u32 {
        self.resumes
    }

    /// Enters `Running` from `Uninitialized`.
    pub fn start(&mut self) -> bool {
        if self.state.phase != Phase::Uninitialized {
            return false;
        }
        self.state.phase = Phase::Running;
        info!(run_length = ?self.state.run_length, "run started");
        true
    }

    /// Advances logical time by one tick.
    ///
    /// Transitions `Running -> PausedAwaitingRead` on the tick where the
    /// elapsed count first equals the budget; the caller is responsible for
    /// finalizing output and raising `ready-to-read`.
    pub fn on_timer_tick(&mut self) -> TickOutcome {
        match self.state.phase {
            Phase::Uninitialized | Phase::PausedAwaitingRead => return TickOutcome::Suspended,
            Phase::Exited => return TickOutcome::Exited,
            Phase::Running => {}
        }

        let tick = self.state.clock.advance();
        if let RunLength::Finite(budget) = self.state.run_length {
            if tick >= budget {
                self.state.phase = Phase::PausedAwaitingRead;
                self.pauses += 1;
                info!(tick, budget, "tick budget reached, pausing");
                return TickOutcome::Paused;
            }
        }
        self.ticks_total += 1;
        TickOutcome::Tick(tick)
    }

    /// Leaves `PausedAwaitingRead` for a new run segment.
    ///
    /// # Returns
    ///
    /// `false` if the core was not paused; nothing changes.
    pub fn handle_resume(&mut self) -> bool {
        if self.state.phase != Phase::PausedAwaitingRead {
            return false;
        }
        self.state.clock.reset();
        self.state.phase = Phase::Running;
        self.resumes += 1;
        info!(run_length = ?self.state.run_length, "resumed");
        true
    }

    /// Replaces the budget used from the next tick on.
    pub fn set_run_length(&mut self, ticks: u32, infinite: bool) -> Result<(), ConfigError> {
        self.state.run_length = run_length(ticks, infinite, self.capability)?;
        debug!(run_length = ?self.state.run_length, "run length updated");
        Ok(())
    }

    /// Enters `Exited`.
    ///
    /// # Returns
    ///
    /// `true` on the transition, `false` if already exited.
    pub fn stop(&mut self) -> bool {
        if self.state.phase == Phase::Exited {
            return false;
        }
        self.state.phase = Phase::Exited;
        info!(ticks_total = self.ticks_total, "exited");
        true
    }
}

/// Routes host commands into the context's lifecycle transitions.
struct HostCommandHandler;

impl EventHandler for HostCommandHandler {
    fn handle(
        &mut self,
        event: Event,
        ctx: &mut RuntimeContext,
        _irq: &mut Dispatcher,
    ) -> Result<(), Fault> {
        match event {
            Event::HostCommand(command) => ctx.handle_host_command(command),
            other => {
                warn!(event = ?other, "non-command event on host channel ignored");
                Ok(())
            }
        }
    }
}
