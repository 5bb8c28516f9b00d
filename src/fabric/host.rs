//! Host Handshake Device.
//!
//! Signals exchanged with the host toolchain. The core raises
//! `ready-to-read` once per pause and `exited` once per run; the host
//! observes them through a `HostHandle`. A core that aborts leaves its last
//! diagnostic here, which is the only thing distinguishing it from a crash.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Externally visible state of a core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CoreState {
    /// Bring-up has not completed.
    Booting = 0,
    /// Executing its run segment.
    Running = 1,
    /// Paused with output regions finalized and safe to read.
    ReadyToRead = 2,
    /// Terminated normally.
    Exited = 3,
    /// Aborted on an unrecoverable fault.
    Aborted = 4,
}

impl CoreState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => CoreState::Running,
            2 => CoreState::ReadyToRead,
            3 => CoreState::Exited,
            4 => CoreState::Aborted,
            _ => CoreState::Booting,
        }
    }
}

#[derive(Debug, Default)]
struct Signals {
    state: AtomicU8,
    ready_to_read: AtomicU32,
    resumes: AtomicU32,
    exits: AtomicU32,
    diagnostic: Mutex<Option<String>>,
}

/// Core-side end of the handshake.
#[derive(Debug, Clone)]
pub struct HostLink {
    signals: Arc<Signals>,
}

/// Host-side end of the handshake.
#[derive(Debug, Clone)]
pub struct HostHandle {
    signals: Arc<Signals>,
}

impl HostLink {
    /// Creates a linked core/host pair.
    pub fn new() -> (Self, HostHandle) {
        let signals = Arc::new(Signals::default());
        (
            Self {
                signals: signals.clone(),
            },
            HostHandle { signals },
        )
    }

    /// Returns another host-side handle to this link.
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            signals: self.signals.clone(),
        }
    }

    pub fn set_running(&self) {
        self.signals
            .state
            .store(CoreState::Running as u8, Ordering::Release);
    }

    /// Raises `ready-to-read`.
    pub fn raise_ready_to_read(&self) {
        self.signals.ready_to_read.fetch_add(1, Ordering::AcqRel);
        self.signals
            .state
            .store(CoreState::ReadyToRead as u8, Ordering::Release);
    }

    /// Consumes one `resume` and returns the core to `Running`.
    pub fn consume_resume(&self) {
        self.signals.resumes.fetch_add(1, Ordering::AcqRel);
        self.set_running();
    }

    /// Raises `exited`. Only the first call has an effect.
    ///
    /// # Returns
    ///
    /// `true` if this call raised the signal.
    pub fn raise_exited(&self) -> bool {
        let first = self
            .signals
            .exits
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.signals
                .state
                .store(CoreState::Exited as u8, Ordering::Release);
        }
        first
    }

    /// Records the final diagnostic of an aborting core.
    pub fn report_abort(&self, diagnostic: String) {
        *self
            .signals
            .diagnostic
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(diagnostic);
        self.signals
            .state
            .store(CoreState::Aborted as u8, Ordering::Release);
    }
}

impl HostHandle {
    pub fn state(&self) -> CoreState {
        CoreState::from_u8(self.signals.state.load(Ordering::Acquire))
    }

    /// Number of times `ready-to-read` has been raised.
    pub fn ready_to_read_count(&self) -> u32 {
        self.signals.ready_to_read.load(Ordering::Acquire)
    }

    /// Number of resumes the core has consumed.
    pub fn resume_count(&self) -> u32 {
        self.signals.resumes.load(Ordering::Acquire)
    }

    pub fn has_exited(&self) -> bool {
        self.signals.exits.load(Ordering::Acquire) > 0
    }

    /// Last diagnostic left by an aborted core.
    pub fn last_diagnostic(&self) -> Option<String> {
        self.signals
            .diagnostic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
