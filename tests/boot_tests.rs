//! Integration tests for relay core bring-up and the host handshake.

use std::time::Duration;

use fabric_runtime::common::constants::DEFAULT_SDRAM_BASE;
use fabric_runtime::common::data::{Event, EventSource, HostCommand, Packet};
use fabric_runtime::common::error::{ConfigError, Fault, RecordingInitError};
use fabric_runtime::fabric::clock::ManualClock;
use fabric_runtime::fabric::host::{CoreState, HostHandle, HostLink};
use fabric_runtime::fabric::memory::Sdram;
use fabric_runtime::fabric::transport::{LoopbackTransport, TransportLog};
use fabric_runtime::runtime::app::{self, BootOptions, RELAY_APP_IDENTITY};
use fabric_runtime::runtime::context::Core;
use fabric_runtime::runtime::lifecycle::Phase;
use fabric_runtime::runtime::retry::RetryPolicy;
use fabric_runtime::sim::loader::RelayImage;

const BASE: u64 = DEFAULT_SDRAM_BASE;

struct Booted {
    core: Core,
    handle: HostHandle,
    log: TransportLog,
}

fn try_boot(image: &RelayImage) -> Result<Booted, (Fault, HostHandle)> {
    let memory = Sdram::with_image(BASE, 64 * 1024, &image.build());
    let transport = LoopbackTransport::new();
    let log = transport.log();
    let (host, handle) = HostLink::new();
    match app::boot(memory, host, BootOptions::new(BASE, Box::new(transport))) {
        Ok(core) => Ok(Booted { core, handle, log }),
        Err(fault) => Err((fault, handle)),
    }
}

fn boot(image: &RelayImage) -> Booted {
    let Ok(mut booted) = try_boot(image) else {
        panic!("image should boot");
    };
    booted.core.start();
    booted
}

fn boot_err(image: &RelayImage) -> Fault {
    match try_boot(image) {
        Ok(_) => panic!("image should not boot"),
        Err((fault, handle)) => {
            assert_eq!(handle.state(), CoreState::Aborted);
            fault
        }
    }
}

fn recording_image(ticks: u32) -> RelayImage {
    RelayImage {
        ticks,
        record_flags: 3,
        channel_capacities: vec![256, 256],
        ..RelayImage::default()
    }
}

fn visible_length(core: &Core, channel: u8) -> u32 {
    let ch = core.ctx.recording.channel(channel).unwrap();
    core.ctx.memory.read_u32(ch.length_addr).unwrap()
}

fn command(cmd: HostCommand) -> Event {
    Event::HostCommand(cmd)
}

/// Tests that bring-up registers every source in priority order.
#[test]
fn test_registers_every_source() {
    let Booted { core, handle, .. } = boot(&RelayImage::default());
    let sources: Vec<EventSource> = core
        .dispatcher
        .registrations()
        .into_iter()
        .map(|(source, _)| source)
        .collect();
    assert_eq!(
        sources,
        vec![
            EventSource::PacketReceived,
            EventSource::DmaComplete,
            EventSource::HostCommand,
            EventSource::TimerTick,
            EventSource::Background,
        ]
    );
    assert_eq!(core.phase(), Phase::Running);
    assert_eq!(handle.state(), CoreState::Running);
}

/// Tests the pause path: drain, forced flush, finalize, one ready-to-read.
#[test]
fn test_pause_finalizes_once() {
    let Booted {
        mut core,
        handle,
        log,
    } = boot(&recording_image(3));

    for key in 0..5 {
        core.deliver(Event::Packet(Packet::with_payload(key, key * 10))).unwrap();
    }
    for _ in 0..3 {
        core.deliver(Event::TimerTick).unwrap();
    }
    assert_eq!(handle.ready_to_read_count(), 0);
    assert!(log.delivered().is_empty());

    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(core.phase(), Phase::PausedAwaitingRead);
    assert_eq!(handle.state(), CoreState::ReadyToRead);
    assert_eq!(handle.ready_to_read_count(), 1);
    assert_eq!(log.delivered_words(), vec![0, 10, 20, 30, 40]);
    assert_eq!(visible_length(&core, 0), 5 * 4);
    assert_eq!(visible_length(&core, 1), 3 * 8);

    for _ in 0..5 {
        core.deliver(Event::TimerTick).unwrap();
    }
    assert_eq!(handle.ready_to_read_count(), 1);
    assert_eq!(core.stats().pauses, 1);
}

/// Tests that a resume command starts a new segment at tick 0.
#[test]
fn test_resume_command() {
    let Booted { mut core, handle, .. } = boot(&recording_image(2));
    for _ in 0..3 {
        core.deliver(Event::TimerTick).unwrap();
    }
    assert_eq!(core.phase(), Phase::PausedAwaitingRead);

    core.deliver(command(HostCommand::Resume)).unwrap();
    assert_eq!(core.phase(), Phase::Running);
    assert_eq!(handle.resume_count(), 1);
    assert_eq!(handle.state(), CoreState::Running);
    assert!(!core.ctx.recording.is_finalized());

    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(core.ctx.lifecycle.elapsed_ticks(), Some(0));

    core.deliver(Event::TimerTick).unwrap();
    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(handle.ready_to_read_count(), 2);
    assert_eq!(visible_length(&core, 1), 2 * 8);
}

/// Tests that a resume while running is ignored.
#[test]
fn test_resume_while_running() {
    let Booted { mut core, handle, .. } = boot(&recording_image(5));
    core.deliver(Event::TimerTick).unwrap();
    core.deliver(command(HostCommand::Resume)).unwrap();

    assert_eq!(handle.resume_count(), 0);
    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(core.ctx.lifecycle.elapsed_ticks(), Some(1));
}

/// Tests replacing the budget between segments.
#[test]
fn test_set_runtime_command() {
    let Booted { mut core, handle, .. } = boot(&recording_image(1));
    core.deliver(Event::TimerTick).unwrap();
    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(handle.ready_to_read_count(), 1);

    core.deliver(command(HostCommand::SetRuntime {
        ticks: 0,
        infinite: true,
    }))
    .unwrap();
    core.deliver(command(HostCommand::Resume)).unwrap();
    for _ in 0..50 {
        core.deliver(Event::TimerTick).unwrap();
    }
    assert_eq!(core.phase(), Phase::Running);
    assert_eq!(handle.ready_to_read_count(), 1);
}

/// Tests that stop flushes trailing data and raises exited once.
#[test]
fn test_stop_command() {
    let Booted {
        mut core,
        handle,
        log,
    } = boot(&recording_image(10));
    core.deliver(Event::Packet(Packet::key_only(42))).unwrap();
    core.deliver(command(HostCommand::Stop)).unwrap();

    assert_eq!(core.phase(), Phase::Exited);
    assert!(handle.has_exited());
    assert_eq!(handle.state(), CoreState::Exited);
    assert_eq!(log.delivered_words(), vec![42]);
    assert_eq!(visible_length(&core, 0), 4);

    core.deliver(command(HostCommand::Stop)).unwrap();
    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(log.message_count(), 1);
    assert_eq!(core.stats().forced_flushes, 1);
}

/// Tests that a stop while paused relays packets that arrived during the pause.
#[test]
fn test_stop_while_paused_flushes_trailing_packets() {
    let Booted {
        mut core,
        handle,
        log,
    } = boot(&recording_image(1));
    core.deliver(Event::TimerTick).unwrap();
    core.deliver(Event::Packet(Packet::key_only(7))).unwrap();
    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(core.phase(), Phase::PausedAwaitingRead);
    assert_eq!(log.delivered_words(), vec![7]);

    for key in 100..103 {
        core.deliver(Event::Packet(Packet::key_only(key))).unwrap();
    }
    assert_eq!(log.delivered_words(), vec![7]);
    assert_eq!(core.ctx.inbound.len(), 3);

    core.deliver(command(HostCommand::Stop)).unwrap();
    assert_eq!(core.phase(), Phase::Exited);
    assert!(handle.has_exited());
    assert_eq!(log.delivered_words(), vec![7, 100, 101, 102]);
    assert_eq!(core.ctx.relay.pending(), 0);
    assert_eq!(core.ctx.inbound.len(), 0);

    let ch = *core.ctx.recording.channel(0).unwrap();
    assert_eq!(visible_length(&core, 0), 4 * 4);
    let expected: Vec<u8> = [7u32, 100, 101, 102]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    assert_eq!(core.ctx.memory.read_bytes(ch.region_base, 16).unwrap(), &expected[..]);
    assert_eq!(core.stats().records_dropped, 0);
}

/// Tests that packets arriving while paused are relayed and recorded in the
/// next segment.
#[test]
fn test_packets_during_pause_join_next_segment() {
    let Booted { mut core, log, .. } = boot(&recording_image(1));
    core.deliver(Event::TimerTick).unwrap();
    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(core.phase(), Phase::PausedAwaitingRead);

    core.deliver(Event::Packet(Packet::key_only(0))).unwrap();
    core.deliver(Event::Packet(Packet::key_only(1))).unwrap();
    assert_eq!(core.ctx.inbound.len(), 2);
    assert_eq!(core.ctx.relay.pending(), 0);

    core.deliver(command(HostCommand::Resume)).unwrap();
    assert_eq!(core.ctx.inbound.len(), 0);
    assert_eq!(core.ctx.relay.pending(), 2);

    core.deliver(Event::TimerTick).unwrap();
    core.deliver(Event::TimerTick).unwrap();
    assert_eq!(core.phase(), Phase::PausedAwaitingRead);
    assert_eq!(log.delivered_words(), vec![0, 1]);
    assert_eq!(visible_length(&core, 0), 2 * 4);
    assert_eq!(core.stats().records_dropped, 0);
}

/// Tests that an exited core refuses packets and sends nothing more.
#[test]
fn test_packets_after_exit_are_refused() {
    let image = RelayImage {
        batch_capacity: 4,
        ..RelayImage::default()
    };
    let Booted { mut core, log, .. } = boot(&image);
    core.deliver(command(HostCommand::Stop)).unwrap();
    assert_eq!(core.phase(), Phase::Exited);

    for key in 0..4 {
        core.deliver(Event::Packet(Packet::key_only(key))).unwrap();
    }
    core.deliver(Event::Background { arg0: 0, arg1: 0 }).unwrap();

    assert_eq!(log.message_count(), 0);
    assert_eq!(core.ctx.inbound.len(), 0);
    assert_eq!(core.ctx.relay.pending(), 0);
    let stats = core.stats();
    assert_eq!(stats.packets_after_exit, 4);
    assert_eq!(stats.packets_received, 0);
    assert_eq!(stats.packets_relayed, 0);
}

/// Tests that a pause keeps a batch the transport refused and sends it on stop.
#[test]
fn test_pause_retains_batch_when_transport_busy() {
    let image = recording_image(1);
    let memory = Sdram::with_image(BASE, 64 * 1024, &image.build());
    let transport = LoopbackTransport::with_busy_attempts(3);
    let log = transport.log();
    let (host, handle) = HostLink::new();
    let options = BootOptions::new(BASE, Box::new(transport))
        .with_retry(RetryPolicy::fixed(Duration::from_micros(1)).bounded(2))
        .with_sleeper(Box::new(ManualClock::new()));
    let mut core = app::boot(memory, host, options).unwrap();
    core.start();

    for key in 0..3 {
        core.deliver(Event::Packet(Packet::key_only(key))).unwrap();
    }
    core.deliver(Event::TimerTick).unwrap();
    core.deliver(Event::TimerTick).unwrap();

    assert_eq!(core.phase(), Phase::PausedAwaitingRead);
    assert_eq!(handle.ready_to_read_count(), 1);
    assert!(log.delivered().is_empty());
    assert_eq!(core.ctx.relay.pending(), 3);
    assert_eq!(core.stats().failed_flushes, 1);

    core.deliver(command(HostCommand::Stop)).unwrap();
    assert_eq!(log.delivered_words(), vec![0, 1, 2]);
    assert_eq!(core.ctx.relay.pending(), 0);
    let stats = core.stats();
    assert_eq!(stats.forced_flushes, 1);
    assert_eq!(stats.failed_flushes, 1);
}

/// Tests that provenance is gathered on request.
#[test]
fn test_gather_provenance() {
    let Booted { mut core, .. } = boot(&RelayImage::default());
    for key in 0..3 {
        core.deliver(Event::Packet(Packet::key_only(key))).unwrap();
    }
    core.deliver(Event::DmaComplete { tag: 1 }).unwrap();
    core.deliver(command(HostCommand::GatherProvenance)).unwrap();

    let region = *core.ctx.provenance.unwrap().region();
    let word = |n| core.ctx.memory.read_u32(region.word_addr(n)).unwrap();
    assert_eq!(word(3), 3);
    assert_eq!(word(5), 3);
    assert_eq!(word(13), 1);
}

/// Tests that a full inbound ring drops and counts.
#[test]
fn test_inbound_overflow_is_counted() {
    let image = RelayImage {
        inbound_capacity: 2,
        ..RelayImage::default()
    };
    let Booted { mut core, .. } = boot(&image);
    for key in 0..5 {
        core.raise(Event::Packet(Packet::key_only(key))).unwrap();
    }
    core.dispatch().unwrap();

    let stats = core.stats();
    assert_eq!(stats.packets_received, 2);
    assert_eq!(stats.inbound_dropped, 3);
    assert_eq!(stats.packets_relayed, 2);
}

/// Tests rejection of malformed application parameters.
#[test]
fn test_bad_parameters() {
    let zero_batch = RelayImage {
        batch_capacity: 0,
        ..RelayImage::default()
    };
    assert_eq!(
        boot_err(&zero_batch),
        Fault::Config(ConfigError::InvalidParameter {
            field: "batch_capacity",
            value: 0,
        })
    );

    let wrong_app = RelayImage {
        identity: RELAY_APP_IDENTITY ^ 1,
        ..RelayImage::default()
    };
    assert!(matches!(
        boot_err(&wrong_app),
        Fault::Config(ConfigError::IdentityMismatch { .. })
    ));

    let no_recording = RelayImage {
        record_flags: 1,
        ..RelayImage::default()
    };
    assert_eq!(
        boot_err(&no_recording),
        Fault::Config(ConfigError::Recording(RecordingInitError::MissingRegion))
    );
}
