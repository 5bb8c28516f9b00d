//! Fabric Core Runtime CLI.
//!
//! Boots a single core from a configuration blob, drives it through the
//! configured number of run segments with simulated packet traffic, and
//! reports the runtime statistics.
//!
//! # Usage
//!
//! 1. **Demo Mode** (default): the blob is generated from the `[run]` section.
//! 2. **Image Mode**: `--image` loads a blob produced by the host toolchain.
//!
//! `--demo <PATH>` writes the generated blob to disk instead of running it.

use clap::Parser;
use std::{fs, process};
use tracing_subscriber::EnvFilter;

use fabric_runtime::common::data::{Event, HostCommand, Packet};
use fabric_runtime::common::error::Fault;
use fabric_runtime::config::{Config, RunConfig};
use fabric_runtime::fabric::host::{HostHandle, HostLink};
use fabric_runtime::fabric::memory::Sdram;
use fabric_runtime::fabric::transport::LoopbackTransport;
use fabric_runtime::runtime::app::{self, BootOptions};
use fabric_runtime::runtime::lifecycle::{Phase, RunLength};
use fabric_runtime::sim::loader;
use fabric_runtime::sim::Simulator;

/// Command-line arguments for the core runtime harness.
#[derive(Parser, Debug)]
#[command(author, version, about = "Fabric Core Runtime Simulator")]
struct Args {
    #[arg(short, long, default_value = "configs/default.toml")]
    config: String,

    /// Configuration blob to boot from instead of the generated demo blob.
    #[arg(short, long)]
    image: Option<String>,

    /// Write the generated demo blob to this path and exit.
    #[arg(long)]
    demo: Option<String>,

    /// Number of packets to inject.
    #[arg(long)]
    packets: Option<u32>,

    /// Tick budget per run segment.
    #[arg(long)]
    ticks: Option<u32>,

    /// Write the final statistics as JSON to this path.
    #[arg(long)]
    stats_json: Option<String>,

    /// Log every dispatched event.
    #[arg(long)]
    trace: bool,
}

fn init_tracing(trace: bool) {
    let default = if trace { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn fatal(msg: impl std::fmt::Display) -> ! {
    eprintln!("\n[!] FATAL: {}", msg);
    process::exit(1);
}

/// Runs the configured segments, resuming after each pause, then stops the core.
///
/// Infinite runs are cut after `run.ticks` timer periods per segment.
fn drive(sim: &mut Simulator, run: &RunConfig, handle: &HostHandle) -> Result<(), Fault> {
    let period = u64::from(sim.core().ctx.lifecycle.timer_period_us());
    let segments = run.segments.max(1);
    for segment in 0..segments {
        let ticks = match sim.core().ctx.lifecycle.run_length() {
            RunLength::Finite(budget) => u64::from(budget) + 1,
            RunLength::Infinite => u64::from(run.ticks),
        };
        let phase = sim.run_until_paused(period * ticks)?;
        println!(
            "[*] Segment {} ended at {} us in {:?} (ready-to-read raised {} times)",
            segment,
            sim.now_us(),
            phase,
            handle.ready_to_read_count()
        );
        if phase == Phase::PausedAwaitingRead && segment + 1 < segments {
            let now = sim.now_us();
            sim.inject(now, Event::HostCommand(HostCommand::Resume));
        }
    }
    let now = sim.now_us();
    sim.inject(now, Event::HostCommand(HostCommand::Stop));
    sim.run_for(0)
}

fn main() {
    let args = Args::parse();
    let mut config = Config::from_file(&args.config).unwrap_or_else(|e| fatal(e));
    let trace = args.trace || config.general.trace_events;
    init_tracing(trace);

    if let Some(packets) = args.packets {
        config.run.packets = packets;
    }
    if let Some(ticks) = args.ticks {
        config.run.ticks = ticks;
    }

    let image = match &args.image {
        Some(path) => loader::load_image(path).unwrap_or_else(|e| fatal(e)),
        None => config.run.image().build(),
    };

    if let Some(path) = &args.demo {
        fs::write(path, &image).unwrap_or_else(|e| fatal(format!("could not write '{}': {}", path, e)));
        println!("[*] Wrote {} byte demo blob to {}", image.len(), path);
        return;
    }

    let blob_base = config.memory.blob_base();
    let mut memory = Sdram::new(config.memory.sdram_base_val(), config.memory.sdram_size_val());
    memory
        .write_bytes(blob_base, &image)
        .unwrap_or_else(|e| fatal(e));

    println!("Global Configuration");
    println!("--------------------");
    println!("Memory:");
    println!("  SDRAM Base:         {:#x}", config.memory.sdram_base_val());
    println!("  SDRAM Size:         {} KB", config.memory.sdram_size_val() / 1024);
    println!("  Blob Base:          {:#x} ({} bytes)", blob_base, image.len());
    println!("Transport:");
    println!("  Busy per send:      {}", config.transport.busy_per_send);
    println!("  Retry:              {:?}", config.retry);
    println!("Run:");
    println!("  Segments:           {}", config.run.segments);
    println!("  Packets:            {}", config.run.packets);
    println!("--------------------");

    let transport = LoopbackTransport::with_busy_attempts(config.transport.busy_per_send);
    let delivered = transport.log();
    let (host, handle) = HostLink::new();

    let mut options = BootOptions::new(blob_base, Box::new(transport))
        .with_retry(config.retry.clone())
        .with_routing(config.transport.routing)
        .with_priorities(config.priorities.clone());
    options.max_pending = config.general.max_pending_events;
    options.trace_events = trace;

    let core = app::boot(memory, host, options).unwrap_or_else(|e| fatal(e));
    let mut sim = Simulator::new(core);
    sim.start();
    sim.inject_packets(
        1,
        config.run.packet_spacing_us,
        (0..config.run.packets).map(|i| Packet::with_payload(i, i.wrapping_mul(3))),
    );

    let result = drive(&mut sim, &config.run, &handle);

    let stats = sim.core().stats();
    if let Err(e) = result {
        eprintln!("\n[!] FATAL: {}", e);
        if let Some(diag) = handle.last_diagnostic() {
            eprintln!("    Host diagnostic: {}", diag);
        }
        stats.print();
        process::exit(1);
    }

    println!(
        "\n[*] Core exited: {} ({} messages, {} words delivered)",
        handle.has_exited(),
        delivered.message_count(),
        delivered.delivered_words().len()
    );
    stats.print();

    if let Some(path) = &args.stats_json {
        let json = serde_json::to_string_pretty(&stats).unwrap_or_else(|e| fatal(e));
        fs::write(path, json).unwrap_or_else(|e| fatal(format!("could not write '{}': {}", path, e)));
        println!("[*] Stats written to {}", path);
    }
}
