//! Runtime statistics collection and reporting.
//!
//! Counters are owned by the individual components; a `RuntimeStats`
//! snapshot gathers them for the host-facing report, the JSON export and
//! the provenance region.

use serde::Serialize;

/// Number of words a stats snapshot occupies in the provenance region.
pub const PROVENANCE_WORDS: usize = 16;

/// Snapshot of every runtime counter.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub ticks_total: u64,
    pub pauses: u32,
    pub resumes: u32,

    pub packets_received: u64,
    pub inbound_dropped: u64,
    pub packets_relayed: u64,
    pub packets_after_exit: u64,

    pub full_flushes: u64,
    pub forced_flushes: u64,
    pub explicit_flushes: u64,
    pub failed_flushes: u64,
    pub words_sent: u64,
    pub send_attempts: u64,
    pub busy_retries: u64,

    pub records_written: u64,
    pub record_bytes: u64,
    pub records_dropped: u64,

    pub dma_completions: u64,
    pub events_handled: u64,
    pub events_dropped: u64,
    pub max_nesting: usize,
}

fn word(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

impl RuntimeStats {
    /// Fixed word layout written to the provenance region.
    ///
    /// Counters wider than 32 bits saturate. Dispatcher counters are not
    /// part of it; they are only known to the `Core`.
    pub fn provenance_words(&self) -> [u32; PROVENANCE_WORDS] {
        [
            word(self.ticks_total),
            self.pauses,
            self.resumes,
            word(self.packets_received),
            word(self.inbound_dropped),
            word(self.packets_relayed),
            word(self.full_flushes),
            word(self.forced_flushes),
            word(self.failed_flushes),
            word(self.words_sent),
            word(self.busy_retries),
            word(self.records_written),
            word(self.records_dropped),
            word(self.dma_completions),
            word(self.send_attempts),
            word(self.record_bytes),
        ]
    }

    /// Prints a formatted summary of the run.
    pub fn print(&self) {
        let flushes = self.full_flushes + self.forced_flushes + self.explicit_flushes;
        let per_flush = if flushes > 0 {
            self.words_sent as f64 / flushes as f64
        } else {
            0.0
        };
        let retry_rate = if self.send_attempts > 0 {
            (self.busy_retries as f64 / self.send_attempts as f64) * 100.0
        } else {
            0.0
        };

        println!("\n==========================================================");
        println!("CORE RUNTIME STATISTICS");
        println!("==========================================================");
        println!("ticks.total              {}", self.ticks_total);
        println!("lifecycle.pauses         {}", self.pauses);
        println!("lifecycle.resumes        {}", self.resumes);
        println!("----------------------------------------------------------");
        println!("PACKETS");
        println!("  packets.received       {}", self.packets_received);
        println!("  packets.dropped        {}", self.inbound_dropped);
        println!("  packets.relayed        {}", self.packets_relayed);
        println!("  packets.after_exit     {}", self.packets_after_exit);
        println!("----------------------------------------------------------");
        println!("TRANSPORT");
        println!("  flush.full             {}", self.full_flushes);
        println!("  flush.forced           {}", self.forced_flushes);
        println!("  flush.explicit         {}", self.explicit_flushes);
        println!("  flush.failed           {}", self.failed_flushes);
        println!("  words.sent             {} ({:.2}/flush)", self.words_sent, per_flush);
        println!(
            "  send.attempts          {} ({:.2}% busy)",
            self.send_attempts, retry_rate
        );
        println!("----------------------------------------------------------");
        println!("RECORDING");
        println!("  records.written        {}", self.records_written);
        println!("  records.bytes          {}", self.record_bytes);
        println!("  records.dropped        {}", self.records_dropped);
        println!("----------------------------------------------------------");
        println!("DISPATCH");
        println!("  events.handled         {}", self.events_handled);
        println!("  events.dropped         {}", self.events_dropped);
        println!("  events.max_nesting     {}", self.max_nesting);
        println!("  dma.completions        {}", self.dma_completions);
        println!("==========================================================");
    }
}
