use log::info;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

const RATE_WINDOW: Duration = Duration::from_secs(1);
const MIB: f64 = 1024.0 * 1024.0;

/// Buffers, records and bytes moved by one capture, plus the throughput of
/// the last second for live display.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub started: Instant,
    pub buffers: usize,
    pub records: usize,
    pub bytes: usize,
    recent: VecDeque<(Instant, usize)>,
    recent_bytes: usize,
}

impl Default for TransferStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            buffers: 0,
            records: 0,
            bytes: 0,
            recent: VecDeque::new(),
            recent_bytes: 0,
        }
    }
}

impl TransferStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Count one completed buffer holding `records` records.
    pub fn record_buffer(&mut self, bytes: usize, records: usize) {
        let now = Instant::now();
        self.buffers += 1;
        self.records += records;
        self.bytes += bytes;

        self.recent.push_back((now, bytes));
        self.recent_bytes += bytes;
        while let Some(&(at, size)) = self.recent.front() {
            if now.duration_since(at) <= RATE_WINDOW {
                break;
            }
            self.recent.pop_front();
            self.recent_bytes -= size;
        }
    }

    /// MiB/s over the last second of completed buffers.
    pub fn recent_rate(&self) -> f64 {
        self.recent_bytes as f64 / RATE_WINDOW.as_secs_f64() / MIB
    }

    pub fn restart(&mut self) {
        *self = Self::default();
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            elapsed: self.started.elapsed(),
            buffers: self.buffers,
            records: self.records,
            bytes: self.bytes,
        }
    }
}

/// Totals of a finished capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSummary {
    pub elapsed: Duration,
    pub buffers: usize,
    pub records: usize,
    pub bytes: usize,
}

impl TransferSummary {
    fn per_sec(&self, count: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }

    pub fn log(&self) {
        info!("Capture completed in {:.6} sec", self.elapsed.as_secs_f64());
        info!(
            "Captured {} buffers ({:.2} buffers per sec)",
            self.buffers,
            self.per_sec(self.buffers)
        );
        info!(
            "Captured {} records ({:.2} records per sec)",
            self.records,
            self.per_sec(self.records)
        );
        info!(
            "Transferred {} bytes ({:.2} bytes per sec)",
            self.bytes,
            self.per_sec(self.bytes)
        );
    }
}
