use std::time::Duration;

/// Number of rolled samples the running average converges over.
const RATE_SAMPLES_MAX: u32 = 10;

/// Rolling throughput figure in KB/s.
///
/// Bytes are accumulated with [`RateCounter::record`] and converted into a rate each
/// time the owner calls [`RateCounter::roll`] with the elapsed measurement period.
#[derive(Debug, Clone, Default)]
pub struct RateCounter {
    /// Bytes recorded in the current period
    current_bytes: u64,
    /// Rate of the last completed period
    cur_kbps: f32,
    /// Running average over the last few periods
    avg_kbps: f32,
    /// Highest period rate observed
    max_kbps: f32,
    /// Number of rolled periods, capped at `RATE_SAMPLES_MAX`
    samples: u32,
}

impl RateCounter {
    /// Creates an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bytes` to the current period.
    pub fn record(&mut self, bytes: usize) {
        self.current_bytes = self.current_bytes.saturating_add(bytes as u64);
    }

    /// Closes the current period of length `elapsed` and updates the rates.
    pub fn roll(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f32();
        self.cur_kbps = if secs > 0.0 { self.current_bytes as f32 / secs / 1024.0 } else { 0.0 };
        self.current_bytes = 0;

        if self.cur_kbps > self.max_kbps {
            self.max_kbps = self.cur_kbps;
        }

        self.samples = (self.samples + 1).min(RATE_SAMPLES_MAX);
        let old_fraction = (self.samples - 1) as f32 / self.samples as f32;
        self.avg_kbps = self.avg_kbps * old_fraction + self.cur_kbps * (1.0 - old_fraction);
    }

    /// Bytes recorded since the last roll.
    pub fn pending_bytes(&self) -> u64 {
        self.current_bytes
    }

    /// Rate of the last completed period.
    pub fn cur_kbps(&self) -> f32 {
        self.cur_kbps
    }

    /// Running average rate.
    pub fn avg_kbps(&self) -> f32 {
        self.avg_kbps
    }

    /// Highest period rate seen.
    pub fn max_kbps(&self) -> f32 {
        self.max_kbps
    }
}
