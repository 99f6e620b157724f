use std::time::Duration;

use relink_core::constants::{RESEND_TIMEOUT_FACTOR, RESEND_TIMEOUT_MAX, RESEND_TIMEOUT_MIN};

/// Resend timeout used before the first round-trip sample.
const INITIAL_RESEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Round-trip time tracking and the resend timeout derived from it.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed round-trip time, unset until the first sample
    avg: Option<Duration>,
    /// Smallest sample seen
    min: Option<Duration>,
    /// Largest sample seen
    max: Option<Duration>,
    /// Smoothing factor of the moving average
    alpha: f32,
    /// Current per-attempt resend timeout
    resend_timeout: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl RttEstimator {
    /// Creates an estimator with the given EWMA smoothing factor.
    pub fn new(alpha: f32) -> Self {
        Self { avg: None, min: None, max: None, alpha, resend_timeout: INITIAL_RESEND_TIMEOUT }
    }

    /// Feeds a round-trip sample and recomputes the resend timeout.
    pub fn report(&mut self, sample: Duration) {
        let avg = match self.avg {
            None => sample,
            Some(avg) => {
                // EWMA: avg = (1 - α) * avg + α * sample
                let secs = (1.0 - self.alpha) * avg.as_secs_f32() + self.alpha * sample.as_secs_f32();
                Duration::from_secs_f32(secs.max(0.0))
            }
        };
        self.avg = Some(avg);
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        self.max = Some(self.max.map_or(sample, |m| m.max(sample)));

        self.resend_timeout = Duration::from_secs_f32(
            (avg.as_secs_f32() * RESEND_TIMEOUT_FACTOR).clamp(RESEND_TIMEOUT_MIN, RESEND_TIMEOUT_MAX),
        );
    }

    /// Doubles the resend timeout, up to the maximum. Called when reliables timed out.
    pub fn back_off(&mut self) {
        let doubled = self.resend_timeout.saturating_mul(2);
        self.resend_timeout = doubled.min(Duration::from_secs_f32(RESEND_TIMEOUT_MAX));
    }

    /// Smoothed round-trip time.
    pub fn avg_rtt(&self) -> Option<Duration> {
        self.avg
    }

    /// Smallest round-trip sample.
    pub fn min_rtt(&self) -> Option<Duration> {
        self.min
    }

    /// Largest round-trip sample.
    pub fn max_rtt(&self) -> Option<Duration> {
        self.max
    }

    /// Current resend timeout.
    pub fn resend_timeout(&self) -> Duration {
        self.resend_timeout
    }
}
