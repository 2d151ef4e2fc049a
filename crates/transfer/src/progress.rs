use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Completion percentage: `floor(bytes * 100 / total)`, capped at 100.
///
/// An empty transfer is complete by definition.
pub fn percent(bytes: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (u128::from(bytes) * 100 / u128::from(total)).min(100);
    pct as u8
}

/// Clamps a peer-reported percentage into `0..=100`.
pub fn clamp_percent(raw: i32) -> u8 {
    raw.clamp(0, 100) as u8
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Default span of the rate window.
const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Throughput over a sliding time window.
///
/// Samples older than the window are dropped as new ones arrive, so the
/// rate follows the recent pace of the transfer rather than its average.
#[derive(Debug)]
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Records `bytes` moved just now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&mut self, now: Instant, bytes: u64) {
        self.samples.push_back((now, bytes));
        while let Some(&(oldest, _)) = self.samples.front() {
            if now.duration_since(oldest) <= self.window {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Bytes per second across the window; 0 until two samples exist.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(first, _)), Some(&(last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        // The first sample marks the start of the window; its bytes were
        // moved before it.
        let bytes: u64 = self.samples.iter().skip(1).map(|&(_, b)| b).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(SPEED_WINDOW)
    }
}
