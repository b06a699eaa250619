// src/core/progress.rs

use std::time::{Duration, Instant};

/// Elapsed/remaining estimate for a run of known size.
#[derive(Debug, Clone, Copy)]
pub struct Eta {
    start: Instant,
    total: u64,
}

/// One reading of an [`Eta`]. `remaining` is `None` until something was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtaSnapshot {
    pub elapsed: Duration,
    pub remaining: Option<Duration>,
}

impl Eta {
    pub fn start(total: u64) -> Self {
        Self::started_at(Instant::now(), total)
    }

    pub fn started_at(start: Instant, total: u64) -> Self {
        Self { start, total }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn get(&self, processed: u64) -> EtaSnapshot {
        self.at(Instant::now(), processed)
    }

    /// `remaining = (total - processed) * (elapsed / processed)`
    pub fn at(&self, now: Instant, processed: u64) -> EtaSnapshot {
        let elapsed = now.saturating_duration_since(self.start);
        let remaining = (processed > 0).then(|| {
            let per_item = elapsed.as_secs_f64() / processed as f64;
            Duration::from_secs_f64(per_item * self.total.saturating_sub(processed) as f64)
        });
        EtaSnapshot { elapsed, remaining }
    }
}

impl EtaSnapshot {
    pub fn elapsed_human(&self) -> String {
        human(self.elapsed)
    }

    pub fn remaining_human(&self) -> String {
        self.remaining.map(human).unwrap_or_else(|| "unknown".to_string())
    }
}

/// `1h 02m 03s`, `4m 05s` or `6s`.
pub fn human(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Pause/resume decision issued to a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleSignal {
    Pause,
    Resume,
}

/// Hysteresis between a high and a low backlog watermark.
///
/// Pauses once the backlog exceeds `high`, resumes only once it has fallen
/// below `low`. Each transition is signalled exactly once.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    high: u64,
    low: u64,
    paused: bool,
}

impl Throttle {
    pub fn new(high: u64, low: u64) -> Self {
        Self {
            high,
            low: low.min(high),
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn update(&mut self, backlog: u64) -> Option<ThrottleSignal> {
        if !self.paused && backlog > self.high {
            self.paused = true;
            Some(ThrottleSignal::Pause)
        } else if self.paused && backlog < self.low {
            self.paused = false;
            Some(ThrottleSignal::Resume)
        } else {
            None
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_durations() {
        assert_eq!(human(Duration::from_secs(6)), "6s");
        assert_eq!(human(Duration::from_secs(245)), "4m 05s");
        assert_eq!(human(Duration::from_secs(3723)), "1h 02m 03s");
        let snapshot = EtaSnapshot { elapsed: Duration::ZERO, remaining: None };
        assert_eq!(snapshot.remaining_human(), "unknown");
    }

    #[test]
    fn eta_extrapolates_linearly() {
        let start = Instant::now();
        let eta = Eta::started_at(start, 100);
        let snapshot = eta.at(start + Duration::from_secs(10), 25);
        assert_eq!(snapshot.elapsed, Duration::from_secs(10));
        assert_eq!(snapshot.remaining, Some(Duration::from_secs(30)));
    }

    #[test]
    fn eta_without_progress_has_no_estimate() {
        let start = Instant::now();
        let eta = Eta::started_at(start, 100);
        assert_eq!(eta.at(start + Duration::from_secs(3), 0).remaining, None);
    }

    #[test]
    fn throttle_pauses_above_high_and_resumes_below_low() {
        let mut throttle = Throttle::new(1000, 100);
        assert_eq!(throttle.update(1000), None);
        assert_eq!(throttle.update(1001), Some(ThrottleSignal::Pause));
        assert_eq!(throttle.update(1500), None);
        // Between the watermarks nothing changes.
        assert_eq!(throttle.update(500), None);
        assert_eq!(throttle.update(100), None);
        assert!(throttle.is_paused());
        assert_eq!(throttle.update(99), Some(ThrottleSignal::Resume));
        assert_eq!(throttle.update(500), None);
        assert!(!throttle.is_paused());
    }
}
