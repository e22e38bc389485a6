use std::time::{Duration, Instant};

/// Elapsed playback time: time accumulated over finished play segments plus
/// the running stopwatch of the current one.
///
/// Every query folds the stopwatch into the accumulator, so readings are
/// exact and monotonic no matter how often they are taken.
#[derive(Debug, Default, Clone)]
pub struct PositionTracker {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Starts the stopwatch; a no-op when it is already running.
    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Folds the running segment into the accumulator and stops the stopwatch.
    pub fn stop(&mut self) {
        self.fold();
        self.running_since = None;
    }

    /// Stops the stopwatch and sets the accumulator to `ms`.
    pub fn reset_to(&mut self, ms: u64) {
        self.accumulated = Duration::from_millis(ms);
        self.running_since = None;
    }

    /// Moves the accumulator by `delta_ms`, saturating at zero.
    pub fn offset_by(&mut self, delta_ms: i64) {
        self.fold();
        let delta = Duration::from_millis(delta_ms.unsigned_abs());
        self.accumulated = if delta_ms >= 0 {
            self.accumulated.saturating_add(delta)
        } else {
            self.accumulated.saturating_sub(delta)
        };
    }

    pub fn elapsed(&mut self) -> Duration {
        self.fold();
        self.accumulated
    }

    pub fn elapsed_ms(&mut self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn fold(&mut self) {
        if let Some(since) = self.running_since {
            let now = Instant::now();
            self.accumulated += now.saturating_duration_since(since);
            self.running_since = Some(now);
        }
    }
}
