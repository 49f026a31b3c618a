use std::time::{Duration, Instant};

/// Limits the number of occurrences of an action within a time period.
pub struct RateLimit {
    allowed_occurrences: usize,
    time_period: Duration,
    last_reset: Instant,
    counter: usize,
}

impl RateLimit {
    const ONE_MINUTE: Duration = Duration::from_secs(60);

    pub fn new(allowed_occurrences: usize, time_period: Duration) -> Self {
        RateLimit {
            allowed_occurrences,
            time_period,
            last_reset: Instant::now(),
            counter: 0,
        }
    }

    pub fn new_per_minute(allowed_occurrences: usize) -> Self {
        Self::new(allowed_occurrences, Self::ONE_MINUTE)
    }

    fn check_reset(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_reset) > self.time_period {
            self.last_reset = now;
            self.counter = 0;
        }
    }

    /// Notes a single occurrence; returns whether it is still within the limit.
    pub fn note_single(&mut self) -> bool {
        self.note(1)
    }

    pub fn note(&mut self, number: usize) -> bool {
        self.check_reset();
        self.counter += number;
        self.counter <= self.allowed_occurrences
    }

    pub fn num_allowed(&mut self) -> usize {
        self.check_reset();
        self.allowed_occurrences.saturating_sub(self.counter)
    }
}
