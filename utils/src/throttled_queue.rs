use std::hash::Hash;
use std::time::{Duration, Instant};

use collections::UniqueQueue;

/// A unique FIFO queue whose dequeue side is gated by a token bucket.
///
/// The bucket starts full at `max_at_once` tokens and regains
/// `allowance_per_interval` tokens every `interval`, capped at `max_at_once`.
/// Refill is computed lazily from a monotonic clock on each access, so no
/// timer is needed per queue.
///
/// An optional backlog bound applies to the enqueue side; enqueueing onto a
/// full backlog silently drops the oldest queued element.
pub struct ThrottledQueue<T>
where
    T: Hash + Eq + Clone,
{
    queue: UniqueQueue<T>,
    max_at_once: usize,
    interval: Duration,
    allowance_per_interval: usize,
    available_now: usize,
    last_refill: Instant,
    stopped: bool,
}

impl<T> ThrottledQueue<T>
where
    T: Hash + Eq + Clone,
{
    /// * `max_at_once` - Token capacity; also the upper bound for a single `dequeue_multi`.
    /// * `interval` - Refill period.
    /// * `allowance_per_interval` - Tokens gained per period.
    /// * `max_backlog` - Bound on queued elements; `None` is unbounded.
    pub fn new(
        max_at_once: usize,
        interval: Duration,
        allowance_per_interval: usize,
        max_backlog: Option<usize>,
    ) -> Self {
        ThrottledQueue {
            queue: match max_backlog {
                Some(max) => UniqueQueue::with_max_length(max),
                None => UniqueQueue::new(),
            },
            max_at_once,
            interval,
            allowance_per_interval,
            available_now: max_at_once,
            last_refill: Instant::now(),
            stopped: false,
        }
    }

    fn refill(&mut self) {
        if self.stopped || self.interval.is_zero() {
            return;
        }
        let elapsed = self.last_refill.elapsed();
        let periods = (elapsed.as_millis() / self.interval.as_millis()) as u32;
        if periods > 0 {
            self.available_now = self
                .available_now
                .saturating_add(self.allowance_per_interval * periods as usize)
                .min(self.max_at_once);
            self.last_refill += self.interval * periods;
        }
    }

    pub fn enqueue(&mut self, value: T) {
        if self.stopped {
            return;
        }
        self.queue.enqueue(value);
    }

    pub fn remove(&mut self, value: &T) -> bool {
        self.queue.remove(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// True iff the backlog is non-empty and a token is available.
    pub fn check_available(&mut self) -> bool {
        self.refill();
        self.available_now > 0 && !self.queue.is_empty()
    }

    /// Number of elements that could be dequeued right now.
    pub fn num_available(&mut self) -> usize {
        self.refill();
        self.available_now.min(self.queue.len())
    }

    /// Dequeues a single element, consuming one token.
    pub fn dequeue(&mut self) -> Option<T> {
        self.refill();
        if self.available_now == 0 {
            return None;
        }
        let value = self.queue.dequeue()?;
        self.available_now -= 1;
        Some(value)
    }

    /// Dequeues `min(n, backlog, tokens)` elements in FIFO order.
    pub fn dequeue_multi(&mut self, n: usize) -> Vec<T> {
        self.refill();
        let n = n.min(self.available_now);
        let values = self.queue.dequeue_multi(n);
        self.available_now -= values.len();
        values
    }

    /// Permanently halts refilling and drains the backlog.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.available_now = 0;
        self.queue.clear();
    }
}
