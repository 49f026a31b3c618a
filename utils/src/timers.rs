use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

/// Registry of named one-shot and interval timers.
///
/// Keys identify timers; setting a timer under a key that is already armed
/// cancels the previous one. A one-shot removes itself from the registry
/// right before its callback runs, so `delay_exists` is `false` inside the
/// callback and the callback may re-arm the same key.
pub struct Timers<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    timers: Arc<Mutex<HashMap<K, TimerHandle>>>,
}

struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl<K> Timers<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Timers {
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arms a one-shot timer that invokes `func` after `delay`.
    pub fn set_delay<F>(&self, key: K, func: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.arm(key.clone(), Arc::clone(&cancelled));

        let weak_registry: Weak<Mutex<HashMap<K, TimerHandle>>> = Arc::downgrade(&self.timers);
        thread::spawn(move || {
            thread::sleep(delay);
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            // Deregister before firing so the callback can re-arm the key.
            if let Some(registry) = weak_registry.upgrade() {
                let mut timers = registry.lock();
                let current = timers
                    .get(&key)
                    .map(|handle| Arc::ptr_eq(&handle.cancelled, &cancelled))
                    .unwrap_or(false);
                if current {
                    timers.remove(&key);
                }
            }
            if !cancelled.load(Ordering::Acquire) {
                func();
            }
        });
    }

    /// Cancels and re-arms a one-shot timer.
    pub fn reset_delay<F>(&self, key: K, func: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        self.set_delay(key, func, delay);
    }

    /// Cancels the one-shot or interval registered under `key`.
    pub fn clear_delay(&self, key: &K) {
        if let Some(handle) = self.timers.lock().remove(key) {
            handle.cancelled.store(true, Ordering::Release);
        }
    }

    /// Arms a repeating timer that invokes `func` every `interval` until
    /// cleared.
    pub fn set_interval<F>(&self, key: K, func: F, interval: Duration)
    where
        F: Fn() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.arm(key, Arc::clone(&cancelled));

        thread::spawn(move || loop {
            thread::sleep(interval);
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            func();
        });
    }

    pub fn clear_interval(&self, key: &K) {
        self.clear_delay(key);
    }

    pub fn delay_exists(&self, key: &K) -> bool {
        self.timers.lock().contains_key(key)
    }

    /// Cancels every registered timer.
    pub fn clear_all(&self) {
        let mut timers = self.timers.lock();
        for (_, handle) in timers.drain() {
            handle.cancelled.store(true, Ordering::Release);
        }
    }

    fn arm(&self, key: K, cancelled: Arc<AtomicBool>) {
        let mut timers = self.timers.lock();
        if let Some(old) = timers.insert(key, TimerHandle { cancelled }) {
            old.cancelled.store(true, Ordering::Release);
        }
    }
}

impl<K> Default for Timers<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for Timers<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::Timers;

    #[test]
    fn delay_fires_once() {
        let timers: Timers<&'static str> = Timers::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        timers.set_delay("t", move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        }, Duration::from_millis(20));
        assert!(timers.delay_exists(&"t"));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!timers.delay_exists(&"t"));
    }

    #[test]
    fn cleared_delay_does_not_fire() {
        let timers: Timers<&'static str> = Timers::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        timers.set_delay("t", move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        }, Duration::from_millis(30));
        timers.clear_delay(&"t");
        thread::sleep(Duration::from_millis(80));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rearming_replaces_the_old_delay() {
        let timers: Timers<&'static str> = Timers::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);
        timers.set_delay("t", move || {
            c1.fetch_add(1, Ordering::SeqCst);
        }, Duration::from_millis(20));
        let c2 = Arc::clone(&counter);
        timers.reset_delay("t", move || {
            c2.fetch_add(10, Ordering::SeqCst);
        }, Duration::from_millis(40));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn interval_fires_until_cleared() {
        let timers: Timers<&'static str> = Timers::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        timers.set_interval("i", move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        }, Duration::from_millis(15));
        thread::sleep(Duration::from_millis(80));
        timers.clear_interval(&"i");
        // Let a tick that was mid-flight during the clear settle.
        thread::sleep(Duration::from_millis(30));
        let fired = counter.load(Ordering::SeqCst);
        assert!(fired >= 2, "interval fired {} times", fired);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(counter.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn clear_all_cancels_everything() {
        let timers: Timers<u32> = Timers::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for key in 0..3u32 {
            let counter2 = Arc::clone(&counter);
            timers.set_delay(key, move || {
                counter2.fetch_add(1, Ordering::SeqCst);
            }, Duration::from_millis(30));
        }
        timers.clear_all();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
