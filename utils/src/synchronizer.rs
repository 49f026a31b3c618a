use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;

type Task = Box<dyn FnOnce(SynchronizerGuard) + Send>;

#[derive(Default)]
struct KeyState {
    busy: bool,
    queue: VecDeque<Task>,
}

#[derive(Default)]
struct SynchronizerState {
    keys: HashMap<&'static str, KeyState>,
}

/// Serializes tasks grouped by a string key.
///
/// Tasks pushed under the same key run one at a time in submission order;
/// different keys are independent. Each task receives a [`SynchronizerGuard`]
/// that holds the key: a task that completes synchronously simply lets the
/// guard drop at the end of its body, while a task with an asynchronous
/// completion (request/response) stores the guard and drops it once the
/// response or its timeout releases the slot. The next queued task for a key
/// runs on whichever thread releases the guard.
pub struct MultiSynchronizer {
    state: Arc<Mutex<SynchronizerState>>,
}

impl MultiSynchronizer {
    pub fn new() -> Self {
        MultiSynchronizer {
            state: Arc::new(Mutex::new(SynchronizerState::default())),
        }
    }

    /// Submits `task` under `key`. The returned receiver resolves with the
    /// task's return value once it ran; it is cancelled if the task is
    /// dropped by [`clear`](Self::clear) before starting.
    pub fn push<T, F>(&self, key: &'static str, task: F) -> oneshot::Receiver<T>
    where
        F: FnOnce(SynchronizerGuard) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: Task = Box::new(move |guard| {
            let _ = tx.send(task(guard));
        });

        let mut task = Some(task);

        let run_now = {
            let mut state = self.state.lock();
            let entry = state.keys.entry(key).or_default();
            if entry.busy {
                entry.queue.push_back(task.take().unwrap());
                false
            } else {
                entry.busy = true;
                true
            }
        };

        if run_now {
            task.take().unwrap()(SynchronizerGuard {
                state: Arc::clone(&self.state),
                key,
                armed: true,
            });
        }
        rx
    }

    /// Drops every queued but not yet started task. Their receivers resolve
    /// with a cancellation error. Running tasks (and tasks holding their
    /// guard) are unaffected; their keys free up when the guards drop.
    pub fn clear(&self) {
        let dropped: Vec<Task> = {
            let mut state = self.state.lock();
            state
                .keys
                .values_mut()
                .flat_map(|entry| entry.queue.drain(..))
                .collect()
        };
        // Dropping outside the lock; senders inside the tasks cancel here.
        drop(dropped);
    }
}

impl Default for MultiSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a synchronizer key. Dropping the guard releases the key and runs the
/// next queued task, if any, on the current thread.
///
/// Do not drop a guard while holding locks that the next task may take.
pub struct SynchronizerGuard {
    state: Arc<Mutex<SynchronizerState>>,
    key: &'static str,
    armed: bool,
}

impl Drop for SynchronizerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let next = {
            let mut state = self.state.lock();
            match state.keys.get_mut(self.key) {
                Some(entry) => match entry.queue.pop_front() {
                    Some(task) => Some(task),
                    None => {
                        entry.busy = false;
                        None
                    }
                },
                None => None,
            }
        };
        if let Some(task) = next {
            task(SynchronizerGuard {
                state: Arc::clone(&self.state),
                key: self.key,
                armed: true,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use futures::executor::block_on;

    use super::MultiSynchronizer;

    #[test]
    fn tasks_run_in_submission_order() {
        let sync = MultiSynchronizer::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            let rx = sync.push("key", move |_guard| {
                order.lock().unwrap().push(i);
            });
            block_on(rx).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn a_retained_guard_defers_later_tasks() {
        let sync = MultiSynchronizer::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let parked = Arc::new(Mutex::new(None));
        let parked2 = Arc::clone(&parked);
        let _rx1 = sync.push("key", move |guard| {
            *parked2.lock().unwrap() = Some(guard);
        });

        let ran2 = Arc::clone(&ran);
        let rx2 = sync.push("key", move |_guard| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        // Releasing the stored guard runs the queued task.
        parked.lock().unwrap().take();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        block_on(rx2).unwrap();
    }

    #[test]
    fn different_keys_do_not_serialize() {
        let sync = MultiSynchronizer::new();
        let parked = Arc::new(Mutex::new(None));
        let parked2 = Arc::clone(&parked);
        let _rx = sync.push("a", move |guard| {
            *parked2.lock().unwrap() = Some(guard);
        });

        let rx = sync.push("b", |_guard| 42);
        assert_eq!(block_on(rx).unwrap(), 42);
        parked.lock().unwrap().take();
    }

    #[test]
    fn clear_cancels_queued_tasks() {
        let sync = MultiSynchronizer::new();
        let parked = Arc::new(Mutex::new(None));
        let parked2 = Arc::clone(&parked);
        let _rx1 = sync.push("key", move |guard| {
            *parked2.lock().unwrap() = Some(guard);
        });

        let rx2 = sync.push("key", |_guard| 1);
        sync.clear();
        parked.lock().unwrap().take();
        assert!(block_on(rx2).is_err());
    }

    #[test]
    fn task_results_are_delivered() {
        let sync = MultiSynchronizer::new();
        let rx = sync.push("key", |_guard| "done");
        assert_eq!(block_on(rx).unwrap(), "done");
    }
}
