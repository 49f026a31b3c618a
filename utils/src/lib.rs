pub mod merkle;
pub mod mutable_once;
pub mod observer;
pub mod rate_limit;
pub mod synchronizer;
pub mod throttled_queue;
pub mod timers;
pub mod unique_id;

/// Upgrades a `Weak` reference or returns from the enclosing function.
#[macro_export]
macro_rules! upgrade_weak {
    ($weak_ref: expr) => {
        match $weak_ref.upgrade() {
            Some(arc) => arc,
            None => return,
        }
    };
}
