use std::sync::{Arc, Weak};

pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F: Fn(&E)> Listener<E> for F
where
    F: Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event);
    }
}

pub type ListenerHandle = usize;

/// Multi-listener event source. Listeners are identified by the handle
/// returned from `register` and can be detached individually.
#[derive(Default)]
pub struct Notifier<'l, E> {
    listeners: Vec<(ListenerHandle, Box<dyn Listener<E> + 'l>)>,
    next_handle: ListenerHandle,
}

impl<'l, E> Notifier<'l, E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_handle: 0,
        }
    }

    pub fn register<T: Listener<E> + 'l>(&mut self, listener: T) -> ListenerHandle {
        let handle = self.next_handle;
        self.listeners.push((handle, Box::new(listener)));
        self.next_handle += 1;
        handle
    }

    pub fn deregister(&mut self, handle: ListenerHandle) {
        for (i, (stored_handle, _)) in self.listeners.iter().enumerate() {
            if handle == *stored_handle {
                self.listeners.remove(i);
                return;
            }
        }
    }

    pub fn notify(&self, event: E) {
        for (_, listener) in &self.listeners {
            listener.on_event(&event);
        }
    }
}

pub trait PassThroughListener<E>: Send + Sync {
    fn on_event(&self, event: E);
}

impl<E, F: Fn(E)> PassThroughListener<E> for F
where
    F: Send + Sync,
{
    fn on_event(&self, event: E) {
        self(event);
    }
}

/// Single-listener event source that hands the event over by value.
pub struct PassThroughNotifier<'l, E> {
    listener: Option<Box<dyn PassThroughListener<E> + 'l>>,
}

impl<'l, E> Default for PassThroughNotifier<'l, E> {
    fn default() -> Self {
        Self { listener: None }
    }
}

impl<'l, E> PassThroughNotifier<'l, E> {
    pub fn new() -> Self {
        Self { listener: None }
    }

    pub fn register<T: PassThroughListener<E> + 'l>(&mut self, listener: T) {
        self.listener = Some(Box::new(listener));
    }

    pub fn deregister(&mut self) {
        self.listener = None;
    }

    pub fn notify(&self, event: E) {
        if let Some(ref listener) = self.listener {
            listener.on_event(event);
        }
    }
}

pub fn weak_listener<T, E, C>(weak_ref: Weak<T>, closure: C) -> impl Listener<E>
where
    C: Fn(Arc<T>, &E) + Send + Sync,
    T: Send + Sync,
{
    move |event: &E| {
        if let Some(arc) = weak_ref.upgrade() {
            closure(arc, event);
        }
    }
}

pub fn weak_passthru_listener<T, E, C>(weak_ref: Weak<T>, closure: C) -> impl PassThroughListener<E>
where
    C: Fn(Arc<T>, E) + Send + Sync,
    T: Send + Sync,
{
    move |event: E| {
        if let Some(arc) = weak_ref.upgrade() {
            closure(arc, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn notifier_dispatches_to_all_listeners() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut notifier: Notifier<u32> = Notifier::new();
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            notifier.register(move |event: &u32| {
                counter.fetch_add(*event as usize, Ordering::SeqCst);
            });
        }
        notifier.notify(2);
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn deregistered_listeners_stay_silent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut notifier: Notifier<()> = Notifier::new();
        let c = Arc::clone(&counter);
        let handle = notifier.register(move |_: &()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        notifier.deregister(handle);
        notifier.notify(());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn weak_listener_drops_with_its_target() {
        let target = Arc::new(AtomicUsize::new(0));
        let mut notifier: Notifier<()> = Notifier::new();
        notifier.register(weak_listener(Arc::downgrade(&target), |target, _| {
            target.fetch_add(1, Ordering::SeqCst);
        }));
        notifier.notify(());
        assert_eq!(target.load(Ordering::SeqCst), 1);
        let weak = Arc::downgrade(&target);
        drop(target);
        notifier.notify(());
        assert!(weak.upgrade().is_none());
    }
}
