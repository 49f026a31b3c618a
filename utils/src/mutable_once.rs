use std::cell::UnsafeCell;
use std::ops::Deref;

/// A cell that is written exactly once during construction, before the owning
/// value is shared, and read-only afterwards. Used for self-referential
/// `Weak<Self>` back-pointers.
pub struct MutableOnce<T> {
    inner: UnsafeCell<T>,
}

impl<T> MutableOnce<T> {
    pub fn new(value: T) -> Self {
        MutableOnce {
            inner: UnsafeCell::new(value),
        }
    }

    /// Replaces the contained value.
    ///
    /// # Safety
    /// The caller must guarantee that no other reference to the value exists
    /// and that the cell is not yet shared across threads, i.e. this is only
    /// called from the constructor that still uniquely owns the object.
    pub unsafe fn replace(&self, value: T) {
        *self.inner.get() = value;
    }

    fn as_ref(&self) -> &T {
        unsafe { &*self.inner.get() }
    }
}

impl<T> Deref for MutableOnce<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.as_ref()
    }
}

unsafe impl<T: Send> Send for MutableOnce<T> {}
unsafe impl<T: Send + Sync> Sync for MutableOnce<T> {}
