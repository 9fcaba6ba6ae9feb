//! Process-wide table mapping opaque handles to live instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use super::types::CgymHandle;

type Entries<T> = HashMap<CgymHandle, Arc<Mutex<T>>>;

/// Handle table usable as a `static`. Each entry has its own lock, so calls on
/// distinct instances never wait on each other beyond the table lookup.
pub struct HandleTable<T> {
    entries: OnceLock<Mutex<Entries<T>>>,
    next: AtomicU64,
}

impl<T> HandleTable<T> {
    pub const fn new() -> Self {
        Self { entries: OnceLock::new(), next: AtomicU64::new(1) }
    }

    fn entries(&self) -> MutexGuard<'_, Entries<T>> {
        self.entries
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_handle(&self) -> CgymHandle {
        loop {
            let handle = self.next.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }

    /// Store `value` and return its fresh, non-zero handle.
    pub fn insert(&self, value: T) -> (CgymHandle, Arc<Mutex<T>>) {
        let handle = self.next_handle();
        let entry = Arc::new(Mutex::new(value));
        self.entries().insert(handle, Arc::clone(&entry));
        (handle, entry)
    }

    pub fn get(&self, handle: CgymHandle) -> Option<Arc<Mutex<T>>> {
        self.entries().get(&handle).map(Arc::clone)
    }

    /// Forget `handle`. The value is dropped once the last in-flight call releases it.
    pub fn remove(&self, handle: CgymHandle) -> Option<Arc<Mutex<T>>> {
        self.entries().remove(&handle)
    }

    pub fn len(&self) -> usize { self.entries().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self { Self::new() }
}
