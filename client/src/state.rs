use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// State shared between a connection handle and its worker.
///
/// Critical sections are short and never span an await, so a poisoned lock
/// only means a panic elsewhere; the data itself is still consistent.
pub(crate) struct Shared<T> {
    inner: RwLock<T>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
