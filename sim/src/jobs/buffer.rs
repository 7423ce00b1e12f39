//! Shared frame buffers.
//!
//! A `Buffer` is the unit of access declaration: jobs name the buffers they
//! read and write, and fences order jobs whose declarations overlap. The lock
//! inside is never waited on. Acquiring it while another job holds an
//! incompatible guard is reported as `JobError::Contended`, because with
//! correct fences that cannot happen.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use crate::error::JobError;

/// Identity of a buffer for access declarations.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(usize);

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({:#x})", self.0)
    }
}

pub struct Buffer<T> {
    name: &'static str,
    data: Arc<RwLock<T>>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            data: Arc::clone(&self.data),
        }
    }
}

impl<T> Buffer<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            data: Arc::new(RwLock::new(value)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> BufferId {
        BufferId(Arc::as_ptr(&self.data) as *const () as usize)
    }

    /// Shared access.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>, JobError> {
        match self.data.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(JobError::Contended { buffer: self.name }),
            Err(TryLockError::Poisoned(_)) => Err(JobError::Poisoned { buffer: self.name }),
        }
    }

    /// Exclusive access.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>, JobError> {
        match self.data.try_write() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(JobError::Contended { buffer: self.name }),
            Err(TryLockError::Poisoned(_)) => Err(JobError::Poisoned { buffer: self.name }),
        }
    }

    /// Whether a job panicked while holding this buffer.
    pub fn is_poisoned(&self) -> bool {
        self.data.is_poisoned()
    }

    /// Accept the contents left behind by a panicking job. Returns whether
    /// the buffer had been poisoned.
    pub fn recover(&self) -> bool {
        let poisoned = self.data.is_poisoned();
        if poisoned {
            self.data.clear_poison();
        }
        poisoned
    }

    /// Take the contents out, leaving `T::default()`. Main thread only.
    pub fn take(&self) -> Result<T, JobError>
    where
        T: Default,
    {
        Ok(std::mem::take(&mut *self.write()?))
    }
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("id", &self.id())
            .finish()
    }
}
