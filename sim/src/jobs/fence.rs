//! Completion tokens for scheduled jobs.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

type Continuation = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct FenceInner {
    done: bool,
    continuations: Vec<Continuation>,
}

#[derive(Default)]
struct FenceState {
    inner: Mutex<FenceInner>,
    signaled: Condvar,
}

/// Signals that every write of a job is visible.
///
/// Cheap to clone. The default fence is already complete; depending on it
/// runs a job immediately.
#[derive(Clone, Default)]
pub struct Fence {
    state: Option<Arc<FenceState>>,
}

impl Fence {
    /// A fence with nothing to wait for.
    pub fn completed() -> Self {
        Self { state: None }
    }

    pub(crate) fn pending() -> Self {
        Self {
            state: Some(Arc::new(FenceState::default())),
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.state {
            None => true,
            Some(state) => state.inner.lock().unwrap_or_else(PoisonError::into_inner).done,
        }
    }

    /// Whether two fences are the same token.
    pub fn ptr_eq(a: &Fence, b: &Fence) -> bool {
        match (&a.state, &b.state) {
            (None, None) => true,
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Run `f` once this fence completes; immediately if it already has.
    /// `f` runs on whichever thread signals the fence.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(state) = &self.state else {
            f();
            return;
        };
        let mut inner = state.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.done {
            drop(inner);
            f();
        } else {
            inner.continuations.push(Box::new(f));
        }
    }

    /// Mark complete, wake waiters and run continuations.
    pub(crate) fn signal(&self) {
        let Some(state) = &self.state else {
            return;
        };
        let continuations = {
            let mut inner = state.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.done {
                return;
            }
            inner.done = true;
            std::mem::take(&mut inner.continuations)
        };
        state.signaled.notify_all();
        for continuation in continuations {
            continuation();
        }
    }

    /// Block the calling thread until the fence completes.
    ///
    /// Only the main thread waits on fences; calling this from inside a job
    /// can starve the worker pool.
    pub fn complete(&self) {
        let Some(state) = &self.state else {
            return;
        };
        let mut inner = state.inner.lock().unwrap_or_else(PoisonError::into_inner);
        while !inner.done {
            inner = state
                .signaled
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Conjunction: completes when every input has completed.
    pub fn combine(fences: &[Fence]) -> Fence {
        let pending: Vec<&Fence> = fences.iter().filter(|f| !f.is_complete()).collect();
        match pending.as_slice() {
            [] => Fence::completed(),
            [single] => (*single).clone(),
            _ => {
                let combined = Fence::pending();
                let remaining = Arc::new(AtomicUsize::new(pending.len()));
                for fence in &pending {
                    let remaining = Arc::clone(&remaining);
                    let combined = combined.clone();
                    fence.on_complete(move || {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            combined.signal();
                        }
                    });
                }
                combined
            }
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_completed_fence_runs_continuation_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        Fence::completed().on_complete(move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_combine_waits_for_all() {
        let a = Fence::pending();
        let b = Fence::pending();
        let both = Fence::combine(&[a.clone(), b.clone(), Fence::completed()]);

        a.signal();
        assert!(!both.is_complete());
        b.signal();
        assert!(both.is_complete());
    }

    #[test]
    fn test_combine_of_completed_is_completed() {
        let combined = Fence::combine(&[Fence::completed(), Fence::completed()]);
        assert!(combined.is_complete());
        assert!(Fence::combine(&[]).is_complete());
    }

    #[test]
    fn test_combine_single_pending_is_passthrough() {
        let a = Fence::pending();
        let combined = Fence::combine(&[a.clone(), Fence::completed()]);
        assert!(Fence::ptr_eq(&a, &combined));
    }

    #[test]
    fn test_complete_blocks_until_signaled() {
        let fence = Fence::pending();
        let signaller = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal();
        });
        fence.complete();
        assert!(fence.is_complete());
        handle.join().unwrap();
    }

    #[test]
    fn test_signal_is_idempotent() {
        let fence = Fence::pending();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        fence.on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fence.signal();
        fence.signal();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
