//! Job System
//!
//! Completion fences plus a worker pool that launches each job once its
//! dependencies have completed.
//!
//! # Scheduling Without Blocking
//!
//! A job is never handed to a worker before its dependency fence fires.
//! Instead the launch is registered as a continuation on that fence, so no
//! worker ever sits blocked waiting on another job. Only the host thread
//! blocks, in [`Fence::wait`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use smallvec::SmallVec;
use tracing::error;

use crate::error::ConfigError;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct FenceInner {
    complete: bool,
    continuations: Vec<Continuation>,
}

#[derive(Default)]
struct FenceState {
    inner: Mutex<FenceInner>,
    signalled: Condvar,
}

/// Completion handle for scheduled work.
///
/// Cloning a fence yields another handle to the same completion.
#[derive(Clone)]
pub struct Fence {
    state: Arc<FenceState>,
}

impl Fence {
    /// A fence that has already completed.
    pub fn completed() -> Self {
        let fence = Self::pending();
        fence.state.inner.lock().complete = true;
        fence
    }

    pub(crate) fn pending() -> Self {
        Self {
            state: Arc::new(FenceState::default()),
        }
    }

    /// True once the guarded work has finished.
    pub fn is_complete(&self) -> bool {
        self.state.inner.lock().complete
    }

    /// Block the calling thread until the guarded work has finished.
    pub fn wait(&self) {
        let mut inner = self.state.inner.lock();
        while !inner.complete {
            self.state.signalled.wait(&mut inner);
        }
    }

    /// Mark complete and run every registered continuation.
    pub(crate) fn signal(&self) {
        let continuations = {
            let mut inner = self.state.inner.lock();
            if inner.complete {
                return;
            }
            inner.complete = true;
            std::mem::take(&mut inner.continuations)
        };
        self.state.signalled.notify_all();
        for continuation in continuations {
            continuation();
        }
    }

    /// Run `f` once complete: immediately if already complete.
    pub(crate) fn on_complete(&self, f: impl FnOnce() + Send + 'static) {
        {
            let mut inner = self.state.inner.lock();
            if !inner.complete {
                inner.continuations.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// A fence that completes when every fence in `fences` has.
    pub fn combine(fences: impl IntoIterator<Item = Fence>) -> Fence {
        let pending: SmallVec<[Fence; 4]> = fences
            .into_iter()
            .filter(|f| !f.is_complete())
            .collect();
        match pending.len() {
            0 => Fence::completed(),
            1 => pending.into_iter().next().unwrap_or_else(Fence::completed),
            count => {
                let combined = Fence::pending();
                let remaining = Arc::new(AtomicUsize::new(count));
                for fence in pending {
                    let combined = combined.clone();
                    let remaining = Arc::clone(&remaining);
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

    /// True if both handles refer to the same completion.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Worker pool running dependency-ordered jobs.
pub struct JobSystem {
    pool: Arc<ThreadPool>,
    panicked: Arc<AtomicUsize>,
}

impl JobSystem {
    /// Start a pool with `threads` workers.
    pub fn new(threads: usize) -> Result<Self, ConfigError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("trellis-worker-{index}"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
            panicked: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of workers.
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Number of jobs that panicked since the pool started.
    pub fn panicked_jobs(&self) -> usize {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Schedule `job` to run after `dependencies` completes.
    ///
    /// The returned fence completes after the job returns, even if it panics.
    pub fn schedule(&self, dependencies: &Fence, job: impl FnOnce() + Send + 'static) -> Fence {
        let fence = Fence::pending();
        let done = fence.clone();
        let pool = Arc::clone(&self.pool);
        let panicked = Arc::clone(&self.panicked);

        dependencies.on_complete(move || {
            pool.spawn(move || {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    panicked.fetch_add(1, Ordering::Relaxed);
                    error!("job panicked; its fence is signalled regardless");
                }
                done.signal();
            });
        });
        fence
    }
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("threads", &self.thread_count())
            .finish()
    }
}
