//! Work-stealing task pool.
//!
//! Tasks are spawned into a [`WorkScope`] and may spawn further tasks into
//! the same scope. [`TaskPool::run_to_quiescence`] returns once every task,
//! including everything spawned transitively, has finished, and reports the
//! first fault any of them raised.

use crate::error::EvalError;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct FailureSlot {
    failed: AtomicBool,
    first: Mutex<Option<EvalError>>,
}

impl FailureSlot {
    fn record(&self, err: EvalError) {
        let mut first = self.first.lock();
        if first.is_none() {
            log::warn!("task failed: {err}");
            *first = Some(err);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn take(&self) -> Result<(), EvalError> {
        self.first.lock().take().map_or(Ok(()), Err)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// A fixed set of worker threads
#[derive(Debug)]
pub struct TaskPool {
    pool: rayon::ThreadPool,
}

impl TaskPool {
    /// Starts `threads` workers; 0 means one per available CPU.
    ///
    /// # Errors
    ///
    /// Fails if the threads cannot be spawned.
    pub fn new(threads: usize) -> Result<Self, EvalError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fixlog-worker-{i}"))
            .build()
            .map_err(|e| EvalError::Scheduler(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Number of worker threads
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op`, which seeds tasks into the scope, and blocks until the
    /// scope is empty.
    ///
    /// # Errors
    ///
    /// The first fault raised by any task. Tasks already spawned still run
    /// to completion after a fault.
    pub fn run_to_quiescence<'scope, OP>(&self, op: OP) -> Result<(), EvalError>
    where
        OP: for<'a> FnOnce(&WorkScope<'a, 'scope>) + Send,
    {
        let failure = Arc::new(FailureSlot::default());
        self.pool.scope(|scope: &rayon::Scope<'scope>| {
            op(&WorkScope {
                scope,
                failure: &failure,
            });
        });
        failure.take()
    }
}

/// Handle for spawning tasks into the group a [`TaskPool`] waits on
#[derive(Debug)]
pub struct WorkScope<'a, 'scope> {
    scope: &'a rayon::Scope<'scope>,
    failure: &'a Arc<FailureSlot>,
}

impl<'scope> WorkScope<'_, 'scope> {
    /// Queues `task`. A returned error or a panic is recorded as the group's
    /// failure if none was recorded before.
    pub fn spawn<F>(&self, task: F)
    where
        F: for<'b> FnOnce(&WorkScope<'b, 'scope>) -> Result<(), EvalError> + Send + 'scope,
    {
        let failure = Arc::clone(self.failure);
        self.scope.spawn(move |scope| {
            let ws = WorkScope {
                scope,
                failure: &failure,
            };
            match panic::catch_unwind(AssertUnwindSafe(|| task(&ws))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failure.record(err),
                Err(payload) => {
                    failure.record(EvalError::TaskPanicked(panic_message(&*payload)));
                }
            }
        });
    }

    /// Whether some task of the group has already failed
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failure.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fan_out<'scope>(ws: &WorkScope<'_, 'scope>, depth: usize, counter: &'scope AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
        if depth > 0 {
            for _ in 0..2 {
                ws.spawn(move |ws| {
                    fan_out(ws, depth - 1, counter);
                    Ok(())
                });
            }
        }
    }

    #[test]
    fn test_waits_for_transitively_spawned_tasks() {
        let pool = TaskPool::new(4).unwrap();
        let counter = AtomicUsize::new(0);
        pool.run_to_quiescence(|ws| fan_out(ws, 6, &counter)).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 127);
    }

    #[test]
    fn test_first_failure_is_reported_and_siblings_drain() {
        let pool = TaskPool::new(2).unwrap();
        let finished = AtomicUsize::new(0);
        let result = pool.run_to_quiescence(|ws| {
            ws.spawn(|_| Err(EvalError::Solver("boom".to_string())));
            for _ in 0..10 {
                ws.spawn(|_| {
                    finished.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                });
            }
        });
        assert_eq!(result, Err(EvalError::Solver("boom".to_string())));
        assert_eq!(finished.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_panic_becomes_fault() {
        let pool = TaskPool::new(1).unwrap();
        let result = pool.run_to_quiescence(|ws| {
            ws.spawn(|_| panic!("worker exploded"));
        });
        assert_eq!(
            result,
            Err(EvalError::TaskPanicked("worker exploded".to_string()))
        );
    }

    #[test]
    fn test_pool_is_reusable_after_failure() {
        let pool = TaskPool::new(2).unwrap();
        assert!(pool
            .run_to_quiescence(|ws| ws.spawn(|_| Err(EvalError::Solver("x".into()))))
            .is_err());
        assert!(pool.run_to_quiescence(|ws| ws.spawn(|_| Ok(()))).is_ok());
        assert_eq!(pool.threads(), 2);
    }
}
