//! Task scheduling abstraction
//!
//! The GC sweep runs on an externally supplied scheduler so the cache never
//! owns threading policy. Production uses [`ThreadScheduler`]; tests drive
//! ticks by hand through [`ManualScheduler`].

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Cancellation handle for a scheduled task.
pub trait ScheduledHandle: Send {
    /// Stops future runs. Idempotent. A run already in progress completes.
    fn cancel(&self);
}

/// Schedules a task to run repeatedly.
pub trait TaskScheduler: Send + Sync {
    /// Runs `task` after `initial_delay` and then every `period` until the
    /// returned handle is cancelled.
    fn schedule_repeating(
        &self,
        task: Box<dyn FnMut() + Send>,
        initial_delay: Duration,
        period: Duration,
    ) -> Box<dyn ScheduledHandle>;
}

/// Scheduler backed by one dedicated thread per task.
#[derive(Debug, Default)]
pub struct ThreadScheduler;

struct CancelFlag {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

struct ThreadHandle {
    flag: Arc<CancelFlag>,
}

impl ScheduledHandle for ThreadHandle {
    fn cancel(&self) {
        let mut cancelled = self.flag.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        self.flag.signal.notify_all();
    }
}

impl TaskScheduler for ThreadScheduler {
    fn schedule_repeating(
        &self,
        mut task: Box<dyn FnMut() + Send>,
        initial_delay: Duration,
        period: Duration,
    ) -> Box<dyn ScheduledHandle> {
        let flag = Arc::new(CancelFlag {
            cancelled: Mutex::new(false),
            signal: Condvar::new(),
        });
        let thread_flag = Arc::clone(&flag);

        thread::spawn(move || {
            let mut wait = initial_delay;
            loop {
                let guard = thread_flag
                    .cancelled
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                let (guard, _) = thread_flag
                    .signal
                    .wait_timeout_while(guard, wait, |cancelled| !*cancelled)
                    .unwrap_or_else(|e| e.into_inner());
                if *guard {
                    return;
                }
                drop(guard);

                task();
                wait = period;
            }
        });

        Box::new(ThreadHandle { flag })
    }
}

/// Scheduler that never fires on its own; tests call [`ManualScheduler::tick`]
/// to run every scheduled task once.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Arc<Mutex<Vec<ManualTask>>>,
}

struct ManualTask {
    task: Box<dyn FnMut() + Send>,
    cancelled: Arc<Mutex<bool>>,
}

struct ManualHandle {
    cancelled: Arc<Mutex<bool>>,
}

impl ScheduledHandle for ManualHandle {
    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

impl ManualScheduler {
    /// Creates an empty manual scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every non-cancelled task once.
    pub fn tick(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain_mut(|entry| {
            if *entry.cancelled.lock().unwrap_or_else(|e| e.into_inner()) {
                return false;
            }
            (entry.task)();
            true
        });
    }

    /// Number of live scheduled tasks.
    pub fn task_count(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .iter()
            .filter(|t| !*t.cancelled.lock().unwrap_or_else(|e| e.into_inner()))
            .count()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        task: Box<dyn FnMut() + Send>,
        _initial_delay: Duration,
        _period: Duration,
    ) -> Box<dyn ScheduledHandle> {
        let cancelled = Arc::new(Mutex::new(false));
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ManualTask {
                task,
                cancelled: Arc::clone(&cancelled),
            });
        Box::new(ManualHandle { cancelled })
    }
}
