//! Object-level threading support.
//!
//! This module provides the active-object primitive the node's workers are
//! built from: a [`Worker`] owns one background OS thread that runs a
//! [`Task`] as a loop. The task gets a one-shot `initialise` hook that
//! gates whether the loop runs at all, and an `execute` hook called once
//! per iteration until the owner requests a stop or the task signals
//! failure.
//!
//! The thread side can pace itself with [`WorkerContext::sleep`] and
//! [`WorkerContext::sleep_to`] (absolute monotonic deadlines), or park in
//! [`WorkerContext::wait`] until some other thread calls `signal`. Wakes
//! are not queued: a signal with nobody waiting is lost, and a later
//! `wait` still blocks.

use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::clock::{self, TimePoint};

/// A unit of background work driven by a [`Worker`].
///
/// Both hooks report outcome as a plain bool. `initialise` returning false
/// means the loop never starts; `execute` returning false is the designed
/// way for a task to terminate itself (a lost capture device, a dead
/// sink). No error value crosses the thread boundary, so implementations
/// log their reason before returning false.
pub trait Task: Send {
    /// One-shot setup, run on the worker thread before the loop.
    fn initialise(&mut self, _ctx: &WorkerContext) -> bool {
        true
    }

    /// One loop iteration. Return false to end the loop.
    fn execute(&mut self, _ctx: &WorkerContext) -> bool {
        true
    }
}

#[derive(Default)]
struct State {
    running: bool,
    stop_requested: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }
}

/// Thread-side handle passed to the task hooks.
///
/// Wraps the worker's mutex/condition pair and the timestamp recorded at
/// the top of the current loop iteration, which is what `sleep_to`
/// measures against.
pub struct WorkerContext {
    shared: Arc<Shared>,
    iteration_start: Cell<TimePoint>,
}

impl WorkerContext {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            iteration_start: Cell::new(clock::now()),
        }
    }

    /// True once the owner has requested a stop. Tasks with long
    /// iterations check this to exit early between steps.
    pub fn is_abort(&self) -> bool {
        self.shared.state.lock().unwrap().stop_requested
    }

    /// When the current loop iteration started.
    pub fn iteration_start(&self) -> TimePoint {
        self.iteration_start.get()
    }

    /// Block for at least `ms` milliseconds against a deadline computed
    /// from now. A signal or a spurious wake before the deadline ends the
    /// sleep early; the caller's loop tolerates that.
    pub fn sleep(&self, ms: u64) {
        self.sleep_until(clock::now().add_millis(ms as i64));
    }

    /// Block until `ms` milliseconds have elapsed since the start of the
    /// current loop iteration, i.e. the iteration interval minus however
    /// long `execute` has already taken. Returns immediately when the
    /// deadline has already passed.
    pub fn sleep_to(&self, ms: u64) {
        self.sleep_until(self.iteration_start.get().add_millis(ms as i64));
    }

    /// Park until another thread calls `signal`. Spurious wakes are
    /// possible, matching the underlying condition variable.
    pub fn wait(&self) {
        let guard = self.shared.state.lock().unwrap();
        let _guard = self.shared.cond.wait(guard).unwrap();
    }

    /// Wake at most one thread parked in `wait` (or cut short a pending
    /// timed sleep). A no-op when nobody is waiting; the wake is not
    /// remembered.
    pub fn signal(&self) {
        self.shared.cond.notify_one();
    }

    fn sleep_until(&self, deadline: TimePoint) {
        let remaining = deadline.saturating_duration_since(clock::now());
        if remaining.is_zero() {
            return;
        }
        let guard = self.shared.state.lock().unwrap();
        // Single timed wait on the absolute remainder; no re-wait loop, so
        // a signal can release the sleeper before the deadline.
        let _result = self.shared.cond.wait_timeout(guard, remaining).unwrap();
    }
}

/// An active object: one task bound to one background thread.
///
/// The task value round-trips through the thread. `start` moves it in,
/// the thread hands it back when the loop exits, and `wait_for_exit`
/// stores it again so a later `start` can reuse the same task state.
/// Dropping a `Worker` performs a blocking stop, so the thread never
/// outlives its owner.
pub struct Worker {
    name: String,
    shared: Arc<Shared>,
    task: Option<Box<dyn Task>>,
    join: Option<JoinHandle<Box<dyn Task>>>,
}

impl Worker {
    pub fn new(name: impl Into<String>, task: impl Task + 'static) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::new()),
            task: Some(Box::new(task)),
            join: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker thread. Returns immediately without waiting for
    /// `initialise` to complete. Fails if the platform could not create
    /// the thread, or if a live thread already exists for this worker.
    pub fn start(&mut self) -> Result<()> {
        self.reap_finished();
        if self.join.is_some() {
            return Err(anyhow!("worker '{}' already has a live thread", self.name));
        }
        let task = self
            .task
            .take()
            .ok_or_else(|| anyhow!("worker '{}' task was lost to a panic", self.name))?;

        let shared = self.shared.clone();
        let name = self.name.clone();
        let join = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(shared, task, name))?;
        self.join = Some(join);
        Ok(())
    }

    /// Request a stop. A no-op when the loop is not running. Otherwise
    /// raises the stop flag and signals the condition so a thread parked
    /// in `wait` is released rather than deadlocking on shutdown. With
    /// `wait` set, blocks until the thread has terminated.
    pub fn stop(&mut self, wait: bool) {
        let running = {
            let mut state = self.shared.state.lock().unwrap();
            if state.running {
                state.stop_requested = true;
            }
            state.running
        };
        if !running {
            return;
        }
        self.shared.cond.notify_one();
        if wait {
            self.wait_for_exit();
        }
    }

    /// Block until the worker thread has terminated and reclaim the task.
    /// A no-op when no thread exists. The task itself can never call this
    /// (it has no access to the owning `Worker`), so self-join cannot
    /// happen.
    pub fn wait_for_exit(&mut self) {
        if let Some(join) = self.join.take() {
            match join.join() {
                Ok(task) => self.task = Some(task),
                Err(_) => log::error!("worker '{}' thread panicked", self.name),
            }
        }
    }

    /// Whether the loop is currently executing.
    pub fn is_alive(&self) -> bool {
        self.shared.state.lock().unwrap().running
    }

    /// Whether a stop has been requested. After `is_alive` turns false,
    /// a false reading here means the task ended itself by returning
    /// false from `execute`.
    pub fn is_abort(&self) -> bool {
        self.shared.state.lock().unwrap().stop_requested
    }

    /// Wake the worker if it is parked in `wait` (see
    /// [`WorkerContext::signal`]).
    pub fn signal(&self) {
        self.shared.cond.notify_one();
    }

    fn reap_finished(&mut self) {
        if self.join.as_ref().is_some_and(|join| join.is_finished()) {
            self.wait_for_exit();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // A stop request that lands while initialise is still running is
        // cleared when the loop starts, so keep requesting until the
        // thread actually ends.
        while self.join.as_ref().is_some_and(|join| !join.is_finished()) {
            self.stop(false);
            std::thread::sleep(Duration::from_millis(1));
        }
        self.wait_for_exit();
    }
}

/// Clears the running flag when the loop scope unwinds, so a panicking
/// task cannot leave the worker looking alive forever.
struct RunningGuard {
    shared: Arc<Shared>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().running = false;
    }
}

fn run(shared: Arc<Shared>, mut task: Box<dyn Task>, name: String) -> Box<dyn Task> {
    let ctx = WorkerContext::new(shared.clone());

    if !task.initialise(&ctx) {
        log::warn!("worker '{}': initialise failed, loop not entered", name);
        return task;
    }

    {
        let mut state = shared.state.lock().unwrap();
        state.running = true;
        state.stop_requested = false;
    }
    let _running = RunningGuard {
        shared: shared.clone(),
    };
    log::debug!("worker '{}': entering loop", name);

    loop {
        ctx.iteration_start.set(clock::now());
        if !task.execute(&ctx) {
            log::debug!("worker '{}': task ended the loop", name);
            break;
        }
        if shared.state.lock().unwrap().stop_requested {
            break;
        }
    }

    log::debug!("worker '{}': loop exited", name);
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct Counting {
        executed: Arc<AtomicU64>,
        pace_ms: u64,
    }

    impl Task for Counting {
        fn execute(&mut self, ctx: &WorkerContext) -> bool {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self.pace_ms > 0 {
                ctx.sleep(self.pace_ms);
            }
            true
        }
    }

    struct RefusesInit {
        executed: Arc<AtomicU64>,
    }

    impl Task for RefusesInit {
        fn initialise(&mut self, _ctx: &WorkerContext) -> bool {
            false
        }

        fn execute(&mut self, _ctx: &WorkerContext) -> bool {
            self.executed.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct RunsOnce {
        executed: Arc<AtomicU64>,
    }

    impl Task for RunsOnce {
        fn execute(&mut self, _ctx: &WorkerContext) -> bool {
            self.executed.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn wait_until(deadline_ms: u64, mut probe: impl FnMut() -> bool) -> bool {
        let deadline = clock::now().add_millis(deadline_ms as i64);
        while clock::now() < deadline {
            if probe() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        probe()
    }

    #[test]
    fn stop_on_never_started_worker_is_a_noop() {
        let executed = Arc::new(AtomicU64::new(0));
        let mut worker = Worker::new(
            "idle",
            Counting {
                executed: executed.clone(),
                pace_ms: 0,
            },
        );

        worker.stop(true);
        worker.stop(false);

        assert!(!worker.is_alive());
        assert!(!worker.is_abort());
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_with_wait_halts_execution() {
        let executed = Arc::new(AtomicU64::new(0));
        let mut worker = Worker::new(
            "counter",
            Counting {
                executed: executed.clone(),
                pace_ms: 1,
            },
        );

        worker.start().unwrap();
        assert!(wait_until(1_000, || executed.load(Ordering::SeqCst) >= 3));

        worker.stop(true);
        assert!(!worker.is_alive());

        let settled = executed.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(executed.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn failed_initialise_gates_the_loop() {
        let executed = Arc::new(AtomicU64::new(0));
        let mut worker = Worker::new(
            "refuser",
            RefusesInit {
                executed: executed.clone(),
            },
        );

        worker.start().unwrap();
        worker.wait_for_exit();

        assert!(!worker.is_alive());
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn execute_failure_terminates_without_abort() {
        let executed = Arc::new(AtomicU64::new(0));
        let mut worker = Worker::new(
            "one-shot",
            RunsOnce {
                executed: executed.clone(),
            },
        );

        worker.start().unwrap();
        worker.wait_for_exit();

        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert!(!worker.is_alive());
        // Self-termination is distinguishable from a requested stop.
        assert!(!worker.is_abort());
    }

    #[test]
    fn start_is_reusable_after_a_full_stop() {
        let executed = Arc::new(AtomicU64::new(0));
        let mut worker = Worker::new(
            "restarted",
            Counting {
                executed: executed.clone(),
                pace_ms: 1,
            },
        );

        worker.start().unwrap();
        assert!(wait_until(1_000, || executed.load(Ordering::SeqCst) >= 1));
        worker.stop(true);
        let after_first_run = executed.load(Ordering::SeqCst);

        worker.start().unwrap();
        assert!(wait_until(1_000, || {
            executed.load(Ordering::SeqCst) > after_first_run
        }));
        worker.stop(true);
    }

    #[test]
    fn start_rejects_a_second_live_thread() {
        let executed = Arc::new(AtomicU64::new(0));
        let mut worker = Worker::new(
            "single",
            Counting {
                executed: executed.clone(),
                pace_ms: 1,
            },
        );

        worker.start().unwrap();
        assert!(wait_until(1_000, || worker.is_alive()));
        assert!(worker.start().is_err());
        worker.stop(true);
    }

    #[test]
    fn drop_performs_a_blocking_stop() {
        let executed = Arc::new(AtomicU64::new(0));
        {
            let mut worker = Worker::new(
                "scoped",
                Counting {
                    executed: executed.clone(),
                    pace_ms: 1,
                },
            );
            worker.start().unwrap();
            assert!(wait_until(1_000, || executed.load(Ordering::SeqCst) >= 1));
        }

        let settled = executed.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(executed.load(Ordering::SeqCst), settled);
    }
}
