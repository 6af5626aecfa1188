//! Single-threaded FIFO task service.
//!
//! ```text
//!   caller threads                     worker thread
//!   ──────────────                     ─────────────
//!   add_task(t) ──► ┌───────────────┐
//!   add_task(t) ──► │ VecDeque<Task>│ ──► pop_front ──► execute ──► notify
//!                   └───────┬───────┘         ▲
//!                           │ Condvar         │
//!                           └─────────────────┘  (parked while empty)
//! ```
//!
//! Tasks run strictly in submission order, one at a time. The thread parks on
//! a condition variable while the queue is empty. Stopping sets a finishing
//! flag, wakes the thread, waits for the running task to complete and drops
//! whatever is still queued.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::task::Task;

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Box<dyn Task>>,
    finishing: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    wakeup: Condvar,
}

/// Background thread draining a FIFO queue of [`Task`]s.
///
/// The worker is stopped when dropped.
pub struct AsyncWorker {
    thread_name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncWorker {
    /// Creates a stopped worker whose thread will carry `thread_name`.
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            shared: Arc::new(Shared::default()),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the worker thread. Does nothing if it is already running.
    pub fn run_service(&self) -> io::Result<()> {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        self.shared.state.lock().finishing = false;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || run_loop(&shared))?;
        *handle = Some(spawned);

        info!(thread = %self.thread_name, "Worker started");
        Ok(())
    }

    /// Stops the worker thread.
    ///
    /// The task currently executing runs to completion. Queued tasks are
    /// dropped without being notified.
    pub fn stop_service(&self) {
        let handle = self.handle.lock().take();

        let discarded = {
            let mut state = self.shared.state.lock();
            state.finishing = true;
            self.shared.wakeup.notify_all();
            std::mem::take(&mut state.tasks)
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(thread = %self.thread_name, "Worker thread panicked");
            }
            info!(
                thread = %self.thread_name,
                discarded = discarded.len(),
                "Worker stopped"
            );
        }
        drop(discarded);
    }

    /// Queues a task. Safe to call from any thread.
    pub fn add_task(&self, task: Box<dyn Task>) {
        let mut state = self.shared.state.lock();
        debug!(task = task.name(), queued = state.tasks.len() + 1, "Task queued");
        state.tasks.push_back(task);
        self.shared.wakeup.notify_one();
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

impl Drop for AsyncWorker {
    fn drop(&mut self) {
        self.stop_service();
    }
}

impl std::fmt::Debug for AsyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWorker")
            .field("thread_name", &self.thread_name)
            .field("pending", &self.pending())
            .finish()
    }
}

fn run_loop(shared: &Shared) {
    loop {
        let mut task = {
            let mut state = shared.state.lock();
            while state.tasks.is_empty() && !state.finishing {
                shared.wakeup.wait(&mut state);
            }
            if state.finishing {
                return;
            }
            match state.tasks.pop_front() {
                Some(task) => task,
                None => continue,
            }
        };

        let name = task.name().to_string();
        let success = match panic::catch_unwind(AssertUnwindSafe(|| task.execute())) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(task = %name, error = %e, "Task failed");
                false
            }
            Err(payload) => {
                error!(task = %name, panic = %panic_message(&*payload), "Task panicked");
                false
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || task.notify(success))) {
            error!(task = %name, panic = %panic_message(&*payload), "Task notification panicked");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
