//! Dispatcher - run work on one dedicated thread
//!
//! Some OS resources may only be touched from the thread that created them.
//! The dispatcher owns such a thread and executes submitted closures on it,
//! one at a time and in submission order, handing the result (or the panic)
//! back to whichever thread asked.
//!
//! ```text
//! Caller Thread                 Worker Thread
//! ─────────────                 ─────────────
//! invoke(work)
//!   ├─ send job (depth 1) ──────→ receive job
//!   │                               ├─ install caller locale
//!   │                               ├─ run work (panics caught)
//!   └─ wait for completion ←─────── └─ complete, restore locale
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use futures::channel::oneshot;
use parking_lot::Mutex;
use thiserror::Error;

use super::locale::Locale;

/// Jobs that may wait in the queue besides the one running.
pub const QUEUE_DEPTH: usize = 1;

/// Dispatcher-specific errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatcher cannot be invoked from its own worker thread")]
    Reentrant,

    #[error("dispatcher has been disposed")]
    Disposed,

    #[error("failed to spawn dispatcher worker: {0}")]
    Spawn(#[source] std::io::Error),
}

type Completion<T> = oneshot::Receiver<thread::Result<T>>;

/// Receives a result whose waiter went away before it was delivered.
type Reclaim<T> = Arc<dyn Fn(T) + Send + Sync>;

/// One unit of submitted work.
struct Job {
    locale: Locale,
    work: Box<dyn FnOnce() + Send>,
}

impl Job {
    fn run(self) {
        let _locale = Locale::scope(self.locale);
        (self.work)();
    }
}

/// Executes closures on a single dedicated worker thread.
pub struct Dispatcher {
    sender: Mutex<Option<SyncSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Dispatcher {
    /// Create a dispatcher with a worker named `dispatcher`.
    pub fn new() -> Result<Self, DispatchError> {
        Self::with_name("dispatcher")
    }

    pub fn with_name(name: impl Into<String>) -> Result<Self, DispatchError> {
        let (sender, receiver) = sync_channel(QUEUE_DEPTH);
        let worker = spawn_worker(name.into(), receiver)?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Thread every job runs on.
    pub fn worker_id(&self) -> ThreadId {
        self.worker_id
    }

    /// Run `work` on the worker and block until it finished.
    ///
    /// A panic inside `work` is resumed on the calling thread with its
    /// original payload.
    pub fn invoke<T, F>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let completion = self.submit(work, None)?;
        settle(futures::executor::block_on(completion))
    }

    /// Run `work` on the worker, suspending instead of blocking while it runs.
    ///
    /// Queueing happens on the first poll and uses the same blocking send as
    /// [`invoke`](Self::invoke): while another job is already waiting in the
    /// queue, the polling thread is parked until the worker takes that job.
    /// Dropping the returned future does not cancel `work`.
    pub async fn invoke_async<T, F>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let completion = self.submit(work, None)?;
        settle(completion.await)
    }

    /// Like [`invoke_async`](Self::invoke_async), but a result nobody is
    /// waiting for anymore is passed to `reclaim` instead of being dropped.
    ///
    /// `reclaim` runs exactly once for an abandoned result: on the worker if
    /// the future was dropped before `work` finished, otherwise on the thread
    /// dropping the future. Panics of `work` are never reclaimed.
    pub async fn invoke_async_reclaiming<T, F, R>(
        &self,
        work: F,
        reclaim: R,
    ) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
        R: Fn(T) + Send + Sync + 'static,
    {
        let reclaim: Reclaim<T> = Arc::new(reclaim);
        let completion = self.submit(work, Some(Arc::clone(&reclaim)))?;
        let mut pending = Pending {
            completion: Some(completion),
            reclaim,
        };
        pending.wait().await
    }

    fn submit<T, F>(
        &self,
        work: F,
        reclaim: Option<Reclaim<T>>,
    ) -> Result<Completion<T>, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if thread::current().id() == self.worker_id {
            return Err(DispatchError::Reentrant);
        }
        let sender = self
            .sender
            .lock()
            .as_ref()
            .cloned()
            .ok_or(DispatchError::Disposed)?;

        let (done, completion) = oneshot::channel();
        let job = Job {
            locale: Locale::current(),
            work: Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(work));
                if let Err(Ok(value)) = done.send(outcome) {
                    if let Some(reclaim) = reclaim {
                        log::trace!("Reclaiming result of an abandoned job");
                        reclaim(value);
                    }
                }
            }),
        };

        sender.send(job).map_err(|_| DispatchError::Disposed)?;
        Ok(completion)
    }

    /// Stop accepting jobs, let queued ones finish and join the worker.
    ///
    /// Idempotent. Called from the worker itself it only stops accepting jobs.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_some() {
            log::debug!("Dispatcher shutting down");
        }
        drop(sender);

        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if let Err(e) = worker.join() {
                log::error!("Dispatcher worker panicked: {:?}", e);
            } else {
                log::debug!("Dispatcher worker joined");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Completion of a reclaiming job, handing the result over on drop.
struct Pending<T> {
    completion: Option<Completion<T>>,
    reclaim: Reclaim<T>,
}

impl<T> Pending<T> {
    async fn wait(&mut self) -> Result<T, DispatchError> {
        let outcome = match self.completion.as_mut() {
            Some(completion) => completion.await,
            None => return Err(DispatchError::Disposed),
        };
        self.completion = None;
        settle(outcome)
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        let Some(mut completion) = self.completion.take() else {
            return;
        };
        // After close() the worker's send fails, so at most one side sees the value
        completion.close();
        if let Ok(Some(Ok(value))) = completion.try_recv() {
            (self.reclaim)(value);
        }
    }
}

fn settle<T>(
    outcome: Result<thread::Result<T>, oneshot::Canceled>,
) -> Result<T, DispatchError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(payload)) => panic::resume_unwind(payload),
        // Job dropped without running
        Err(oneshot::Canceled) => Err(DispatchError::Disposed),
    }
}

fn spawn_worker(name: String, receiver: Receiver<Job>) -> Result<JoinHandle<()>, DispatchError> {
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            log::trace!("Dispatcher worker started");
            while let Ok(job) = receiver.recv() {
                job.run();
            }
            log::trace!("Dispatcher worker stopped");
        })
        .map_err(DispatchError::Spawn)
}
