//! Debugger - thread-affine debug session
//!
//! The OS only accepts wait/continue/detach calls for a target from the thread
//! that attached to it. `DebugSession` funnels every such call through its own
//! [`Dispatcher`], so callers may use it from any thread or task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{DispatchError, Dispatcher};
use crate::debug::types::{
    ContinueStatus, DebugEvent, NativeError, OwnedHandle, ProcessInformation, UnknownEventKind,
};
use crate::debug::DebugApi;

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("unimplemented debug event kind {0}")]
    UnimplementedEvent(u32),

    #[error("operation cancelled")]
    Cancelled,

    #[error("output string reported before the target process handle was known")]
    MissingProcessHandle,
}

impl From<UnknownEventKind> for DebugError {
    fn from(e: UnknownEventKind) -> Self {
        DebugError::UnimplementedEvent(e.0)
    }
}

impl DebugError {
    /// Native error code, if this is an OS call failure.
    pub fn native_code(&self) -> Option<u32> {
        match self {
            DebugError::Native(e) => Some(e.code),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DebugError::Cancelled)
    }

    fn is_wait_timeout(&self) -> bool {
        matches!(self, DebugError::Native(e) if e.is_timeout())
    }
}

/// Session tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound of one native wait when waiting cancellably. Also the worst-case
    /// cancellation latency.
    pub poll_interval: Duration,
}

impl SessionOptions {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Main debug session interface
pub struct DebugSession<A: DebugApi> {
    api: Arc<A>,
    dispatcher: Dispatcher,
    options: SessionOptions,
    /// Event retrieved for an async waiter that went away before taking it.
    /// The next wait returns it instead of asking the OS.
    undelivered: Arc<Mutex<Option<DebugEvent>>>,
}

impl<A: DebugApi> DebugSession<A> {
    /// Create a session and its dedicated worker thread
    pub fn new(api: A, options: SessionOptions) -> Result<Self, DebugError> {
        Ok(Self {
            api: Arc::new(api),
            dispatcher: Dispatcher::with_name("debug-session")?,
            options,
            undelivered: Arc::new(Mutex::new(None)),
        })
    }

    /// The OS collaborator, for calls without thread affinity (memory reads)
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Run `call` against the API on the session thread.
    fn call<T, F>(&self, call: F) -> Result<T, DebugError>
    where
        F: FnOnce(&A) -> Result<T, DebugError> + Send + 'static,
        T: Send + 'static,
    {
        let api = Arc::clone(&self.api);
        self.dispatcher.invoke(move || call(&api))?
    }

    async fn call_async<T, F>(&self, call: F) -> Result<T, DebugError>
    where
        F: FnOnce(&A) -> Result<T, DebugError> + Send + 'static,
        T: Send + 'static,
    {
        let api = Arc::clone(&self.api);
        self.dispatcher.invoke_async(move || call(&api)).await?
    }

    /// Attach to an existing process by PID. The target survives detaching.
    pub fn attach(&self, pid: u32) -> Result<(), DebugError> {
        log::info!("Attaching to process {}", pid);

        self.call(move |api| {
            api.attach(pid)?;
            if let Err(e) = api.set_kill_on_exit(false) {
                // Leaving the thread attached would kill the target with it
                detach_quietly(api, pid);
                return Err(e.into());
            }
            Ok(())
        })?;

        log::info!("Successfully attached to process {}", pid);
        Ok(())
    }

    /// Start a process under debug control of this session. The target
    /// survives detaching.
    pub fn launch(
        &self,
        application: Option<String>,
        command_line: Option<String>,
    ) -> Result<ProcessInformation, DebugError> {
        log::info!(
            "Launching {:?} with command line {:?}",
            application,
            command_line
        );

        let info = self.call(move |api| {
            let info = api.create_process(application.as_deref(), command_line.as_deref())?;
            if let Err(e) = api.set_kill_on_exit(false) {
                detach_quietly(api, info.process_id);
                close_owned(api, info.process);
                close_owned(api, info.thread);
                return Err(e.into());
            }
            Ok(info)
        })?;

        log::info!("Launched process {}", info.process_id);
        Ok(info)
    }

    /// Wait up to `timeout` for the next event; `None` waits forever.
    pub fn wait_for_event(&self, timeout: Option<Duration>) -> Result<DebugEvent, DebugError> {
        let undelivered = Arc::clone(&self.undelivered);
        self.call(move |api| next_event(api, &undelivered, timeout))
    }

    /// Async [`wait_for_event`](Self::wait_for_event). Cancel-safe: an event
    /// retrieved after the future was dropped is kept for the next wait.
    pub async fn wait_for_event_async(
        &self,
        timeout: Option<Duration>,
    ) -> Result<DebugEvent, DebugError> {
        let api = Arc::clone(&self.api);
        let undelivered = Arc::clone(&self.undelivered);
        let keep = Arc::clone(&self.undelivered);
        self.dispatcher
            .invoke_async_reclaiming(
                move || next_event(&*api, &undelivered, timeout),
                move |result: Result<DebugEvent, DebugError>| {
                    if let Ok(event) = result {
                        log::debug!(
                            "Keeping event {:?} of an abandoned wait",
                            event.kind()
                        );
                        *keep.lock() = Some(event);
                    }
                },
            )
            .await?
    }

    /// Wait for the next event until `token` is cancelled.
    ///
    /// The native wait cannot be interrupted, so it is repeated with the poll
    /// interval as timeout and the token checked in between. An event that
    /// arrives is always returned, never dropped for cancellation.
    pub fn wait_for_event_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<DebugEvent, DebugError> {
        loop {
            if token.is_cancelled() {
                return Err(DebugError::Cancelled);
            }
            match self.wait_for_event(Some(self.options.poll_interval)) {
                Err(e) if e.is_wait_timeout() => continue,
                other => return other,
            }
        }
    }

    pub async fn wait_for_event_cancellable_async(
        &self,
        token: &CancellationToken,
    ) -> Result<DebugEvent, DebugError> {
        loop {
            if token.is_cancelled() {
                return Err(DebugError::Cancelled);
            }
            match self
                .wait_for_event_async(Some(self.options.poll_interval))
                .await
            {
                Err(e) if e.is_wait_timeout() => continue,
                other => return other,
            }
        }
    }

    /// Acknowledge `event`, releasing its transient handles first.
    ///
    /// Consumes the event: nothing it references is valid afterwards.
    pub fn continue_event(&self, event: DebugEvent, status: ContinueStatus) -> Result<(), DebugError> {
        self.call(move |api| acknowledge(api, event, status))
    }

    pub async fn continue_event_async(
        &self,
        event: DebugEvent,
        status: ContinueStatus,
    ) -> Result<(), DebugError> {
        self.call_async(move |api| acknowledge(api, event, status))
            .await
    }

    /// Stop debugging `pid` without terminating it. An event kept from an
    /// abandoned wait is acknowledged first.
    pub fn detach(&self, pid: u32) -> Result<(), DebugError> {
        log::info!("Detaching from process {}", pid);
        let undelivered = Arc::clone(&self.undelivered);
        self.call(move |api| {
            if let Some(event) = undelivered.lock().take() {
                let status = event.default_verdict();
                if let Err(e) = acknowledge(api, event, status) {
                    log::warn!("Failed to acknowledge kept event: {}", e);
                }
            }
            Ok(api.detach(pid)?)
        })?;
        log::info!("Successfully detached from process {}", pid);
        Ok(())
    }

    pub fn close_handle(&self, handle: OwnedHandle) -> Result<(), DebugError> {
        let raw = handle.into_raw();
        self.call(move |api| Ok(api.close_handle(raw)?))
    }

    /// Stop the session thread. Further calls fail with `Disposed`.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

/// Kept event if there is one, else the next one from the OS.
fn next_event<A: DebugApi>(
    api: &A,
    undelivered: &Mutex<Option<DebugEvent>>,
    timeout: Option<Duration>,
) -> Result<DebugEvent, DebugError> {
    if let Some(event) = undelivered.lock().take() {
        return Ok(event);
    }
    api.wait_for_event(timeout)
}

fn detach_quietly<A: DebugApi>(api: &A, pid: u32) {
    if let Err(e) = api.detach(pid) {
        log::warn!("Failed to detach from process {}: {}", pid, e);
    }
}

fn close_owned<A: DebugApi>(api: &A, handle: OwnedHandle) {
    let raw = handle.into_raw();
    if let Err(e) = api.close_handle(raw) {
        log::warn!("Failed to close handle {}: {}", raw, e);
    }
}

fn acknowledge<A: DebugApi>(
    api: &A,
    event: DebugEvent,
    status: ContinueStatus,
) -> Result<(), DebugError> {
    let (pid, tid) = (event.process_id, event.thread_id);
    for handle in event.into_transient_handles() {
        log::trace!("Closing transient handle {}", handle.raw());
        close_owned(api, handle);
    }
    api.continue_event(pid, tid, status)?;
    Ok(())
}
