//! Debug string stream - output strings of one target
//!
//! Pulls debug events from a [`DebugSession`], acknowledges everything it is
//! not interested in and yields the text of output-string events until the
//! target exits. Usable as a blocking [`Iterator`] or through
//! [`DebugStringStream::next_async`].

use tokio_util::sync::CancellationToken;

use super::debugger::{DebugError, DebugSession, SessionOptions};
use super::memory::RemoteReader;
use crate::debug::types::{
    ContinueStatus, DebugEvent, EventPayload, ImageName, OwnedHandle, RawHandle,
};
use crate::debug::DebugApi;

/// What one event means for the consumer.
enum Step {
    /// Nothing to report, keep waiting
    Skip,
    /// Text to yield
    Yield(String),
    /// Target exited
    End,
    Fail(DebugError),
}

/// Handles owned because the stream launched the target itself.
struct Launched {
    process: OwnedHandle,
    thread: OwnedHandle,
}

/// Cancellable sequence of the debug output strings of one process.
pub struct DebugStringStream<A: DebugApi> {
    session: DebugSession<A>,
    process_id: u32,
    /// Handle used for memory reads
    process: Option<RawHandle>,
    launched: Option<Launched>,
    cancellation: CancellationToken,
    finished: bool,
    closed: bool,
}

impl<A: DebugApi> DebugStringStream<A> {
    /// Attach to a running process.
    pub fn attach(api: A, pid: u32, options: SessionOptions) -> Result<Self, DebugError> {
        let session = DebugSession::new(api, options)?;
        session.attach(pid)?;

        Ok(Self {
            session,
            process_id: pid,
            process: None,
            launched: None,
            cancellation: CancellationToken::new(),
            finished: false,
            closed: false,
        })
    }

    /// Launch a process under debug control.
    pub fn launch(
        api: A,
        application: Option<String>,
        command_line: Option<String>,
        options: SessionOptions,
    ) -> Result<Self, DebugError> {
        let session = DebugSession::new(api, options)?;
        let info = session.launch(application, command_line)?;

        Ok(Self {
            session,
            process_id: info.process_id,
            process: Some(info.process.raw()),
            launched: Some(Launched {
                process: info.process,
                thread: info.thread,
            }),
            cancellation: CancellationToken::new(),
            finished: false,
            closed: false,
        })
    }

    /// Stop at the next wait boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Next output string, suspending instead of blocking.
    ///
    /// Dropping the future mid-wait keeps a retrieved event in the session,
    /// so the next call (or disposal) still acknowledges it.
    pub async fn next_async(&mut self) -> Option<Result<String, DebugError>> {
        while !self.finished {
            let event = match self
                .session
                .wait_for_event_cancellable_async(&self.cancellation)
                .await
            {
                Ok(event) => event,
                Err(e) => return self.fail(e),
            };

            let (step, status) = self.inspect(&event);
            if let Err(e) = self.session.continue_event_async(event, status).await {
                return self.fail(e);
            }
            if let Some(item) = self.settle(step) {
                return Some(item);
            }
        }
        None
    }

    /// Decide what `event` means and how to acknowledge it.
    fn inspect(&mut self, event: &DebugEvent) -> (Step, ContinueStatus) {
        let status = event.default_verdict();
        let step = match &event.payload {
            EventPayload::CreateProcess(info) => {
                if self.process.is_none() {
                    self.process = Some(info.process);
                }
                self.log_image_name("Process image", info.image_name);
                Step::Skip
            }
            EventPayload::LoadDll(info) => {
                self.log_image_name("Loaded module", info.image_name);
                Step::Skip
            }
            EventPayload::ExitProcess { exit_code } => {
                log::info!("Process {} exited with code {}", event.process_id, exit_code);
                Step::End
            }
            EventPayload::OutputDebugString(remote) => match self.process {
                None => Step::Fail(DebugError::MissingProcessHandle),
                Some(process) => match RemoteReader::new(self.session.api(), process)
                    .read_string(*remote)
                {
                    Ok(Some(text)) => Step::Yield(text),
                    Ok(None) => {
                        log::warn!("Output string event without string data, skipped");
                        Step::Skip
                    }
                    Err(e) => Step::Fail(e.into()),
                },
            },
            EventPayload::Rip { error, kind } => {
                log::warn!("RIP event: error {} type {}", error, kind);
                Step::Skip
            }
            other => {
                log::trace!("Passing through {:?} event", other.kind());
                Step::Skip
            }
        };
        (step, status)
    }

    fn log_image_name(&self, what: &str, name: ImageName) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let Some(process) = self.process else {
            return;
        };
        match RemoteReader::new(self.session.api(), process).read_image_name(name) {
            Ok(Some(name)) => log::debug!("{}: {}", what, name),
            Ok(None) => log::debug!("{}: <unknown>", what),
            Err(e) => log::debug!("{}: unreadable ({})", what, e),
        }
    }

    /// Turn a step into an item, fusing the stream when it ends.
    fn settle(&mut self, step: Step) -> Option<Result<String, DebugError>> {
        match step {
            Step::Skip => None,
            Step::Yield(text) => Some(Ok(text)),
            Step::End => {
                self.finished = true;
                None
            }
            Step::Fail(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    fn fail(&mut self, e: DebugError) -> Option<Result<String, DebugError>> {
        self.finished = true;
        Some(Err(e))
    }

    /// Detach without killing the target and release everything.
    pub fn close(mut self) -> Result<(), DebugError> {
        self.dispose()
    }

    fn dispose(&mut self) -> Result<(), DebugError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let detached = self.session.detach(self.process_id);
        if let Some(launched) = self.launched.take() {
            for handle in [launched.process, launched.thread] {
                if let Err(e) = self.session.close_handle(handle) {
                    log::warn!("Failed to close launch handle: {}", e);
                }
            }
        }
        self.session.shutdown();
        detached
    }
}

impl<A: DebugApi> Iterator for DebugStringStream<A> {
    type Item = Result<String, DebugError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let event = match self.session.wait_for_event_cancellable(&self.cancellation) {
                Ok(event) => event,
                Err(e) => return self.fail(e),
            };

            let (step, status) = self.inspect(&event);
            if let Err(e) = self.session.continue_event(event, status) {
                return self.fail(e);
            }
            if let Some(item) = self.settle(step) {
                return Some(item);
            }
        }
        None
    }
}

impl<A: DebugApi> Drop for DebugStringStream<A> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            // Detaching from an exited target fails; that is expected
            log::debug!("Closing debug string stream: {}", e);
        }
    }
}
