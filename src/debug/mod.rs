//! Debug module - OS debug API boundary.
//!
//! Provides the seam between the session engine and the operating system:
//! - Process attach/detach and launch under debug control
//! - Debug event wait/continue
//! - Remote memory reads and handle release

pub mod types;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "windows")]
pub use windows::WindowsDebugApi as PlatformDebugApi;

use std::sync::Arc;
use std::time::Duration;

use crate::core::debugger::DebugError;
use types::{ContinueStatus, DebugEvent, NativeError, ProcessInformation, RawHandle};

/// Read access to another process's address space.
pub trait RemoteMemory {
    /// Read up to `buffer.len()` bytes at `address` in `process`.
    ///
    /// Returns the number of bytes copied. A region that cannot be accessed
    /// fails with `ERROR_PARTIAL_COPY`.
    fn read_memory(
        &self,
        process: RawHandle,
        address: usize,
        buffer: &mut [u8],
    ) -> Result<usize, NativeError>;
}

/// Platform-agnostic debug API.
///
/// Every call except `read_memory` is thread-affine: for one session they must
/// all come from the same thread. `DebugSession` takes care of that.
pub trait DebugApi: RemoteMemory + Send + Sync + 'static {
    /// Attach to a running process by PID
    fn attach(&self, pid: u32) -> Result<(), NativeError>;

    /// Start a process under debug control of the calling thread
    fn create_process(
        &self,
        application: Option<&str>,
        command_line: Option<&str>,
    ) -> Result<ProcessInformation, NativeError>;

    /// Wait for the next debug event; `None` waits forever
    fn wait_for_event(&self, timeout: Option<Duration>) -> Result<DebugEvent, DebugError>;

    /// Acknowledge the last event reported for `pid`/`tid`
    fn continue_event(&self, pid: u32, tid: u32, status: ContinueStatus) -> Result<(), NativeError>;

    /// Stop debugging `pid`
    fn detach(&self, pid: u32) -> Result<(), NativeError>;

    /// Whether targets of the calling thread are killed when it stops debugging
    fn set_kill_on_exit(&self, kill_on_exit: bool) -> Result<(), NativeError>;

    fn close_handle(&self, handle: RawHandle) -> Result<(), NativeError>;
}

impl<T: RemoteMemory + ?Sized> RemoteMemory for Arc<T> {
    fn read_memory(
        &self,
        process: RawHandle,
        address: usize,
        buffer: &mut [u8],
    ) -> Result<usize, NativeError> {
        (**self).read_memory(process, address, buffer)
    }
}

impl<T: DebugApi + ?Sized> DebugApi for Arc<T> {
    fn attach(&self, pid: u32) -> Result<(), NativeError> {
        (**self).attach(pid)
    }

    fn create_process(
        &self,
        application: Option<&str>,
        command_line: Option<&str>,
    ) -> Result<ProcessInformation, NativeError> {
        (**self).create_process(application, command_line)
    }

    fn wait_for_event(&self, timeout: Option<Duration>) -> Result<DebugEvent, DebugError> {
        (**self).wait_for_event(timeout)
    }

    fn continue_event(&self, pid: u32, tid: u32, status: ContinueStatus) -> Result<(), NativeError> {
        (**self).continue_event(pid, tid, status)
    }

    fn detach(&self, pid: u32) -> Result<(), NativeError> {
        (**self).detach(pid)
    }

    fn set_kill_on_exit(&self, kill_on_exit: bool) -> Result<(), NativeError> {
        (**self).set_kill_on_exit(kill_on_exit)
    }

    fn close_handle(&self, handle: RawHandle) -> Result<(), NativeError> {
        (**self).close_handle(handle)
    }
}
