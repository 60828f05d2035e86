//! Windows-specific debug API implementation using the Win32 Debug API.

mod event;
mod process;

use std::ffi::c_void;
use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, NTSTATUS};
use windows::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugActiveProcess, DebugActiveProcessStop, DebugSetProcessKillOnExit,
    ReadProcessMemory, WaitForDebugEventEx, DEBUG_EVENT,
};
use windows::Win32::System::Threading::INFINITE;

use super::types::{ContinueStatus, DebugEvent, NativeError, ProcessInformation, RawHandle};
use super::{DebugApi, RemoteMemory};
use crate::core::debugger::DebugError;

/// Win32 implementation of [`DebugApi`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsDebugApi;

impl WindowsDebugApi {
    pub fn new() -> Self {
        Self
    }
}

/// Convert a `windows` error into a [`NativeError`] carrying the Win32 code.
pub(crate) fn native_error(operation: &'static str, error: windows::core::Error) -> NativeError {
    // Win32 failures are reported as HRESULT_FROM_WIN32 (0x8007xxxx)
    let hresult = error.code().0 as u32;
    let code = if hresult & 0xFFFF_0000 == 0x8007_0000 {
        hresult & 0xFFFF
    } else {
        hresult
    };
    NativeError::new(operation, code, error.message().to_string())
}

fn to_handle(raw: RawHandle) -> HANDLE {
    HANDLE(raw.0)
}

impl RemoteMemory for WindowsDebugApi {
    fn read_memory(
        &self,
        process: RawHandle,
        address: usize,
        buffer: &mut [u8],
    ) -> Result<usize, NativeError> {
        let mut bytes_read = 0usize;

        unsafe {
            ReadProcessMemory(
                to_handle(process),
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                Some(&mut bytes_read),
            )
            .map_err(|e| native_error("ReadProcessMemory", e))?;
        }

        Ok(bytes_read)
    }
}

impl DebugApi for WindowsDebugApi {
    fn attach(&self, pid: u32) -> Result<(), NativeError> {
        unsafe { DebugActiveProcess(pid).map_err(|e| native_error("DebugActiveProcess", e)) }
    }

    fn create_process(
        &self,
        application: Option<&str>,
        command_line: Option<&str>,
    ) -> Result<ProcessInformation, NativeError> {
        process::create_debugged_process(application, command_line)
    }

    fn wait_for_event(&self, timeout: Option<Duration>) -> Result<DebugEvent, DebugError> {
        let millis = match timeout {
            Some(timeout) => timeout.as_millis().min(u128::from(INFINITE - 1)) as u32,
            None => INFINITE,
        };
        let mut raw = DEBUG_EVENT::default();

        unsafe {
            WaitForDebugEventEx(&mut raw, millis)
                .map_err(|e| native_error("WaitForDebugEventEx", e))?;
        }

        event::decode(&raw)
    }

    fn continue_event(&self, pid: u32, tid: u32, status: ContinueStatus) -> Result<(), NativeError> {
        unsafe {
            ContinueDebugEvent(pid, tid, NTSTATUS(status.code() as i32))
                .map_err(|e| native_error("ContinueDebugEvent", e))
        }
    }

    fn detach(&self, pid: u32) -> Result<(), NativeError> {
        unsafe { DebugActiveProcessStop(pid).map_err(|e| native_error("DebugActiveProcessStop", e)) }
    }

    fn set_kill_on_exit(&self, kill_on_exit: bool) -> Result<(), NativeError> {
        unsafe {
            DebugSetProcessKillOnExit(kill_on_exit)
                .map_err(|e| native_error("DebugSetProcessKillOnExit", e))
        }
    }

    fn close_handle(&self, handle: RawHandle) -> Result<(), NativeError> {
        unsafe { CloseHandle(to_handle(handle)).map_err(|e| native_error("CloseHandle", e)) }
    }
}
