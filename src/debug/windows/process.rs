//! Process launch under debug control using the Windows API.

use std::iter;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::System::Threading::{
    CreateProcessW, DEBUG_ONLY_THIS_PROCESS, PROCESS_INFORMATION, STARTUPINFOW,
};

use super::native_error;
use crate::debug::types::{NativeError, OwnedHandle, ProcessInformation, RawHandle};

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(iter::once(0)).collect()
}

/// Start `command_line` debugged by the calling thread.
///
/// The calling thread becomes the only thread allowed to wait for and
/// continue this process's debug events.
pub fn create_debugged_process(
    application: Option<&str>,
    command_line: Option<&str>,
) -> Result<ProcessInformation, NativeError> {
    let application = application.map(to_wide);
    // CreateProcessW may write into the command line buffer
    let mut command_line = command_line.map(to_wide);

    let startup_info = STARTUPINFOW {
        cb: std::mem::size_of::<STARTUPINFOW>() as u32,
        ..Default::default()
    };
    let mut info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessW(
            application
                .as_ref()
                .map_or(PCWSTR::null(), |a| PCWSTR(a.as_ptr())),
            command_line
                .as_mut()
                .map_or(PWSTR::null(), |c| PWSTR(c.as_mut_ptr())),
            None,
            None,
            false,
            DEBUG_ONLY_THIS_PROCESS,
            None,
            PCWSTR::null(),
            &startup_info,
            &mut info,
        )
        .map_err(|e| native_error("CreateProcessW", e))?;
    }

    let invalid = || NativeError::new("CreateProcessW", 6, "returned an invalid handle");
    Ok(ProcessInformation {
        process: OwnedHandle::from_raw(RawHandle(info.hProcess.0)).ok_or_else(invalid)?,
        thread: OwnedHandle::from_raw(RawHandle(info.hThread.0)).ok_or_else(invalid)?,
        process_id: info.dwProcessId,
        thread_id: info.dwThreadId,
    })
}
