//! Decoding of the raw `DEBUG_EVENT` union.

use windows::Win32::System::Diagnostics::Debug::DEBUG_EVENT;

use crate::core::debugger::DebugError;
use crate::debug::types::{
    CreateProcessInfo, CreateThreadInfo, DebugEvent, EventKind, EventPayload, ExceptionInfo,
    ExceptionRecord, ImageName, LoadDllInfo, OwnedHandle, RawHandle, RemoteString,
    StringEncoding,
};

/// Decode one raw event. Only the union member selected by the tag is read.
pub(super) fn decode(raw: &DEBUG_EVENT) -> Result<DebugEvent, DebugError> {
    let kind = EventKind::from_code(raw.dwDebugEventCode.0)?;
    log::trace!(
        "Debug event {:?} from pid {} tid {}",
        kind,
        raw.dwProcessId,
        raw.dwThreadId
    );

    // SAFETY: the OS fills the union member that matches dwDebugEventCode
    let payload = unsafe {
        match kind {
            EventKind::Exception => {
                let info = &raw.u.Exception;
                let record = &info.ExceptionRecord;
                let count = (record.NumberParameters as usize).min(record.ExceptionInformation.len());
                EventPayload::Exception(ExceptionInfo {
                    record: ExceptionRecord {
                        code: record.ExceptionCode.0 as u32,
                        flags: record.ExceptionFlags,
                        chained_record: record.ExceptionRecord as usize,
                        address: record.ExceptionAddress as usize,
                        parameters: record.ExceptionInformation[..count].to_vec(),
                    },
                    first_chance: info.dwFirstChance != 0,
                })
            }
            EventKind::CreateThread => {
                let info = &raw.u.CreateThread;
                EventPayload::CreateThread(CreateThreadInfo {
                    thread: RawHandle(info.hThread.0),
                    thread_local_base: info.lpThreadLocalBase as usize,
                    start_address: info.lpStartAddress.map_or(0, |f| f as usize),
                })
            }
            EventKind::CreateProcess => {
                let info = &raw.u.CreateProcessInfo;
                EventPayload::CreateProcess(CreateProcessInfo {
                    file: OwnedHandle::from_raw(RawHandle(info.hFile.0)),
                    process: RawHandle(info.hProcess.0),
                    thread: RawHandle(info.hThread.0),
                    base_of_image: info.lpBaseOfImage as usize,
                    debug_info_file_offset: info.dwDebugInfoFileOffset,
                    debug_info_size: info.nDebugInfoSize,
                    thread_local_base: info.lpThreadLocalBase as usize,
                    start_address: info.lpStartAddress.map_or(0, |f| f as usize),
                    image_name: ImageName {
                        address: info.lpImageName as usize,
                        encoding: StringEncoding::from_unicode_flag(info.fUnicode),
                    },
                })
            }
            EventKind::ExitThread => EventPayload::ExitThread {
                exit_code: raw.u.ExitThread.dwExitCode,
            },
            EventKind::ExitProcess => EventPayload::ExitProcess {
                exit_code: raw.u.ExitProcess.dwExitCode,
            },
            EventKind::LoadDll => {
                let info = &raw.u.LoadDll;
                EventPayload::LoadDll(LoadDllInfo {
                    file: OwnedHandle::from_raw(RawHandle(info.hFile.0)),
                    base_of_dll: info.lpBaseOfDll as usize,
                    debug_info_file_offset: info.dwDebugInfoFileOffset,
                    debug_info_size: info.nDebugInfoSize,
                    image_name: ImageName {
                        address: info.lpImageName as usize,
                        encoding: StringEncoding::from_unicode_flag(info.fUnicode),
                    },
                })
            }
            EventKind::UnloadDll => EventPayload::UnloadDll {
                base_of_dll: raw.u.UnloadDll.lpBaseOfDll as usize,
            },
            EventKind::OutputDebugString => {
                let info = &raw.u.DebugString;
                EventPayload::OutputDebugString(RemoteString::new(
                    info.lpDebugStringData.0 as usize,
                    StringEncoding::from_unicode_flag(info.fUnicode),
                ))
            }
            EventKind::Rip => {
                let info = &raw.u.RipInfo;
                EventPayload::Rip {
                    error: info.dwError,
                    kind: info.dwType.0,
                }
            }
        }
    };

    Ok(DebugEvent::new(raw.dwProcessId, raw.dwThreadId, payload))
}
