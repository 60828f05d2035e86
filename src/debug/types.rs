//! Common types for debugging functionality.
//!
//! Debug events are modelled as one record carrying the reporting process and
//! thread plus a payload that is tagged by kind. Each payload owns exactly the
//! resources it introduces.

use std::fmt;
use std::mem::ManuallyDrop;

use thiserror::Error;

/// `ERROR_SEM_TIMEOUT`: no debug event arrived within the wait timeout.
pub const ERROR_SEM_TIMEOUT: u32 = 121;

/// `ERROR_PARTIAL_COPY`: part of the requested memory could not be read.
pub const ERROR_PARTIAL_COPY: u32 = 299;

/// An OS debug-API call returned failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed with native error {code}: {message}")]
pub struct NativeError {
    /// Name of the failing call
    pub operation: &'static str,
    /// Numeric OS error code
    pub code: u32,
    pub message: String,
}

impl NativeError {
    pub fn new(operation: &'static str, code: u32, message: impl Into<String>) -> Self {
        Self {
            operation,
            code,
            message: message.into(),
        }
    }

    /// No event became available within the wait timeout.
    pub fn is_timeout(&self) -> bool {
        self.code == ERROR_SEM_TIMEOUT
    }

    /// The target memory could not be (fully) accessed.
    pub fn is_partial_copy(&self) -> bool {
        self.code == ERROR_PARTIAL_COPY
    }
}

/// Raw OS handle value. Carries no ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub isize);

impl RawHandle {
    /// Both null and `INVALID_HANDLE_VALUE` (-1) are unusable.
    pub fn is_valid(self) -> bool {
        self.0 != 0 && self.0 != -1
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A handle the debugger is responsible for closing.
///
/// Release goes through the debug API (`DebugApi::close_handle`). Dropping an
/// unreleased handle only logs the leak.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "owned handles must be released through the debug API"]
pub struct OwnedHandle(RawHandle);

impl OwnedHandle {
    /// Take ownership of `raw`. Returns `None` for null/invalid values.
    pub fn from_raw(raw: RawHandle) -> Option<Self> {
        raw.is_valid().then_some(Self(raw))
    }

    pub fn raw(&self) -> RawHandle {
        self.0
    }

    /// Give up ownership without logging a leak.
    pub fn into_raw(self) -> RawHandle {
        ManuallyDrop::new(self).0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        log::warn!("Owned handle {} dropped without being closed", self.0);
    }
}

/// Acknowledgement value passed back to the OS for a debug event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueStatus {
    /// `DBG_CONTINUE`
    Continue,
    /// `DBG_EXCEPTION_NOT_HANDLED`
    ExceptionNotHandled,
    /// `DBG_REPLY_LATER`
    ReplyLater,
}

impl ContinueStatus {
    pub fn code(self) -> u32 {
        match self {
            ContinueStatus::Continue => 0x0001_0002,
            ContinueStatus::ExceptionNotHandled => 0x8001_0001,
            ContinueStatus::ReplyLater => 0x4001_0001,
        }
    }
}

/// Character width of a string in the target's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    /// One byte per character
    Narrow,
    /// UTF-16 units
    Wide,
}

impl StringEncoding {
    /// Map the OS `fUnicode` flag.
    pub fn from_unicode_flag(flag: u16) -> Self {
        if flag != 0 {
            StringEncoding::Wide
        } else {
            StringEncoding::Narrow
        }
    }

    /// Size of one character unit in bytes.
    pub fn unit_size(self) -> usize {
        match self {
            StringEncoding::Narrow => 1,
            StringEncoding::Wide => 2,
        }
    }
}

/// Where a string starts in the target's address space.
///
/// Only meaningful while the process handle it was reported with is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteString {
    pub address: usize,
    pub encoding: StringEncoding,
}

impl RemoteString {
    pub fn new(address: usize, encoding: StringEncoding) -> Self {
        Self { address, encoding }
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }
}

/// Image name reported with create-process and load-dll events.
///
/// `address` points at a pointer to the string, not at the string itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageName {
    pub address: usize,
    pub encoding: StringEncoding,
}

/// Numeric event-kind tags of the OS debug event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Exception,
    CreateThread,
    CreateProcess,
    ExitThread,
    ExitProcess,
    LoadDll,
    UnloadDll,
    OutputDebugString,
    Rip,
}

impl EventKind {
    /// Decode the event tag. Unknown tags are never skipped, since that would
    /// desynchronize the continue protocol.
    pub fn from_code(code: u32) -> Result<Self, UnknownEventKind> {
        Ok(match code {
            1 => EventKind::Exception,
            2 => EventKind::CreateThread,
            3 => EventKind::CreateProcess,
            4 => EventKind::ExitThread,
            5 => EventKind::ExitProcess,
            6 => EventKind::LoadDll,
            7 => EventKind::UnloadDll,
            8 => EventKind::OutputDebugString,
            9 => EventKind::Rip,
            other => return Err(UnknownEventKind(other)),
        })
    }

    pub fn code(self) -> u32 {
        match self {
            EventKind::Exception => 1,
            EventKind::CreateThread => 2,
            EventKind::CreateProcess => 3,
            EventKind::ExitThread => 4,
            EventKind::ExitProcess => 5,
            EventKind::LoadDll => 6,
            EventKind::UnloadDll => 7,
            EventKind::OutputDebugString => 8,
            EventKind::Rip => 9,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unimplemented debug event kind {0}")]
pub struct UnknownEventKind(pub u32);

/// Process created or attached
#[derive(Debug)]
pub struct CreateProcessInfo {
    /// Image file handle; owned by the debugger
    pub file: Option<OwnedHandle>,
    /// Long-lived target process handle; owned by the OS
    pub process: RawHandle,
    /// Initial thread handle; owned by the OS
    pub thread: RawHandle,
    pub base_of_image: usize,
    pub debug_info_file_offset: u32,
    pub debug_info_size: u32,
    pub thread_local_base: usize,
    pub start_address: usize,
    pub image_name: ImageName,
}

#[derive(Debug)]
pub struct CreateThreadInfo {
    /// Owned by the OS
    pub thread: RawHandle,
    pub thread_local_base: usize,
    pub start_address: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub code: u32,
    pub flags: u32,
    /// Address of a chained record in the target, 0 if none
    pub chained_record: usize,
    pub address: usize,
    pub parameters: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub record: ExceptionRecord,
    pub first_chance: bool,
}

/// DLL/Library loaded
#[derive(Debug)]
pub struct LoadDllInfo {
    /// Module file handle; owned by the debugger
    pub file: Option<OwnedHandle>,
    pub base_of_dll: usize,
    pub debug_info_file_offset: u32,
    pub debug_info_size: u32,
    pub image_name: ImageName,
}

/// Kind-specific part of a debug event.
#[derive(Debug)]
pub enum EventPayload {
    Exception(ExceptionInfo),
    CreateThread(CreateThreadInfo),
    CreateProcess(CreateProcessInfo),
    ExitThread { exit_code: u32 },
    ExitProcess { exit_code: u32 },
    LoadDll(LoadDllInfo),
    UnloadDll { base_of_dll: usize },
    /// Text is read lazily from the target
    OutputDebugString(RemoteString),
    /// Fatal protocol error reported by the system
    Rip { error: u32, kind: u32 },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Exception(_) => EventKind::Exception,
            EventPayload::CreateThread(_) => EventKind::CreateThread,
            EventPayload::CreateProcess(_) => EventKind::CreateProcess,
            EventPayload::ExitThread { .. } => EventKind::ExitThread,
            EventPayload::ExitProcess { .. } => EventKind::ExitProcess,
            EventPayload::LoadDll(_) => EventKind::LoadDll,
            EventPayload::UnloadDll { .. } => EventKind::UnloadDll,
            EventPayload::OutputDebugString(_) => EventKind::OutputDebugString,
            EventPayload::Rip { .. } => EventKind::Rip,
        }
    }
}

/// Debug event received from the debugger
#[derive(Debug)]
pub struct DebugEvent {
    pub process_id: u32,
    pub thread_id: u32,
    pub payload: EventPayload,
}

impl DebugEvent {
    pub fn new(process_id: u32, thread_id: u32, payload: EventPayload) -> Self {
        Self {
            process_id,
            thread_id,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Verdict a passive observer gives this event: output strings are
    /// swallowed so the target is not stopped, everything else passes through.
    pub fn default_verdict(&self) -> ContinueStatus {
        match self.payload {
            EventPayload::OutputDebugString(_) => ContinueStatus::Continue,
            _ => ContinueStatus::ExceptionNotHandled,
        }
    }

    /// Split off the handles the debugger must close once the event is handled.
    pub fn into_transient_handles(self) -> Vec<OwnedHandle> {
        match self.payload {
            EventPayload::CreateProcess(info) => info.file.into_iter().collect(),
            EventPayload::LoadDll(info) => info.file.into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Identity of a process started under debug control.
#[derive(Debug)]
pub struct ProcessInformation {
    pub process: OwnedHandle,
    pub thread: OwnedHandle,
    pub process_id: u32,
    pub thread_id: u32,
}
