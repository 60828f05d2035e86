//! Simulated OS debug API for driving the session engine in tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use dbgstr::core::DebugError;
use dbgstr::debug::types::{
    ContinueStatus, CreateProcessInfo, DebugEvent, EventPayload, ImageName, LoadDllInfo,
    NativeError, OwnedHandle, ProcessInformation, RawHandle, RemoteString, StringEncoding,
    ERROR_PARTIAL_COPY, ERROR_SEM_TIMEOUT,
};
use dbgstr::debug::{DebugApi, RemoteMemory};

pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_ACCESS_DENIED: u32 = 5;

/// Calls the engine made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Attach(u32),
    CreateProcess(Option<String>, Option<String>),
    /// A wait that returned an event
    Delivered(u32, u32),
    Continue(u32, u32, ContinueStatus),
    Detach(u32),
    KillOnExit(bool),
    Close(RawHandle),
}

pub enum Scripted {
    Event(DebugEvent),
    Fail(DebugError),
}

struct Launch {
    process: RawHandle,
    thread: RawHandle,
    process_id: u32,
    thread_id: u32,
}

#[derive(Default)]
struct State {
    script: VecDeque<Scripted>,
    regions: Vec<(usize, Vec<u8>)>,
    calls: Vec<(ThreadId, Call)>,
    reads: Vec<RawHandle>,
    missing: HashSet<u32>,
    launch: Option<Launch>,
    /// (pid, tid) of the event waiting for acknowledgement
    pending: Option<(u32, u32)>,
    /// Added to every wait, as if the event arrived late
    wait_delay: Duration,
    read_failure: Option<u32>,
    kill_on_exit_failure: Option<u32>,
}

/// A fake target: scripted events plus a sparse memory image.
#[derive(Default)]
pub struct SimulatedTarget {
    state: Mutex<State>,
}

impl SimulatedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, event: DebugEvent) {
        self.state.lock().script.push_back(Scripted::Event(event));
    }

    pub fn push_failure(&self, error: DebugError) {
        self.state.lock().script.push_back(Scripted::Fail(error));
    }

    /// Map `bytes` at `address`.
    pub fn map(&self, address: usize, bytes: Vec<u8>) {
        self.state.lock().regions.push((address, bytes));
    }

    pub fn map_narrow(&self, address: usize, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.map(address, bytes);
    }

    pub fn map_wide(&self, address: usize, text: &str) {
        let bytes = text
            .encode_utf16()
            .chain([0])
            .flat_map(u16::to_ne_bytes)
            .collect();
        self.map(address, bytes);
    }

    /// Make attaching to `pid` fail like a nonexistent process.
    pub fn mark_missing(&self, pid: u32) {
        self.state.lock().missing.insert(pid);
    }

    pub fn set_launch(&self, process: RawHandle, thread: RawHandle, process_id: u32, thread_id: u32) {
        self.state.lock().launch = Some(Launch {
            process,
            thread,
            process_id,
            thread_id,
        });
    }

    pub fn set_wait_delay(&self, delay: Duration) {
        self.state.lock().wait_delay = delay;
    }

    /// Make every memory read fail with `code`.
    pub fn fail_reads(&self, code: u32) {
        self.state.lock().read_failure = Some(code);
    }

    pub fn fail_kill_on_exit(&self, code: u32) {
        self.state.lock().kill_on_exit_failure = Some(code);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn call_threads(&self) -> HashSet<ThreadId> {
        self.state.lock().calls.iter().map(|(t, _)| *t).collect()
    }

    pub fn reads(&self) -> Vec<RawHandle> {
        self.state.lock().reads.clone()
    }

    pub fn remaining_events(&self) -> usize {
        self.state.lock().script.len()
    }

    pub fn has_pending_event(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    pub fn continues(&self) -> Vec<ContinueStatus> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Continue(_, _, status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<RawHandle> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Close(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push((thread::current().id(), call));
    }
}

impl RemoteMemory for SimulatedTarget {
    fn read_memory(
        &self,
        process: RawHandle,
        address: usize,
        buffer: &mut [u8],
    ) -> Result<usize, NativeError> {
        let mut state = self.state.lock();
        state.reads.push(process);
        if let Some(code) = state.read_failure {
            return Err(NativeError::new("ReadProcessMemory", code, "Access is denied."));
        }
        for (base, bytes) in &state.regions {
            let end = base + bytes.len();
            if address >= *base && address + buffer.len() <= end {
                let offset = address - base;
                buffer.copy_from_slice(&bytes[offset..offset + buffer.len()]);
                return Ok(buffer.len());
            }
        }
        Err(NativeError::new(
            "ReadProcessMemory",
            ERROR_PARTIAL_COPY,
            "Only part of a ReadProcessMemory request was completed.",
        ))
    }
}

impl DebugApi for SimulatedTarget {
    fn attach(&self, pid: u32) -> Result<(), NativeError> {
        self.record(Call::Attach(pid));
        if self.state.lock().missing.contains(&pid) {
            return Err(NativeError::new(
                "DebugActiveProcess",
                ERROR_INVALID_PARAMETER,
                "The parameter is incorrect.",
            ));
        }
        Ok(())
    }

    fn create_process(
        &self,
        application: Option<&str>,
        command_line: Option<&str>,
    ) -> Result<ProcessInformation, NativeError> {
        self.record(Call::CreateProcess(
            application.map(str::to_owned),
            command_line.map(str::to_owned),
        ));
        let state = self.state.lock();
        let launch = state.launch.as_ref().ok_or_else(|| {
            NativeError::new("CreateProcessW", 2, "The system cannot find the file specified.")
        })?;
        Ok(ProcessInformation {
            process: OwnedHandle::from_raw(launch.process).expect("valid process handle"),
            thread: OwnedHandle::from_raw(launch.thread).expect("valid thread handle"),
            process_id: launch.process_id,
            thread_id: launch.thread_id,
        })
    }

    fn wait_for_event(&self, timeout: Option<Duration>) -> Result<DebugEvent, DebugError> {
        let delay = self.state.lock().wait_delay;
        thread::sleep(delay);

        let next = {
            let mut state = self.state.lock();
            assert!(
                state.pending.is_none(),
                "waited while event {:?} was unacknowledged",
                state.pending
            );
            state.script.pop_front()
        };

        match next {
            Some(Scripted::Event(event)) => {
                self.state.lock().pending = Some((event.process_id, event.thread_id));
                self.record(Call::Delivered(event.process_id, event.thread_id));
                Ok(event)
            }
            Some(Scripted::Fail(error)) => Err(error),
            None => {
                thread::sleep(timeout.unwrap_or(Duration::from_millis(10)));
                Err(NativeError::new(
                    "WaitForDebugEventEx",
                    ERROR_SEM_TIMEOUT,
                    "The semaphore timeout period has expired.",
                )
                .into())
            }
        }
    }

    fn continue_event(&self, pid: u32, tid: u32, status: ContinueStatus) -> Result<(), NativeError> {
        self.record(Call::Continue(pid, tid, status));
        let mut state = self.state.lock();
        if state.pending != Some((pid, tid)) {
            return Err(NativeError::new("ContinueDebugEvent", ERROR_INVALID_PARAMETER, "no such event"));
        }
        state.pending = None;
        Ok(())
    }

    fn detach(&self, pid: u32) -> Result<(), NativeError> {
        self.record(Call::Detach(pid));
        Ok(())
    }

    fn set_kill_on_exit(&self, kill_on_exit: bool) -> Result<(), NativeError> {
        self.record(Call::KillOnExit(kill_on_exit));
        match self.state.lock().kill_on_exit_failure {
            Some(code) => Err(NativeError::new(
                "DebugSetProcessKillOnExit",
                code,
                "Access is denied.",
            )),
            None => Ok(()),
        }
    }

    fn close_handle(&self, handle: RawHandle) -> Result<(), NativeError> {
        self.record(Call::Close(handle));
        Ok(())
    }
}

pub fn create_process(pid: u32, tid: u32, process: RawHandle, file: RawHandle) -> DebugEvent {
    DebugEvent::new(
        pid,
        tid,
        EventPayload::CreateProcess(CreateProcessInfo {
            file: OwnedHandle::from_raw(file),
            process,
            thread: RawHandle(0x7000),
            base_of_image: 0x40_0000,
            debug_info_file_offset: 0,
            debug_info_size: 0,
            thread_local_base: 0,
            start_address: 0x40_1000,
            image_name: ImageName {
                address: 0,
                encoding: StringEncoding::Wide,
            },
        }),
    )
}

pub fn load_dll(pid: u32, tid: u32, file: RawHandle) -> DebugEvent {
    DebugEvent::new(
        pid,
        tid,
        EventPayload::LoadDll(LoadDllInfo {
            file: OwnedHandle::from_raw(file),
            base_of_dll: 0x7ff0_0000,
            debug_info_file_offset: 0,
            debug_info_size: 0,
            image_name: ImageName {
                address: 0,
                encoding: StringEncoding::Wide,
            },
        }),
    )
}

pub fn output_string(pid: u32, tid: u32, address: usize, encoding: StringEncoding) -> DebugEvent {
    DebugEvent::new(
        pid,
        tid,
        EventPayload::OutputDebugString(RemoteString::new(address, encoding)),
    )
}

pub fn exit_process(pid: u32, tid: u32, exit_code: u32) -> DebugEvent {
    DebugEvent::new(pid, tid, EventPayload::ExitProcess { exit_code })
}

pub fn exit_thread(pid: u32, tid: u32) -> DebugEvent {
    DebugEvent::new(pid, tid, EventPayload::ExitThread { exit_code: 0 })
}
