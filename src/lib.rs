//! dbgstr - capture the debug output strings of a process
//!
//! Attaches to a running process (or launches one) as a debugger and streams
//! the text it emits through the debug-output channel.

pub mod core;
pub mod debug;
pub mod ui;

pub use crate::core::{DebugError, DebugSession, DebugStringStream, Dispatcher, SessionOptions};
pub use crate::debug::DebugApi;
