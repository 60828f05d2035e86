//! Core module - Debug session engine
//!
//! This module contains the thread-affine dispatcher, the debug session built
//! on it, the remote string reader and the debug string stream.

pub mod debugger;
pub mod dispatcher;
pub mod locale;
pub mod memory;
pub mod stream;

pub use debugger::{DebugError, DebugSession, SessionOptions};
pub use dispatcher::{DispatchError, Dispatcher};
pub use locale::Locale;
pub use memory::{read_remote_string, RemoteReader};
pub use stream::DebugStringStream;
