//! Memory - reading strings out of the target process
//!
//! The length of a remote string is unknown up front and the string may end
//! right at the edge of a mapped region, so it is read one character unit at
//! a time. A unit that cannot be accessed ends the string instead of failing.

use std::mem;

use crate::debug::types::{ImageName, NativeError, RawHandle, RemoteString, StringEncoding};
use crate::debug::RemoteMemory;

/// Reads values from one target process.
pub struct RemoteReader<'a, M: RemoteMemory + ?Sized> {
    memory: &'a M,
    process: RawHandle,
}

impl<'a, M: RemoteMemory + ?Sized> RemoteReader<'a, M> {
    pub fn new(memory: &'a M, process: RawHandle) -> Self {
        Self { memory, process }
    }

    /// Fill `buffer` from `address`. `Ok(false)` means the memory is not
    /// (fully) accessible.
    fn read_exact(&self, address: usize, buffer: &mut [u8]) -> Result<bool, NativeError> {
        match self.memory.read_memory(self.process, address, buffer) {
            Ok(read) => Ok(read == buffer.len()),
            Err(e) if e.is_partial_copy() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read one pointer-sized value.
    pub fn read_pointer(&self, address: usize) -> Result<Option<usize>, NativeError> {
        let mut buffer = [0u8; mem::size_of::<usize>()];
        if self.read_exact(address, &mut buffer)? {
            Ok(Some(usize::from_ne_bytes(buffer)))
        } else {
            Ok(None)
        }
    }

    /// Read a null-terminated string. A null address yields `None`.
    pub fn read_string(&self, remote: RemoteString) -> Result<Option<String>, NativeError> {
        if remote.is_null() {
            return Ok(None);
        }

        let bytes = self.read_units(remote.address, remote.encoding.unit_size())?;
        let text = match remote.encoding {
            StringEncoding::Narrow => decode_narrow(bytes.into_iter()),
            StringEncoding::Wide => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        };
        Ok(Some(text))
    }

    /// Collect the bytes of `unit_size`-byte units up to (excluding) the first
    /// zero unit.
    fn read_units(&self, start: usize, unit_size: usize) -> Result<Vec<u8>, NativeError> {
        let mut bytes = Vec::new();
        let mut unit = vec![0u8; unit_size];
        let mut address = start;

        loop {
            if !self.read_exact(address, &mut unit)? || unit.iter().all(|&b| b == 0) {
                break;
            }
            bytes.extend_from_slice(&unit);
            match address.checked_add(unit_size) {
                Some(next) => address = next,
                None => break,
            }
        }

        Ok(bytes)
    }

    /// Resolve an image name, which the OS reports as a pointer to a pointer
    /// to the string. Absence at either hop is `None`.
    pub fn read_image_name(&self, name: ImageName) -> Result<Option<String>, NativeError> {
        if name.address == 0 {
            return Ok(None);
        }
        match self.read_pointer(name.address)? {
            Some(address) => self.read_string(RemoteString::new(address, name.encoding)),
            None => Ok(None),
        }
    }
}

/// Read a null-terminated string from `process` at `remote`.
pub fn read_remote_string<M: RemoteMemory + ?Sized>(
    memory: &M,
    process: RawHandle,
    remote: RemoteString,
) -> Result<Option<String>, NativeError> {
    RemoteReader::new(memory, process).read_string(remote)
}

/// Single-byte text: ASCII kept, everything else replaced by `?`.
fn decode_narrow(bytes: impl Iterator<Item = u8>) -> String {
    bytes
        .map(|b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}
