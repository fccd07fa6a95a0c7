//! Contract between histograms and the acquisition driver.
//!
//! A histogram owns its pixel storage. When a pipe is opened the driver
//! receives the parameter record and a [`BufferAllocator`] capability through
//! which it reaches the destination buffer at write time.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::error::Result;
use crate::params::ParamRecord;
use crate::pixels::lock_unpoisoned;

/// Driver session handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub i32);

/// Open pipe handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipeHandle(pub i32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

impl fmt::Display for PipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe#{}", self.0)
    }
}

/// Access to the destination buffer of a pipe.
pub trait BufferAllocator: Send + Sync {
    /// Run `write` against the current buffer. Does nothing if the owner is gone.
    fn with_buffer(&self, write: &mut dyn FnMut(&mut [u8]));
}

/// Allocator capability bound to one histogram's pixel storage.
#[derive(Clone, Debug)]
pub struct PixelSink(Weak<Mutex<Vec<u8>>>);

impl PixelSink {
    #[must_use]
    pub fn new(pixels: &Arc<Mutex<Vec<u8>>>) -> Self {
        Self(Arc::downgrade(pixels))
    }
}

impl BufferAllocator for PixelSink {
    fn with_buffer(&self, write: &mut dyn FnMut(&mut [u8])) {
        if let Some(pixels) = self.0.upgrade() {
            let mut guard = lock_unpoisoned(&pixels);
            write(guard.as_mut_slice());
        }
    }
}

/// Pipe operations a histogram needs from the driver.
pub trait PipeDriver: Send + Sync {
    /// Open a pipe writing the histogram described by `params`.
    ///
    /// # Errors
    /// Returns a driver error when the pipe cannot be opened.
    fn open_pipe(
        &self,
        device: DeviceHandle,
        params: &ParamRecord,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Result<PipeHandle>;

    /// Close a previously opened pipe.
    ///
    /// # Errors
    /// Returns a driver error when the driver rejects the close.
    fn close_pipe(&self, device: DeviceHandle, pipe: PipeHandle) -> Result<()>;
}

/// A device handle together with the driver that owns it.
#[derive(Clone)]
pub struct DeviceBinding {
    pub handle: DeviceHandle,
    pub driver: Arc<dyn PipeDriver>,
}

impl DeviceBinding {
    pub fn new(handle: DeviceHandle, driver: Arc<dyn PipeDriver>) -> Self {
        Self { handle, driver }
    }
}

impl fmt::Debug for DeviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBinding")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_writes_through() {
        let pixels = Arc::new(Mutex::new(vec![0u8; 4]));
        let sink = PixelSink::new(&pixels);
        sink.with_buffer(&mut |buf| buf[2] = 9);
        assert_eq!(lock_unpoisoned(&pixels)[2], 9);
    }

    #[test]
    fn test_sink_outlived_owner() {
        let pixels = Arc::new(Mutex::new(vec![0u8; 4]));
        let sink = PixelSink::new(&pixels);
        drop(pixels);
        let mut called = false;
        sink.with_buffer(&mut |_| called = true);
        assert!(!called);
    }
}
