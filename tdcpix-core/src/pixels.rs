//! Shared pixel storage and 32-bit pixel accessors.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pixel bytes shared between a histogram and the driver writing into it.
///
/// An empty vector means the buffer is not allocated.
pub type SharedPixels = Arc<Mutex<Vec<u8>>>;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Number of 32-bit pixels in a byte buffer.
#[inline]
#[must_use]
pub fn u32_len(bytes: &[u8]) -> usize {
    bytes.len() / 4
}

/// Read the native-endian 32-bit pixel at `index`.
#[inline]
#[must_use]
pub fn read_u32(bytes: &[u8], index: usize) -> u32 {
    let o = index * 4;
    u32::from_ne_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
}

/// Overwrite the 32-bit pixel at `index`.
#[inline]
pub fn write_u32(bytes: &mut [u8], index: usize, value: u32) {
    let o = index * 4;
    bytes[o..o + 4].copy_from_slice(&value.to_ne_bytes());
}

/// Add to the 32-bit pixel at `index`, wrapping on overflow.
#[inline]
pub fn add_u32(bytes: &mut [u8], index: usize, value: u32) {
    let v = read_u32(bytes, index).wrapping_add(value);
    write_u32(bytes, index, v);
}

/// Iterate over all complete 32-bit pixels.
pub fn u32_values(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
}

/// Copy the first `count` pixels into a new vector.
#[must_use]
pub fn to_u32_vec(bytes: &[u8], count: usize) -> Vec<u32> {
    u32_values(bytes).take(count).collect()
}
