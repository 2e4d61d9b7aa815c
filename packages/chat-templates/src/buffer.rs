//! Buffers that cross the foreign boundary.
//!
//! Two allocator families are involved in every call, and each has its own
//! owning type:
//!
//! - [`HostBuffer`]: allocated by the host for the foreign side to read.
//!   Released by the host allocator when dropped.
//! - [`ForeignBuffer`]: allocated by the foreign runtime for the host to
//!   read. Released through [`ForeignRuntime::free_result`] when dropped.
//!
//! Neither type can be turned into the other, and neither hands out its
//! pointer for anyone else to free. Holding one on the stack is enough to
//! release it exactly once on every exit path, including `?` returns and
//! unwinding.

use std::ffi::{c_char, CStr, CString};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::error::{Error, Operation, Result};
use crate::foreign::ForeignRuntime;

/// Counts of buffers created and released by a processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub host_allocated: u64,
    pub host_released: u64,
    pub foreign_received: u64,
    pub foreign_released: u64,
}

impl BufferStats {
    /// True when every buffer that was created has been released.
    pub fn is_balanced(&self) -> bool {
        self.host_allocated == self.host_released
            && self.foreign_received == self.foreign_released
    }
}

/// Live counters behind [`BufferStats`].
#[derive(Debug, Default)]
pub(crate) struct BufferLedger {
    host_allocated: AtomicU64,
    host_released: AtomicU64,
    foreign_received: AtomicU64,
    foreign_released: AtomicU64,
}

impl BufferLedger {
    pub(crate) fn snapshot(&self) -> BufferStats {
        BufferStats {
            host_allocated: self.host_allocated.load(Ordering::Relaxed),
            host_released: self.host_released.load(Ordering::Relaxed),
            foreign_received: self.foreign_received.load(Ordering::Relaxed),
            foreign_released: self.foreign_released.load(Ordering::Relaxed),
        }
    }
}

/// A request buffer owned by the host.
pub(crate) struct HostBuffer<'l> {
    data: CString,
    operation: Operation,
    ledger: &'l BufferLedger,
}

impl<'l> HostBuffer<'l> {
    /// Copy encoded request bytes into a NUL-terminated buffer.
    pub(crate) fn new(
        operation: Operation,
        bytes: Vec<u8>,
        ledger: &'l BufferLedger,
    ) -> Result<Self> {
        let data = CString::new(bytes).map_err(|e| Error::Encoding {
            operation,
            message: format!("request contains a NUL byte at offset {}", e.nul_position()),
        })?;
        ledger.host_allocated.fetch_add(1, Ordering::Relaxed);
        trace!(
            operation = %operation,
            bytes = data.as_bytes().len(),
            "allocated request buffer"
        );
        Ok(Self {
            data,
            operation,
            ledger,
        })
    }

    /// Pointer for the duration of a boundary call. Valid while `self` lives.
    pub(crate) fn as_ptr(&self) -> *const c_char {
        self.data.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.data.as_bytes().len()
    }
}

impl Drop for HostBuffer<'_> {
    fn drop(&mut self) {
        self.ledger.host_released.fetch_add(1, Ordering::Relaxed);
        trace!(operation = %self.operation, "released request buffer");
    }
}

/// A result buffer owned by the foreign runtime.
pub(crate) struct ForeignBuffer<'r, R: ForeignRuntime + ?Sized> {
    ptr: NonNull<c_char>,
    runtime: &'r R,
    operation: Operation,
    ledger: &'r BufferLedger,
}

impl<'r, R: ForeignRuntime + ?Sized> ForeignBuffer<'r, R> {
    /// Take ownership of a pointer returned by `runtime`.
    ///
    /// Returns `None` for the null failure sentinel; there is nothing to
    /// release in that case.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live result of `runtime` that nobody else
    /// will free.
    pub(crate) unsafe fn from_raw(
        runtime: &'r R,
        ptr: *mut c_char,
        operation: Operation,
        ledger: &'r BufferLedger,
    ) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        ledger.foreign_received.fetch_add(1, Ordering::Relaxed);
        Some(Self {
            ptr,
            runtime,
            operation,
            ledger,
        })
    }

    /// Copy the contents, without the terminator, into host memory.
    pub(crate) fn to_vec(&self) -> Vec<u8> {
        // Safety: the runtime guarantees a NUL-terminated buffer that stays
        // valid until free_result, which only our Drop calls.
        let bytes = unsafe { CStr::from_ptr(self.ptr.as_ptr()) }.to_bytes().to_vec();
        trace!(operation = %self.operation, bytes = bytes.len(), "copied foreign result");
        bytes
    }
}

impl<R: ForeignRuntime + ?Sized> Drop for ForeignBuffer<'_, R> {
    fn drop(&mut self) {
        // Safety: the pointer came from this runtime and is freed only here.
        unsafe { self.runtime.free_result(self.ptr.as_ptr()) };
        self.ledger.foreign_released.fetch_add(1, Ordering::Relaxed);
        trace!(operation = %self.operation, "released foreign result");
    }
}
