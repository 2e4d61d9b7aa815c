//! Host memory statistics around boundary calls.
//!
//! Rust has no collector to ask for statistics, so the numbers come from
//! [`CountingAllocator`], a pass-through global allocator that keeps a few
//! relaxed atomic counters. A binary opts in with:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOC: chat_templates::CountingAllocator = chat_templates::CountingAllocator::new();
//! ```
//!
//! Without it every snapshot reads zero. Either way, taking a snapshot is a
//! handful of atomic loads and never influences the call being observed.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::error::Operation;

/// Target for allocator snapshot events, so they can be filtered on their own.
pub const MEM_STATS_TARGET: &str = "chat_templates::mem_stats";

static LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
static TOTAL_BYTES: AtomicU64 = AtomicU64::new(0);
static PEAK_BYTES: AtomicU64 = AtomicU64::new(0);
static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static DEALLOCATIONS: AtomicU64 = AtomicU64::new(0);

/// A point-in-time view of host allocator activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemStats {
    /// Bytes currently allocated.
    pub live_bytes: u64,
    /// Bytes allocated since startup, never decreasing.
    pub total_bytes: u64,
    /// Highest value `live_bytes` has reached.
    pub peak_bytes: u64,
    pub allocations: u64,
    pub deallocations: u64,
}

impl MemStats {
    /// Read the current counters.
    pub fn snapshot() -> Self {
        Self {
            live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
            total_bytes: TOTAL_BYTES.load(Ordering::Relaxed),
            peak_bytes: PEAK_BYTES.load(Ordering::Relaxed),
            allocations: ALLOCATIONS.load(Ordering::Relaxed),
            deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
        }
    }
}

/// A global allocator that forwards to `A` and counts what passes through.
#[derive(Debug, Default)]
pub struct CountingAllocator<A = System> {
    inner: A,
}

impl CountingAllocator<System> {
    pub const fn new() -> Self {
        Self { inner: System }
    }
}

impl<A> CountingAllocator<A> {
    /// Count allocations made through another allocator.
    pub const fn wrap(inner: A) -> Self {
        Self { inner }
    }
}

fn record_alloc(size: usize) {
    let size = size as u64;
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    TOTAL_BYTES.fetch_add(size, Ordering::Relaxed);
    let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_BYTES.fetch_max(live, Ordering::Relaxed);
}

fn record_dealloc(size: usize) {
    DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    LIVE_BYTES.fetch_sub(size as u64, Ordering::Relaxed);
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        record_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            record_dealloc(layout.size());
            record_alloc(new_size);
        }
        new_ptr
    }
}

/// Which side of a boundary call a snapshot was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Before,
    After,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

/// Emit a snapshot at TRACE level.
pub(crate) fn trace_mem_stats(operation: Operation, phase: Phase) {
    let stats = MemStats::snapshot();
    trace!(
        target: MEM_STATS_TARGET,
        operation = %operation,
        phase = phase.as_str(),
        live_bytes = stats.live_bytes,
        total_bytes = stats.total_bytes,
        peak_bytes = stats.peak_bytes,
        allocations = stats.allocations,
        deallocations = stats.deallocations,
        "memory stats"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_allocations_through_wrapper() {
        let allocator = CountingAllocator::new();
        let layout = Layout::from_size_align(256, 8).unwrap();

        let before = MemStats::snapshot();
        unsafe {
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            let mid = MemStats::snapshot();
            assert!(mid.allocations >= before.allocations + 1);
            assert!(mid.total_bytes >= before.total_bytes + 256);
            assert!(mid.peak_bytes >= 256);

            let grown = allocator.realloc(ptr, layout, 512);
            assert!(!grown.is_null());
            allocator.dealloc(grown, Layout::from_size_align(512, 8).unwrap());
        }
        let after = MemStats::snapshot();
        assert!(after.deallocations >= before.deallocations + 2);
        assert!(after.total_bytes >= before.total_bytes + 768);
    }

    #[test]
    fn trace_without_subscriber_is_harmless() {
        trace_mem_stats(Operation::RenderChatTemplate, Phase::Before);
        trace_mem_stats(Operation::RenderChatTemplate, Phase::After);
    }
}
