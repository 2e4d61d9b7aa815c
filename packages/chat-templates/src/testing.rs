//! A scripted, instrumented [`ForeignRuntime`] for tests.
//!
//! [`FakeRuntime`] answers boundary calls with closures and counts
//! everything it does: lifecycle calls, boundary calls, result buffers handed
//! out and result buffers freed. Result buffers come from its own allocator
//! family (`CString::into_raw` / `CString::from_raw`), so a result released
//! through anything other than `free_result` shows up as a leak in
//! [`FakeStats`].

use std::ffi::{c_char, c_int, CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::foreign::ForeignRuntime;

type Handler = Box<dyn Fn(&str) -> Option<Vec<u8>> + Send + Sync>;

/// Counters kept by a [`FakeRuntime`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeStats {
    pub interpreter_starts: u64,
    pub interpreter_stops: u64,
    pub module_inits: u64,
    pub module_cleanups: u64,
    /// Calls to render, fetch_template and clear_caches.
    pub boundary_calls: u64,
    /// Result buffers handed to the host.
    pub allocated: u64,
    /// Result buffers returned through `free_result`.
    pub freed: u64,
}

impl FakeStats {
    /// Result buffers the host has not given back.
    /// A double free shows up as `freed > allocated`, not as an underflow.
    pub fn outstanding(&self) -> u64 {
        self.allocated.saturating_sub(self.freed)
    }
}

#[derive(Default)]
struct Counters {
    interpreter_starts: AtomicU64,
    interpreter_stops: AtomicU64,
    module_inits: AtomicU64,
    module_cleanups: AtomicU64,
    boundary_calls: AtomicU64,
    allocated: AtomicU64,
    freed: AtomicU64,
}

/// A fake interpreter whose entry points are closures.
pub struct FakeRuntime {
    render: Handler,
    fetch: Handler,
    init_status: c_int,
    panic_on_init: bool,
    clear_succeeds: bool,
    counters: Counters,
    requests: Mutex<Vec<String>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// A runtime that renders nothing, resolves an empty template and
    /// clears caches successfully.
    pub fn new() -> Self {
        Self {
            render: Box::new(|_| {
                Some(br#"{"rendered_chats":[],"generation_indices":[]}"#.to_vec())
            }),
            fetch: Box::new(|_| Some(b"{}".to_vec())),
            init_status: 0,
            panic_on_init: false,
            clear_succeeds: true,
            counters: Counters::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A runtime whose render joins `role:content` pairs with `|`, in the
    /// order the request listed them.
    pub fn echo() -> Self {
        Self::new().with_render(|request| {
            let json: serde_json::Value = serde_json::from_str(request).ok()?;
            let rendered = json
                .get("messages")?
                .as_array()?
                .iter()
                .map(|m| {
                    format!(
                        "{}:{}",
                        m.get("role").and_then(|r| r.as_str()).unwrap_or(""),
                        m.get("content").and_then(|c| c.as_str()).unwrap_or("")
                    )
                })
                .collect::<Vec<_>>()
                .join("|");
            serde_json::to_vec(&serde_json::json!({
                "rendered_chats": [rendered],
                "generation_indices": [],
            }))
            .ok()
        })
    }

    /// Answer render calls with `handler`. `None` is the failure sentinel.
    pub fn with_render<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.render = Box::new(handler);
        self
    }

    /// Answer fetch calls with `handler`. `None` is the failure sentinel.
    pub fn with_fetch<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.fetch = Box::new(handler);
        self
    }

    /// Make module initialization report `status`.
    pub fn with_init_status(mut self, status: c_int) -> Self {
        self.init_status = status;
        self
    }

    /// Make module initialization panic.
    pub fn panic_on_init(mut self) -> Self {
        self.panic_on_init = true;
        self
    }

    /// Make clear_caches return the failure sentinel.
    pub fn failing_clear_caches(mut self) -> Self {
        self.clear_succeeds = false;
        self
    }

    pub fn stats(&self) -> FakeStats {
        let c = &self.counters;
        FakeStats {
            interpreter_starts: c.interpreter_starts.load(Ordering::SeqCst),
            interpreter_stops: c.interpreter_stops.load(Ordering::SeqCst),
            module_inits: c.module_inits.load(Ordering::SeqCst),
            module_cleanups: c.module_cleanups.load(Ordering::SeqCst),
            boundary_calls: c.boundary_calls.load(Ordering::SeqCst),
            allocated: c.allocated.load(Ordering::SeqCst),
            freed: c.freed.load(Ordering::SeqCst),
        }
    }

    /// Every request payload received, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    unsafe fn respond(&self, handler: &Handler, request: *const c_char) -> *mut c_char {
        self.counters.boundary_calls.fetch_add(1, Ordering::SeqCst);
        let request = CStr::from_ptr(request).to_string_lossy().into_owned();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        match handler(&request) {
            Some(bytes) => self.allocate(bytes),
            None => std::ptr::null_mut(),
        }
    }

    fn allocate(&self, bytes: Vec<u8>) -> *mut c_char {
        match CString::new(bytes) {
            Ok(result) => {
                self.counters.allocated.fetch_add(1, Ordering::SeqCst);
                result.into_raw()
            }
            Err(_) => std::ptr::null_mut(),
        }
    }
}

unsafe impl ForeignRuntime for FakeRuntime {
    fn start_interpreter(&self) {
        self.counters
            .interpreter_starts
            .fetch_add(1, Ordering::SeqCst);
    }

    fn init_module(&self) -> c_int {
        self.counters.module_inits.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_init {
            panic!("module init panicked");
        }
        self.init_status
    }

    unsafe fn render(&self, request: *const c_char) -> *mut c_char {
        self.respond(&self.render, request)
    }

    unsafe fn fetch_template(&self, request: *const c_char) -> *mut c_char {
        self.respond(&self.fetch, request)
    }

    fn clear_caches(&self) -> *mut c_char {
        self.counters.boundary_calls.fetch_add(1, Ordering::SeqCst);
        if self.clear_succeeds {
            self.allocate(b"{}".to_vec())
        } else {
            std::ptr::null_mut()
        }
    }

    unsafe fn free_result(&self, result: *mut c_char) {
        drop(CString::from_raw(result));
        self.counters.freed.fetch_add(1, Ordering::SeqCst);
    }

    fn cleanup_module(&self) {
        self.counters.module_cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_interpreter(&self) {
        self.counters
            .interpreter_stops
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outstanding_counts_unreleased_results() {
        let runtime = FakeRuntime::new();
        let first = runtime.clear_caches();
        let second = runtime.clear_caches();
        assert_eq!(runtime.stats().outstanding(), 2);

        unsafe {
            runtime.free_result(first);
            runtime.free_result(second);
        }
        assert_eq!(runtime.stats().outstanding(), 0);
    }

    #[test]
    fn outstanding_survives_excess_frees() {
        let stats = FakeStats {
            allocated: 1,
            freed: 2,
            ..FakeStats::default()
        };
        assert_eq!(stats.outstanding(), 0);
        assert!(stats.freed > stats.allocated);
    }
}
