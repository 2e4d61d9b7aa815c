//! The foreign entry points the bridge calls.

use std::ffi::{c_char, c_int};
use std::sync::Arc;

/// Entry points exposed by an embedded interpreter's template module.
///
/// Requests cross as NUL-terminated UTF-8 JSON. Results come back either as
/// null (failure) or as a NUL-terminated buffer allocated by the runtime.
/// The host releases such a buffer by passing it to
/// [`free_result`](ForeignRuntime::free_result), never to its own allocator.
///
/// Implementations serialize execution internally (an interpreter lock or
/// equivalent). The bridge calls these methods from any thread and holds no
/// lock of its own across them.
///
/// # Safety
///
/// Implementors guarantee that every non-null pointer returned from
/// [`render`](ForeignRuntime::render),
/// [`fetch_template`](ForeignRuntime::fetch_template) or
/// [`clear_caches`](ForeignRuntime::clear_caches) points to a NUL-terminated
/// buffer that stays valid and unaliased until it is handed back to
/// [`free_result`](ForeignRuntime::free_result).
pub unsafe trait ForeignRuntime: Send + Sync {
    /// Start the interpreter.
    ///
    /// Not idempotent: the bridge calls this at most once per lifecycle.
    fn start_interpreter(&self);

    /// Load and initialize the template module. Zero means success.
    fn init_module(&self) -> c_int;

    /// Render a chat template.
    ///
    /// # Safety
    ///
    /// `request` must point to a NUL-terminated buffer that outlives the call.
    unsafe fn render(&self, request: *const c_char) -> *mut c_char;

    /// Resolve a model's chat template.
    ///
    /// # Safety
    ///
    /// `request` must point to a NUL-terminated buffer that outlives the call.
    unsafe fn fetch_template(&self, request: *const c_char) -> *mut c_char;

    /// Drop every cache held by the module. Returns a non-null sentinel on
    /// success, which must be released like any other result.
    fn clear_caches(&self) -> *mut c_char;

    /// Release a buffer produced by this runtime.
    ///
    /// # Safety
    ///
    /// `result` must have been returned by this runtime and not yet freed.
    unsafe fn free_result(&self, result: *mut c_char);

    /// Drop the module and everything it cached.
    fn cleanup_module(&self);

    /// Stop the interpreter.
    fn stop_interpreter(&self);
}

// Blanket implementations for shared and boxed runtimes

unsafe impl<T: ForeignRuntime + ?Sized> ForeignRuntime for Arc<T> {
    fn start_interpreter(&self) {
        (**self).start_interpreter()
    }

    fn init_module(&self) -> c_int {
        (**self).init_module()
    }

    unsafe fn render(&self, request: *const c_char) -> *mut c_char {
        (**self).render(request)
    }

    unsafe fn fetch_template(&self, request: *const c_char) -> *mut c_char {
        (**self).fetch_template(request)
    }

    fn clear_caches(&self) -> *mut c_char {
        (**self).clear_caches()
    }

    unsafe fn free_result(&self, result: *mut c_char) {
        (**self).free_result(result)
    }

    fn cleanup_module(&self) {
        (**self).cleanup_module()
    }

    fn stop_interpreter(&self) {
        (**self).stop_interpreter()
    }
}

unsafe impl<T: ForeignRuntime + ?Sized> ForeignRuntime for Box<T> {
    fn start_interpreter(&self) {
        self.as_ref().start_interpreter()
    }

    fn init_module(&self) -> c_int {
        self.as_ref().init_module()
    }

    unsafe fn render(&self, request: *const c_char) -> *mut c_char {
        self.as_ref().render(request)
    }

    unsafe fn fetch_template(&self, request: *const c_char) -> *mut c_char {
        self.as_ref().fetch_template(request)
    }

    fn clear_caches(&self) -> *mut c_char {
        self.as_ref().clear_caches()
    }

    unsafe fn free_result(&self, result: *mut c_char) {
        self.as_ref().free_result(result)
    }

    fn cleanup_module(&self) {
        self.as_ref().cleanup_module()
    }

    fn stop_interpreter(&self) {
        self.as_ref().stop_interpreter()
    }
}

/// The two entry points that take a request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    Render,
    FetchTemplate,
}

impl Entry {
    /// # Safety
    ///
    /// Same contract as [`ForeignRuntime::render`].
    pub(crate) unsafe fn invoke<R: ForeignRuntime + ?Sized>(
        self,
        runtime: &R,
        request: *const c_char,
    ) -> *mut c_char {
        match self {
            Entry::Render => runtime.render(request),
            Entry::FetchTemplate => runtime.fetch_template(request),
        }
    }
}
