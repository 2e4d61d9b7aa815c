use std::ffi::{c_char, c_int, CStr};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use chat_templates::ForeignRuntime;
use pyo3::exceptions::PyRuntimeError;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyList, PyModule};
use tracing::{debug, error, warn};

use crate::alloc;
use crate::config::PythonConfig;
use crate::error::{Error, Result};

/// Init status: the configured directories could not be added to `sys.path`.
pub const PYTHON_PATH_FAILED: c_int = 1;
/// Init status: the template module failed to import.
pub const MODULE_IMPORT_FAILED: c_int = 2;
/// Init status: the module lacks one of the configured functions.
pub const FUNCTION_MISSING: c_int = 3;

static CLAIMED: AtomicBool = AtomicBool::new(false);

/// A [`ForeignRuntime`] backed by the process's CPython interpreter.
///
/// Boundary calls take the GIL, so concurrent callers are serialized by the
/// interpreter itself. An interpreter that was already running when
/// `start_interpreter` was called is left running at `stop_interpreter`.
pub struct PythonRuntime {
    config: PythonConfig,
    module: RwLock<Option<Py<PyModule>>>,
    owns_interpreter: AtomicBool,
}

impl PythonRuntime {
    pub fn new(config: PythonConfig) -> Result<Self> {
        config.validate()?;
        if CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyClaimed);
        }
        Ok(Self {
            config,
            module: RwLock::new(None),
            owns_interpreter: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PythonConfig {
        &self.config
    }

    fn module(&self, py: Python<'_>) -> Option<Py<PyModule>> {
        self.module
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|module| module.clone_ref(py))
    }

    fn extend_path(&self, py: Python<'_>) -> PyResult<()> {
        let path = py
            .import("sys")?
            .getattr("path")?
            .downcast_into::<PyList>()?;
        for dir in self.config.python_path.iter().rev() {
            let dir = dir.to_string_lossy();
            if !path.contains(&*dir)? {
                path.insert(0, &*dir)?;
            }
        }
        Ok(())
    }

    fn invoke<'py>(
        &self,
        py: Python<'py>,
        function: &str,
        argument: Option<&str>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let module = self
            .module(py)
            .ok_or_else(|| PyRuntimeError::new_err("chat template module is not loaded"))?
            .into_bound(py);
        let function = module.getattr(function)?;
        match argument {
            Some(argument) => function.call1((argument,)),
            None => function.call0(),
        }
    }

    fn call_with_request(&self, function: &str, request: &CStr) -> *mut c_char {
        let Ok(request) = request.to_str() else {
            error!(function, "request is not valid UTF-8");
            return ptr::null_mut();
        };
        Python::with_gil(|py| {
            match self
                .invoke(py, function, Some(request))
                .and_then(|result| result.extract::<String>())
            {
                Ok(result) => {
                    let buffer = alloc::copy_out(result.as_bytes());
                    if buffer.is_null() {
                        error!(
                            function,
                            bytes = result.len(),
                            "result could not be copied out"
                        );
                    }
                    buffer
                }
                Err(err) => {
                    log_exception(py, function, &err);
                    ptr::null_mut()
                }
            }
        })
    }
}

/// Log the exception type only. Messages can quote request fields.
fn log_exception(py: Python<'_>, function: &str, err: &PyErr) {
    let kind = err
        .get_type(py)
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    error!(function, exception = %kind, "python call raised");
}

// Safety: results come from `alloc::copy_out` and are only released by
// `free_result`; every Python call holds the GIL.
unsafe impl ForeignRuntime for PythonRuntime {
    fn start_interpreter(&self) {
        // Safety: Py_IsInitialized may be called at any time. Initialization
        // happens at most once per running interpreter, after which the GIL
        // is released for `Python::with_gil` callers.
        unsafe {
            if ffi::Py_IsInitialized() != 0 {
                debug!("python interpreter already running");
                self.owns_interpreter.store(false, Ordering::SeqCst);
                return;
            }
            ffi::Py_InitializeEx(0);
            ffi::PyEval_SaveThread();
        }
        self.owns_interpreter.store(true, Ordering::SeqCst);
        debug!("python interpreter started");
    }

    fn init_module(&self) -> c_int {
        let name = self.config.module.as_str();
        Python::with_gil(|py| {
            if let Err(err) = self.extend_path(py) {
                log_exception(py, "sys.path", &err);
                return PYTHON_PATH_FAILED;
            }
            let module = match PyModule::import(py, name) {
                Ok(module) => module,
                Err(err) => {
                    log_exception(py, name, &err);
                    return MODULE_IMPORT_FAILED;
                }
            };
            for function in self.config.functions() {
                if !module.hasattr(function).unwrap_or(false) {
                    error!(module = name, function, "function not found in module");
                    return FUNCTION_MISSING;
                }
            }
            *self
                .module
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(module.unbind());
            debug!(module = name, "chat template module loaded");
            0
        })
    }

    unsafe fn render(&self, request: *const c_char) -> *mut c_char {
        self.call_with_request(&self.config.render_fn, CStr::from_ptr(request))
    }

    unsafe fn fetch_template(&self, request: *const c_char) -> *mut c_char {
        self.call_with_request(&self.config.fetch_fn, CStr::from_ptr(request))
    }

    fn clear_caches(&self) -> *mut c_char {
        let function = self.config.clear_caches_fn.as_str();
        Python::with_gil(|py| match self.invoke(py, function, None) {
            Ok(result) => {
                let body = result
                    .extract::<String>()
                    .unwrap_or_else(|_| "{}".to_string());
                alloc::copy_out(body.as_bytes())
            }
            Err(err) => {
                log_exception(py, function, &err);
                ptr::null_mut()
            }
        })
    }

    unsafe fn free_result(&self, result: *mut c_char) {
        alloc::release(result);
    }

    fn cleanup_module(&self) {
        Python::with_gil(|_py| {
            let module = self
                .module
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if module.is_some() {
                debug!(module = %self.config.module, "chat template module released");
            }
        });
    }

    fn stop_interpreter(&self) {
        if !self.owns_interpreter.swap(false, Ordering::SeqCst) {
            debug!("python interpreter not started here; leaving it running");
            return;
        }
        // Safety: the interpreter was started by this runtime and every
        // reference it held was dropped in cleanup_module.
        let status = unsafe {
            ffi::PyGILState_Ensure();
            ffi::Py_FinalizeEx()
        };
        if status != 0 {
            warn!(status, "python interpreter finalized with errors");
        } else {
            debug!("python interpreter stopped");
        }
    }
}

impl Drop for PythonRuntime {
    fn drop(&mut self) {
        let module = self
            .module
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(module) = module {
            // Safety: Py_IsInitialized may be called at any time.
            if unsafe { ffi::Py_IsInitialized() } != 0 {
                Python::with_gil(|_py| drop(module));
            } else {
                // The interpreter that owned it is gone.
                std::mem::forget(module);
            }
        }
        CLAIMED.store(false, Ordering::SeqCst);
    }
}
