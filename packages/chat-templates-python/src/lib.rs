//! CPython backend for `chat-templates`.
//!
//! [`PythonRuntime`] embeds the interpreter through `pyo3`, imports the chat
//! template module named in [`PythonConfig`] and forwards each boundary call
//! to one of its functions as a JSON string:
//!
//! ```rust,ignore
//! use chat_templates::{ChatTemplateProcessor, ProcessorConfig};
//! use chat_templates_python::{PythonConfig, PythonRuntime};
//!
//! let runtime = PythonRuntime::new(
//!     PythonConfig::default().with_python_path("/opt/chat_templates"),
//! )?;
//! let processor = ChatTemplateProcessor::new(runtime, ProcessorConfig::default());
//! processor.initialize()?;
//! ```
//!
//! Building this crate links against libpython, so it is left out of the
//! workspace's default members.

mod alloc;
mod config;
mod error;
mod runtime;

pub use config::PythonConfig;
pub use error::{Error, Result};
pub use runtime::{PythonRuntime, FUNCTION_MISSING, MODULE_IMPORT_FAILED, PYTHON_PATH_FAILED};
