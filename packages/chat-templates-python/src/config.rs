use std::path::PathBuf;

use crate::error::{Error, Result};

/// Where to find the chat template module and what to call in it.
#[derive(Debug, Clone)]
pub struct PythonConfig {
    /// Module imported at init.
    pub module: String,

    pub render_fn: String,
    pub fetch_fn: String,
    pub clear_caches_fn: String,

    /// Directories prepended to `sys.path` before the import, first entry
    /// searched first.
    pub python_path: Vec<PathBuf>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            module: "chat_template_wrapper".to_string(),
            render_fn: "render_jinja_template".to_string(),
            fetch_fn: "get_model_chat_template".to_string(),
            clear_caches_fn: "clear_caches".to_string(),
            python_path: Vec::new(),
        }
    }
}

impl PythonConfig {
    pub fn with_python_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.python_path.push(dir.into());
        self
    }

    pub(crate) fn functions(&self) -> [&str; 3] {
        [&self.render_fn, &self.fetch_fn, &self.clear_caches_fn]
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let names = [
            ("module", &self.module),
            ("render_fn", &self.render_fn),
            ("fetch_fn", &self.fetch_fn),
            ("clear_caches_fn", &self.clear_caches_fn),
        ];
        match names.iter().find(|(_, name)| name.is_empty()) {
            Some((field, _)) => Err(Error::EmptyName { field: *field }),
            None => Ok(()),
        }
    }
}
