//! Error types for the chat template bridge.

use std::fmt;

use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// The boundary operation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Finalize,
    RenderChatTemplate,
    FetchChatTemplate,
    ClearCaches,
}

impl Operation {
    /// Stable name used in log fields and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::Finalize => "finalize",
            Operation::RenderChatTemplate => "render_chat_template",
            Operation::FetchChatTemplate => "fetch_chat_template",
            Operation::ClearCaches => "clear_caches",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`ChatTemplateProcessor`](crate::ChatTemplateProcessor).
///
/// No variant carries request or response payload text. Messages are built
/// from operation names, byte counts and parser positions only, so an error
/// can be logged even when the request held an access token.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was rejected before serialization.
    #[error("invalid {operation} request: {message}")]
    InvalidInput {
        operation: Operation,
        message: String,
    },

    /// The request could not be serialized into a boundary buffer.
    #[error("failed to encode {operation} request: {message}")]
    Encoding {
        operation: Operation,
        message: String,
    },

    /// The foreign entry point returned the failure sentinel. Nothing was
    /// produced.
    #[error("{operation} failed in the foreign runtime")]
    ForeignCallFailed { operation: Operation },

    /// The foreign entry point produced a result that did not decode.
    #[error("failed to decode {operation} response ({len} bytes): {message}")]
    Decoding {
        operation: Operation,
        len: usize,
        message: String,
    },

    /// The template module reported a non-zero status during startup.
    ///
    /// The interpreter was started before the module failed and is still
    /// running. [`finalize`](crate::ChatTemplateProcessor::finalize) must
    /// still be called to stop it.
    #[error("chat template module failed to initialize (status {status})")]
    ModuleInit { status: i32 },

    /// An operation ran outside the initialized window.
    #[error("{operation} called while the runtime is {state}")]
    NotInitialized {
        operation: Operation,
        state: LifecycleState,
    },

    /// `initialize` was called while a lifecycle was already in progress.
    #[error("runtime already {state}")]
    AlreadyInitialized { state: LifecycleState },

    /// The cache-clear entry point returned the failure sentinel.
    #[error("failed to clear chat template caches")]
    CacheClearFailed,
}

impl Error {
    /// The operation this error was raised by.
    pub fn operation(&self) -> Operation {
        match self {
            Error::InvalidInput { operation, .. }
            | Error::Encoding { operation, .. }
            | Error::ForeignCallFailed { operation }
            | Error::Decoding { operation, .. }
            | Error::NotInitialized { operation, .. } => *operation,
            Error::ModuleInit { .. } | Error::AlreadyInitialized { .. } => Operation::Initialize,
            Error::CacheClearFailed => Operation::ClearCaches,
        }
    }

    /// Build a decoding error from a serde_json failure without quoting the
    /// offending input.
    pub(crate) fn decoding(operation: Operation, len: usize, err: &serde_json::Error) -> Self {
        Error::Decoding {
            operation,
            len,
            message: describe_json_error(err),
        }
    }

    /// Serialization errors are raised by `Serialize` impls with fixed
    /// messages and carry no request data.
    pub(crate) fn encoding(operation: Operation, err: &serde_json::Error) -> Self {
        Error::Encoding {
            operation,
            message: err.to_string(),
        }
    }
}

/// serde_json messages can quote input fragments ("invalid type: string
/// \"...\""), so only the category and position survive.
fn describe_json_error(err: &serde_json::Error) -> String {
    let category = match err.classify() {
        serde_json::error::Category::Io => "io",
        serde_json::error::Category::Syntax => "syntax",
        serde_json::error::Category::Data => "data",
        serde_json::error::Category::Eof => "unexpected end of input",
    };
    if err.line() == 0 {
        format!("{} error", category)
    } else {
        format!(
            "{} error at line {} column {}",
            category,
            err.line(),
            err.column()
        )
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_display() {
        assert_eq!(
            Operation::RenderChatTemplate.to_string(),
            "render_chat_template"
        );
        assert_eq!(Operation::ClearCaches.to_string(), "clear_caches");
    }

    #[test]
    fn not_initialized_display() {
        let e = Error::NotInitialized {
            operation: Operation::FetchChatTemplate,
            state: LifecycleState::Finalized,
        };
        let display = e.to_string();
        assert!(display.contains("fetch_chat_template"));
        assert!(display.contains("finalized"));
    }

    #[test]
    fn decoding_error_omits_payload() {
        let payload = r#"{"chat_template": ["secret123"]}"#;
        let err = serde_json::from_str::<std::collections::BTreeMap<String, String>>(payload)
            .unwrap_err();
        let e = Error::decoding(Operation::FetchChatTemplate, payload.len(), &err);

        let display = e.to_string();
        assert!(display.contains("fetch_chat_template"));
        assert!(display.contains(&format!("{} bytes", payload.len())));
        assert!(display.contains("data error"));
        assert!(!display.contains("secret123"));
    }

    #[test]
    fn module_init_display() {
        let e = Error::ModuleInit { status: 3 };
        assert!(e.to_string().contains("status 3"));
        assert_eq!(e.operation(), Operation::Initialize);
    }

    #[test]
    fn cache_clear_operation() {
        assert_eq!(Error::CacheClearFailed.operation(), Operation::ClearCaches);
    }
}
