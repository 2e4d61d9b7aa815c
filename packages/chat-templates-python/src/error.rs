use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// CPython hosts one interpreter per process, so only one runtime may
    /// drive it.
    #[error("a PythonRuntime already exists in this process")]
    AlreadyClaimed,

    #[error("invalid python config: {field} is empty")]
    EmptyName { field: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            Error::EmptyName { field: "module" }.to_string(),
            "invalid python config: module is empty"
        );
        assert!(Error::AlreadyClaimed.to_string().contains("already exists"));
    }
}
