use jtrace_jdwp::JdwpError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraceError>;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("compilation of the provided Java source failed with the following messages:\n{diagnostics}")]
    Compilation { diagnostics: String },

    #[error("{0}")]
    AmbiguousEntryPoint(String),

    #[error("failed to launch debuggee: {0}")]
    Launch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("debugger protocol error: {0}")]
    Protocol(#[from] JdwpError),
}
