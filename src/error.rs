use std::io;

use thiserror::Error;

use crate::id::Fd;

/// Everything that can go wrong driving the dispatcher.
#[derive(Debug, Error)]
pub enum Error {
    /// `sleep` was given an interval under 1ms, or `io` an empty interest set.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A ready file descriptor had no corresponding entry in `goto`. This is
    /// an invariant violation, not a recoverable condition — it means a
    /// registration was dropped without being unregistered from the selector.
    #[error("missing registration for fd {0}: dispatcher invariant violated")]
    MissingRegistration(Fd),

    /// The underlying selector syscall failed, or the management selector
    /// reported a nonzero error code.
    #[error("selector error: {0}")]
    Os(#[source] io::Error),

    /// `run()` was called while the dispatcher was not `Stopped`.
    #[error("run() requires the dispatcher to be Stopped, found {0:?}")]
    NotStopped(crate::dispatcher::State),

    /// `stop()` was called while the dispatcher was not `Running`.
    #[error("stop() requires the dispatcher to be Running, found {0:?}")]
    NotRunning(crate::dispatcher::State),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Os(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
