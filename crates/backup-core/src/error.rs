use std::fmt;
use std::io;
use thiserror::Error;

/// Faults on the byte stream itself.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed while reading a {expected}-byte field")]
    ConnectionClosed { expected: usize },
    #[error("file name of {0} bytes does not fit the length field")]
    NameTooLong(usize),
}

impl WireError {
    /// Map an `UnexpectedEof` from `read_exact` to a short-read error.
    pub(crate) fn from_read(err: io::Error, expected: usize) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed { expected }
        } else {
            Self::Io(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
    #[error("file of {0} bytes exceeds the 4-byte size field")]
    TooLarge(u64),
    #[error("payload incomplete: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Where in the session a transport fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceiveHeader,
    ReceivePayload,
    SendHeader,
    SendPayload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ReceiveHeader => "receive header",
            Stage::ReceivePayload => "receive payload",
            Stage::SendHeader => "send header",
            Stage::SendPayload => "send payload",
        };
        f.write_str(name)
    }
}

/// A session aborted by a transport fault.
#[derive(Error, Debug)]
#[error("session aborted during {stage}: {source}")]
pub struct SessionError {
    pub stage: Stage,
    #[source]
    pub source: WireError,
}

impl SessionError {
    pub(crate) fn at(stage: Stage) -> impl FnOnce(WireError) -> Self {
        move |source| Self { stage, source }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
