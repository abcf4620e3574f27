use std::fmt::{Display, Formatter};
use std::io;

use crate::address::Address;

/// Everything that can go wrong while listening for, or reading, a request.
#[derive(Debug)]
pub enum Error {
    /// The listener could not claim its address. Fatal at startup.
    Bind(Address, io::Error),
    /// The connection failed while a request was being read or a response written.
    /// Only the affected connection is dropped.
    Transport(io::Error),
    /// The peer sent something that is not an HTTP/1.x request.
    Malformed(String),
}

impl Error {
    pub fn malformed<S: Into<String>>(msg: S) -> Error {
        Error::Malformed(msg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Bind(address, err) => write!(f, "cannot bind to {}: {}", address, err),
            Error::Transport(err) => write!(f, "transport error: {}", err),
            Error::Malformed(msg) => write!(f, "malformed request: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind(_, err) | Error::Transport(err) => Some(err),
            Error::Malformed(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(err)
    }
}
