//! Crate-level error type.
//!
//! Header-level failures stay in [`HeaderError`]; everything an operation can
//! report to its caller is an [`Error`].  Nothing is retried internally.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::header::HeaderError;

pub type Result<T> = std::result::Result<T, Error>;

/// Which header variant was expected or found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Master,
    Slave,
}

impl std::fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HeaderKind::Master => "master",
            HeaderKind::Slave  => "slave",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Index serialization error: {0}")]
    Index(#[from] serde_json::Error),

    #[error("The stream does not start with a REFIS header")]
    NoHeader,

    #[error("Expected a {expected} header but found a {found} header")]
    WrongHeaderKind { expected: HeaderKind, found: HeaderKind },

    #[error("Data error: {0}")]
    DataCorruption(String),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Id {0} is not in the index")]
    UnknownId(Uuid),

    #[error("The nil id is not a valid file id")]
    InvalidId,

    #[error("File {id} is incomplete and cannot be restored ({found} block(s) found)")]
    Incomplete { id: Uuid, found: usize },

    #[error("Failed to set file attributes: {0}")]
    AttributeRestore(io::Error),
}

pub mod exit_code {
    pub const SUCCESS:      i32 = 0;
    pub const EXISTS:       i32 = 1;
    pub const NO_HEADER:    i32 = 2;
    pub const WRONG_HEADER: i32 = 3;
    pub const DATA_ERROR:   i32 = 4;
    pub const ATTR_FAIL:    i32 = 5;
    pub const NOT_FOUND:    i32 = 6;
    pub const INVALID_ID:   i32 = 7;
    pub const INCOMPLETE:   i32 = 8;
    pub const PARAM_FAIL:   i32 = 255;
}

impl Error {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Io(e) => match e.kind() {
                io::ErrorKind::NotFound      => exit_code::NOT_FOUND,
                io::ErrorKind::AlreadyExists => exit_code::EXISTS,
                _                            => exit_code::DATA_ERROR,
            },
            Error::Header(_)
            | Error::Index(_)
            | Error::DataCorruption(_)      => exit_code::DATA_ERROR,
            Error::NoHeader                 => exit_code::NO_HEADER,
            Error::WrongHeaderKind { .. }   => exit_code::WRONG_HEADER,
            Error::DestinationExists(_)     => exit_code::EXISTS,
            // An id that parses but is absent from the index is reported the
            // same way as a malformed one.
            Error::UnknownId(_)
            | Error::InvalidId              => exit_code::INVALID_ID,
            Error::Incomplete { .. }        => exit_code::INCOMPLETE,
            Error::AttributeRestore(_)      => exit_code::ATTR_FAIL,
        }
    }
}
