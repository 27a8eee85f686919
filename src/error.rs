use std::fmt;

use itertools::Itertools;
use thiserror::Error;

/// The fixed error taxonomy of the engine.
///
/// Fatal storage errors (`Io`, `Corrupt`, `PgOutOfRange`) force the
/// transaction to abort and may leave the pager read-only. Resource
/// exhaustion (`NoMem`, `PagerFull`, `TxnFull`, `DpgtFull`) aborts the
/// transaction but the pager stays usable. The rest indicate caller bugs
/// or expected operational limits.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("io failure")]
    Io,
    #[error("corrupt database")]
    Corrupt,
    #[error("out of memory")]
    NoMem,
    #[error("buffer pool is full of pinned pages")]
    PagerFull,
    #[error("transaction table is full")]
    TxnFull,
    #[error("dirty page table is full")]
    DpgtFull,
    #[error("page number out of range")]
    PgOutOfRange,
    #[error("no such transaction")]
    NoTxn,
    #[error("rope tree page stack overflow")]
    RptreePageStackOverflow,
    #[error("rope tree cursor in invalid state")]
    RptreeInvalid,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("arithmetic overflow")]
    Arith,
    #[error("lock wait timed out, presumed deadlock")]
    Deadlock,
}

/// Maximum number of context messages carried by one error.
const TRAIL_MAX: usize = 8;

/// An engine error: a kind plus a bounded trail of human messages, the
/// innermost first.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    trail: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: &str) -> Self {
        Self {
            kind,
            trail: vec![msg.to_string()],
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Append a context message while the error bubbles up.
    pub fn ctx(mut self, msg: &str) -> Self {
        if self.trail.len() < TRAIL_MAX {
            self.trail.push(msg.to_string());
        }
        self
    }

    pub fn show_backtrace(&self) {
        let bt = backtrace::Backtrace::new();
        log::error!("{}\nbacktrace:\n{:?}", self, bt);
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.trail.iter().join(": "))
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, &e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
