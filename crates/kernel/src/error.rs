//! Error classification shared by the kernel subsystems.
//!
//! Every subsystem error enum exposes `kind()` so an outer surface (HTTP,
//! CLI) can map failures without matching on individual variants.

use std::fmt;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The addressed job, run, plugin or key does not exist.
    NotFound,

    /// The caller supplied something malformed (e.g. a bad reference).
    Validation,

    /// Anything else: storage failures, lifecycle failures, bugs.
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status code for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
