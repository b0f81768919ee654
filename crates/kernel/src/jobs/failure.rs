//! Captured failure of a job runner.

use std::any::Any;
use std::error::Error;
use std::fmt;

use crate::joblog::ExceptionInfo;

/// Failure detail captured from a runner.
///
/// Any `std::error::Error` converts into a `JobFailure` with `?`, keeping
/// its type name, display, debug rendering and cause chain as separate
/// fields. `anyhow` errors go through [`JobFailure::from_anyhow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub class: String,
    pub message: String,
    pub repr: String,
    pub traceback: String,
}

impl JobFailure {
    /// A plain failure with no underlying error value.
    pub fn msg(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            class: "JobFailure".to_string(),
            repr: format!("JobFailure({message:?})"),
            traceback: message.clone(),
            message,
        }
    }

    pub fn from_anyhow(err: anyhow::Error) -> Self {
        Self {
            class: "anyhow::Error".to_string(),
            message: err.to_string(),
            repr: format!("{err:?}"),
            traceback: chain(err.chain()),
        }
    }

    /// Failure from a panic payload, as returned by `JoinError::into_panic`.
    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            class: "panic".to_string(),
            repr: format!("panic({message:?})"),
            traceback: format!("runner panicked: {message}"),
            message,
        }
    }
}

impl<E> From<E> for JobFailure
where
    E: Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let mut causes = vec![err.to_string()];
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            class: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            repr: format!("{err:?}"),
            traceback: causes.join("\ncaused by: "),
        }
    }
}

impl From<JobFailure> for ExceptionInfo {
    fn from(f: JobFailure) -> Self {
        ExceptionInfo {
            class: f.class,
            message: f.message,
            repr: f.repr,
            traceback: f.traceback,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

fn chain<'a>(errors: impl Iterator<Item = &'a (dyn Error + 'static)>) -> String {
    errors
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\ncaused by: ")
}
