//! Error types surfaced by the pool.

use std::any::Any;
use std::fmt;
use std::panic;

use thiserror::Error;

/// Error returned when a submission is rejected synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The pool's ingress queue has been closed by `close_and_join`; no
    /// further work is accepted.
    #[error("global queue is closed")]
    QueueClosed,
}

/// Error returned by [`TaskHandle::join`] when a task produced no value.
///
/// [`TaskHandle::join`]: crate::TaskHandle::join
pub struct JoinError {
    repr: Repr,
}

enum Repr {
    Panicked(Box<dyn Any + Send + 'static>),
    Canceled,
}

impl JoinError {
    pub(crate) fn panicked(payload: Box<dyn Any + Send + 'static>) -> Self {
        JoinError {
            repr: Repr::Panicked(payload),
        }
    }

    pub(crate) fn canceled() -> Self {
        JoinError {
            repr: Repr::Canceled,
        }
    }

    /// Returns true if the task terminated by panicking.
    pub fn is_panic(&self) -> bool {
        matches!(self.repr, Repr::Panicked(_))
    }

    /// Returns true if the task was destroyed before it could run. Only
    /// reachable when a submission races pool shutdown.
    pub fn is_canceled(&self) -> bool {
        matches!(self.repr, Repr::Canceled)
    }

    /// Consumes the error, returning the captured panic payload.
    ///
    /// # Panics
    ///
    /// Panics if the task did not panic; check [`JoinError::is_panic`] first.
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match self.repr {
            Repr::Panicked(payload) => payload,
            Repr::Canceled => panic!("task was canceled, not panicked"),
        }
    }

    /// Propagates the failure onto the calling thread: resumes the captured
    /// panic, or panics if the task never ran.
    pub(crate) fn resume(self) -> ! {
        match self.repr {
            Repr::Panicked(payload) => panic::resume_unwind(payload),
            Repr::Canceled => panic!("task was canceled before it could run"),
        }
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Panicked(payload) => f
                .debug_tuple("JoinError::Panicked")
                .field(&panic_message(payload.as_ref()))
                .finish(),
            Repr::Canceled => f.debug_tuple("JoinError::Canceled").finish(),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Panicked(payload) => {
                write!(f, "task panicked: {}", panic_message(payload.as_ref()))
            }
            Repr::Canceled => write!(f, "task was canceled before it could run"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Best-effort extraction of a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(17usize);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn join_error_classification() {
        let err = JoinError::panicked(Box::new("boom"));
        assert!(err.is_panic());
        assert!(!err.is_canceled());
        assert_eq!(err.to_string(), "task panicked: boom");

        let err = JoinError::canceled();
        assert!(err.is_canceled());
        assert!(!err.is_panic());
    }
}
