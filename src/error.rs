//! Listener failure types.
use core::fmt;
use std::error::Error;

/// An error raised by a single listener during dispatch.
///
/// Listener failures are opaque to the dispatcher: it never inspects them,
/// it only decides whether to stop at the first one ([`Event::emit`]) or to
/// collect them all and raise one [`AggregateError`] ([`Event::emit_all`]).
///
/// [`Event::emit`]: crate::Event::emit
/// [`Event::emit_all`]: crate::Event::emit_all
pub type ListenerError = Box<dyn Error + 'static>;

/// One or more listener failures, collected by an aggregating dispatch.
///
/// Raised at most once per [`Event::emit_all`] pass, after every listener
/// has been given its chance to run. The underlying errors are kept in
/// firing order.
///
/// [`Event::emit_all`]: crate::Event::emit_all
#[derive(Debug, thiserror::Error)]
#[error("one or more listeners failed during dispatch")]
pub struct AggregateError {
    errors: Vec<ListenerError>,
}

/// Displays every failure in an [`AggregateError`] on one line,
/// `; `-separated. Returned by [`AggregateError::display_errors`].
struct DisplayErrors<'a>(&'a [ListenerError]);

// === impl AggregateError ===

impl AggregateError {
    pub(crate) fn new(errors: Vec<ListenerError>) -> Self {
        debug_assert!(
            !errors.is_empty(),
            "an aggregate error must carry at least one listener failure"
        );
        Self { errors }
    }

    /// Borrows the collected listener failures, in firing order.
    pub fn errors(&self) -> &[ListenerError] {
        &self.errors
    }

    /// Consumes the aggregate, returning the collected failures.
    pub fn into_errors(self) -> Vec<ListenerError> {
        self.errors
    }

    /// Returns a value that [`Display`](fmt::Display)s every collected
    /// failure, for error sinks that want the details on one line.
    pub fn display_errors(&self) -> impl fmt::Display + '_ {
        DisplayErrors(&self.errors)
    }
}

// === impl DisplayErrors ===

impl fmt::Display for DisplayErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            fmt::Display::fmt(error, f)?;
        }
        Ok(())
    }
}
