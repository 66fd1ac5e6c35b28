//! Side channel receiving every error a pipeline runs into.
//!
//! An [`ErrorHandler`] only observes: it is called before the error is rendered and cannot
//! change what the client receives or how the call continues.

use crate::context::Context;
use crate::error::Error;
use std::fmt;
use tracing::warn;

#[cfg_attr(test, mockall::automock)]
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, ctx: &Context, err: &Error);
}

/// Ignores every error. This is the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopErrorHandler;

impl ErrorHandler for NopErrorHandler {
    #[inline]
    fn handle(&self, _ctx: &Context, _err: &Error) {}
}

/// Logs every error through `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, _ctx: &Context, err: &Error) {
        warn!(cause = %err, "request failed");
    }
}

/// An [`ErrorHandler`] backed by a function.
pub struct ErrorHandlerFn<F> {
    f: F,
}

pub fn error_handler_fn<F>(f: F) -> ErrorHandlerFn<F>
where
    F: Fn(&Context, &Error) + Send + Sync,
{
    ErrorHandlerFn { f }
}

impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: Fn(&Context, &Error) + Send + Sync,
{
    fn handle(&self, ctx: &Context, err: &Error) {
        (self.f)(ctx, err);
    }
}

impl<F> fmt::Debug for ErrorHandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlerFn").finish_non_exhaustive()
    }
}
