use crate::capability::{Capabilities, Headerer, JsonMarshaler, StatusCoder};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// An error that can be rendered to the client.
///
/// Every `std::error::Error` that implements [`Capabilities`] qualifies; the capabilities
/// decide the status code, extra headers and body used when the error is encoded.
pub trait ResponseError: StdError + Capabilities + Send + Sync + 'static {}

impl<T> ResponseError for T where T: StdError + Capabilities + Send + Sync + 'static {}

/// The failure type flowing through a [`Pipeline`](crate::Pipeline).
///
/// Decoding, handling and encoding failures all end up here, and all are reported to the
/// error handler and rendered by the error encoder the same way. Any [`ResponseError`]
/// converts into it, so `?` works in decoders, handlers and encoders.
pub struct Error {
    inner: Box<dyn ResponseError>,
}

impl Error {
    pub fn new<E: ResponseError>(error: E) -> Self {
        Self { inner: Box::new(error) }
    }

    /// An error carrying only a message. It renders with the default status.
    pub fn msg<M: Into<Cow<'static, str>>>(message: M) -> Self {
        Self::new(MessageError(message.into()))
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.as_std_error().downcast_ref::<E>()
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    pub fn as_std_error(&self) -> &(dyn StdError + 'static) {
        &*self.inner
    }
}

impl<E: ResponseError> From<E> for Error {
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl Capabilities for Error {
    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        self.inner.as_status_coder()
    }

    fn as_headerer(&self) -> Option<&dyn Headerer> {
        self.inner.as_headerer()
    }

    fn as_json_marshaler(&self) -> Option<&dyn JsonMarshaler> {
        self.inner.as_json_marshaler()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

#[derive(Debug)]
struct MessageError(Cow<'static, str>);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

impl Capabilities for MessageError {}
