use crate::writer::ResponseWriter;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::io;

/// Records the status code and the number of body bytes that actually reach the wrapped
/// writer.
///
/// The recorded status starts out as `200 OK`, which is what a transport sends when the body
/// is written without an explicit status. Only the first status call is recorded since it is
/// the only one the transport honors. Every call is forwarded unchanged; nothing is buffered
/// and write errors are returned as they are.
pub struct InterceptingWriter<'w> {
    inner: &'w mut dyn ResponseWriter,
    status: StatusCode,
    status_written: bool,
    written: u64,
}

impl<'w> InterceptingWriter<'w> {
    pub fn new(inner: &'w mut dyn ResponseWriter) -> Self {
        Self { inner, status: StatusCode::OK, status_written: false, written: 0 }
    }

    /// The status sent to the transport.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Body bytes accepted by the transport so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl ResponseWriter for InterceptingWriter<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        if !self.status_written {
            self.status = status;
            self.status_written = true;
        }
        self.inner.write_status(status);
    }
}

impl io::Write for InterceptingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // a body write commits whatever status is pending
        self.status_written = true;
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl fmt::Debug for InterceptingWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingWriter").field("status", &self.status).field("written", &self.written).finish()
    }
}
