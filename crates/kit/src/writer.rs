//! The response-writer capability the pipeline writes through.
//!
//! A [`ResponseWriter`] is a one-shot, write-only view of the outgoing response: headers
//! can be edited until the status is committed, the status is committed once, and body
//! bytes are streamed through [`io::Write`]. Writing body bytes before any status commits
//! `200 OK`, and later status calls are ignored, the same way HTTP/1 transports behave.
//!
//! [`ResponseBuffer`] is the in-memory implementation used when the pipeline is driven
//! through [`Handler`](crate::Handler): it collects everything into an
//! [`http::Response`].

use crate::body::ResponseBody;
use bytes::BytesMut;
use http::{HeaderMap, Response, StatusCode};
use std::io;

pub trait ResponseWriter: io::Write + Send {
    /// The headers that will be (or were) sent with the response.
    fn headers(&self) -> &HeaderMap;

    /// Mutable access to the pending headers. Edits after the status is committed have no
    /// effect on the response.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status line. Only the first call takes effect.
    fn write_status(&mut self, status: StatusCode);
}

/// Collects a response in memory.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    headers: HeaderMap,
    committed: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.committed.as_ref().map(|(status, _)| *status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Turns the buffer into a response. A buffer nobody wrote to becomes an empty `200 OK`.
    pub fn into_response(self) -> Response<ResponseBody> {
        let (status, headers) = self.committed.unwrap_or((StatusCode::OK, self.headers));

        let mut response = Response::new(ResponseBody::once(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl ResponseWriter for ResponseBuffer {
    fn headers(&self) -> &HeaderMap {
        match &self.committed {
            Some((_, headers)) => headers,
            None => &self.headers,
        }
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.committed.is_none() {
            self.committed = Some((status, self.headers.clone()));
        }
    }
}

impl io::Write for ResponseBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_status(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
