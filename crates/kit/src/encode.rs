//! Default renderers for success values and errors.

use crate::capability::{Capabilities, Resolution};
use crate::context::Context;
use crate::error::Error;
use crate::writer::ResponseWriter;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use std::io::Write;
use tracing::warn;

const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON_UTF_8: &str = "application/json; charset=utf-8";

/// Serializes `response` as JSON.
///
/// The content type is `application/json; charset=utf-8`. Headers provided by the value are
/// appended, and the status is the value's own or `200 OK`. A `204 No Content` status skips the
/// body entirely. When the value provides its own JSON form that form is written, otherwise the
/// value is serialized with `serde_json`.
pub fn encode_json_response<O>(_ctx: &Context, writer: &mut dyn ResponseWriter, response: O) -> Result<(), Error>
where
    O: Serialize + Capabilities,
{
    writer.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON_UTF_8));

    let resolution = Resolution::of(&response, StatusCode::OK);
    resolution.append_headers_to(writer.headers_mut());
    writer.write_status(resolution.status);

    if resolution.status == StatusCode::NO_CONTENT {
        return Ok(());
    }

    match response.as_json_marshaler() {
        Some(marshaler) => writer.write_all(&marshaler.marshal_json()?)?,
        None => serde_json::to_writer(&mut *writer, &response)?,
    }
    Ok(())
}

/// Renders an error.
///
/// The body is the error message as `text/plain; charset=utf-8`, unless the error provides its
/// own JSON form and producing it succeeds, in which case that JSON is sent as
/// `application/json; charset=utf-8`. Headers provided by the error are appended after the
/// content type, and the status is the error's own or `500 Internal Server Error`.
///
/// If an earlier stage already committed a status or wrote body bytes, this still writes
/// through the same writer; the transport keeps the first status and the bytes end up
/// concatenated.
pub fn default_error_encoder(_ctx: &Context, err: &Error, writer: &mut dyn ResponseWriter) {
    let (content_type, body) = match err.as_json_marshaler().map(|marshaler| marshaler.marshal_json()) {
        Some(Ok(json)) => (APPLICATION_JSON_UTF_8, json),
        _ => (TEXT_PLAIN_UTF_8, err.to_string().into_bytes()),
    };

    writer.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));

    let resolution = Resolution::of(err, StatusCode::INTERNAL_SERVER_ERROR);
    resolution.append_headers_to(writer.headers_mut());
    writer.write_status(resolution.status);

    if resolution.status == StatusCode::NO_CONTENT {
        return;
    }

    if let Err(e) = writer.write_all(&body) {
        warn!(cause = %e, "failed to write error response");
    }
}
