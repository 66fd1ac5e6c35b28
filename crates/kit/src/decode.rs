//! Ready-made request decoders.
//!
//! Each one has the shape a [`Pipeline`](crate::Pipeline) expects of a decoder, so it can be
//! passed straight to [`Pipeline::builder`](crate::Pipeline::builder).

use crate::capability::Capabilities;
use crate::context::Context;
use crate::error::Error;
use bytes::Bytes;
use http::Request;
use http::header::CONTENT_TYPE;
use http_body::Body;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty body")]
    EmptyBody,

    #[error("unsupported media type, expected {expected}")]
    UnsupportedMediaType { expected: &'static str },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("invalid json body: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid form body: {source}")]
    Form {
        #[from]
        source: serde_urlencoded::de::Error,
    },

    #[error("invalid query string: {source}")]
    Query {
        #[from]
        source: serde_qs::Error,
    },
}

impl DecodeError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }
}

impl Capabilities for DecodeError {}

/// Decodes a JSON request body.
///
/// An empty body fails with [`DecodeError::EmptyBody`] rather than a JSON syntax error.
pub async fn decode_json<I, B>(_ctx: Context, request: Request<B>) -> Result<I, Error>
where
    I: DeserializeOwned,
    B: Body,
    B::Error: Display,
{
    let bytes = collect_body(request.into_body()).await?;
    if bytes.is_empty() {
        return Err(DecodeError::EmptyBody.into());
    }
    Ok(serde_json::from_slice(&bytes).map_err(DecodeError::from)?)
}

/// Decodes an `application/x-www-form-urlencoded` request body.
pub async fn decode_form<I, B>(_ctx: Context, request: Request<B>) -> Result<I, Error>
where
    I: DeserializeOwned,
    B: Body,
    B::Error: Display,
{
    if !has_content_type(&request, &mime::APPLICATION_WWW_FORM_URLENCODED) {
        return Err(DecodeError::UnsupportedMediaType { expected: mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() }
            .into());
    }

    let bytes = collect_body(request.into_body()).await?;
    Ok(serde_urlencoded::from_bytes(&bytes).map_err(DecodeError::from)?)
}

/// Decodes the query string. A request without one decodes like an empty query string.
pub async fn decode_query<I, B>(_ctx: Context, request: Request<B>) -> Result<I, Error>
where
    I: DeserializeOwned,
{
    let query = request.uri().query().unwrap_or_default();
    Ok(serde_qs::from_str::<I>(query).map_err(DecodeError::from)?)
}

async fn collect_body<B>(body: B) -> Result<Bytes, DecodeError>
where
    B: Body,
    B::Error: Display,
{
    body.collect().await.map(|c| c.to_bytes()).map_err(DecodeError::invalid_body)
}

fn has_content_type<B>(request: &Request<B>, expected: &mime::Mime) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .is_some_and(|mime| mime.essence_str() == expected.essence_str())
}
