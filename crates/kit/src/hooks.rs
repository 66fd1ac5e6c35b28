//! Ready-made hooks and finalizers.
//!
//! ```
//! use http::HeaderValue;
//! use http::header::CACHE_CONTROL;
//! use micro_kit::hooks;
//! # use micro_kit::{Context, Error, Pipeline};
//! # use micro_kit::decode::decode_query;
//! # use micro_kit::encode::encode_json_response;
//! # async fn handler(_ctx: Context, req: serde_json::Value) -> Result<serde_json::Value, Error> { Ok(req) }
//!
//! let pipeline = Pipeline::<_, _, ()>::builder(handler, decode_query, encode_json_response)
//!     .before(hooks::populate_request_context)
//!     .after(hooks::set_response_header(CACHE_CONTROL, HeaderValue::from_static("no-store")))
//!     .finalizer(hooks::log_outcome)
//!     .build();
//! ```

use crate::context::{Context, ContextKey, RESPONSE_SIZE};
use crate::request::RequestHead;
use crate::writer::ResponseWriter;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri, Version};
use tracing::info;

pub const REQUEST_METHOD: ContextKey<Method> = ContextKey::new("request-method");
pub const REQUEST_URI: ContextKey<Uri> = ContextKey::new("request-uri");
pub const REQUEST_PATH: ContextKey<String> = ContextKey::new("request-path");
pub const REQUEST_VERSION: ContextKey<Version> = ContextKey::new("request-version");
pub const REQUEST_HOST: ContextKey<String> = ContextKey::new("request-host");
pub const REQUEST_AUTHORIZATION: ContextKey<String> = ContextKey::new("request-authorization");
pub const REQUEST_REFERER: ContextKey<String> = ContextKey::new("request-referer");
pub const REQUEST_ORIGIN: ContextKey<String> = ContextKey::new("request-origin");
pub const REQUEST_USER_AGENT: ContextKey<String> = ContextKey::new("request-user-agent");
pub const REQUEST_X_REQUEST_ID: ContextKey<String> = ContextKey::new("request-x-request-id");
pub const REQUEST_X_FORWARDED_FOR: ContextKey<String> = ContextKey::new("request-x-forwarded-for");
pub const REQUEST_X_FORWARDED_PROTO: ContextKey<String> = ContextKey::new("request-x-forwarded-proto");
pub const REQUEST_ACCEPT: ContextKey<String> = ContextKey::new("request-accept");

/// Post-hook setting `name` on the response, replacing any earlier value.
pub fn set_response_header(
    name: HeaderName,
    value: HeaderValue,
) -> impl Fn(Context, &mut dyn ResponseWriter) -> Context + Send + Sync + 'static {
    move |ctx: Context, writer: &mut dyn ResponseWriter| {
        writer.headers_mut().insert(name.clone(), value.clone());
        ctx
    }
}

/// Post-hook setting the response content type.
///
/// The stock encoders set their own content type, so this only sticks with an encoder that
/// leaves it alone.
pub fn set_content_type(value: HeaderValue) -> impl Fn(Context, &mut dyn ResponseWriter) -> Context + Send + Sync + 'static {
    set_response_header(CONTENT_TYPE, value)
}

/// Pre-hook copying the request line and a handful of well-known headers into the context.
///
/// Headers that are missing or not visible ASCII are skipped. The host comes from the `Host`
/// header, falling back to the URI authority.
pub fn populate_request_context<B>(ctx: Context, request: &Request<B>) -> Context {
    let headers = request.headers();

    let mut ctx = ctx
        .with_value(&REQUEST_METHOD, request.method().clone())
        .with_value(&REQUEST_URI, request.uri().clone())
        .with_value(&REQUEST_PATH, request.uri().path().to_string())
        .with_value(&REQUEST_VERSION, request.version());

    let host = header_string(headers, "host").or_else(|| request.uri().authority().map(|a| a.to_string()));
    if let Some(host) = host {
        ctx = ctx.with_value(&REQUEST_HOST, host);
    }

    let copied = [
        (&REQUEST_AUTHORIZATION, "authorization"),
        (&REQUEST_REFERER, "referer"),
        (&REQUEST_ORIGIN, "origin"),
        (&REQUEST_USER_AGENT, "user-agent"),
        (&REQUEST_X_REQUEST_ID, "x-request-id"),
        (&REQUEST_X_FORWARDED_FOR, "x-forwarded-for"),
        (&REQUEST_X_FORWARDED_PROTO, "x-forwarded-proto"),
        (&REQUEST_ACCEPT, "accept"),
    ];
    for (key, header) in copied {
        if let Some(value) = header_string(headers, header) {
            ctx = ctx.with_value(key, value);
        }
    }
    ctx
}

/// Finalizer logging one line per call at info level.
pub fn log_outcome(ctx: &Context, status: StatusCode, head: &RequestHead) {
    let size = ctx.value(&RESPONSE_SIZE).copied().unwrap_or_default();
    info!(method = %head.method(), path = head.uri().path(), status = status.as_u16(), size, "request served");
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
}
