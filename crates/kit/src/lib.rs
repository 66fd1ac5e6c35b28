//! A typed request pipeline that keeps transport plumbing away from business logic.
//!
//! A [`Pipeline`] binds three functions together:
//!
//! - a decoder turning an inbound [`http::Request`] into the handler's input type,
//! - the handler itself, plain async business logic,
//! - an encoder writing the handler's output to a [`ResponseWriter`](writer::ResponseWriter).
//!
//! Around them sit ordered pre-hooks, post-hooks and finalizers, an error encoder and an
//! error handler. Finalizers see what was actually sent: the status code that reached the
//! transport and the number of body bytes written.
//!
//! Values and errors customize their own rendering through small capability traits
//! ([`StatusCoder`](capability::StatusCoder), [`Headerer`](capability::Headerer),
//! [`JsonMarshaler`](capability::JsonMarshaler)) exposed via
//! [`Capabilities`](capability::Capabilities).
//!
//! # Example
//! ```no_run
//! use bytes::Bytes;
//! use http::Request;
//! use http_body_util::Full;
//! use micro_kit::capability::{Capabilities, StatusCoder};
//! use micro_kit::decode::decode_json;
//! use micro_kit::encode::encode_json_response;
//! use micro_kit::{Context, Error, Handler, Pipeline, hooks};
//! use serde::{Deserialize, Serialize};
//! use tracing::Level;
//! use tracing_subscriber::FmtSubscriber;
//!
//! #[derive(Deserialize)]
//! struct Greet {
//!     name: String,
//! }
//!
//! #[derive(Serialize)]
//! struct Greeting {
//!     message: String,
//! }
//!
//! impl Capabilities for Greeting {}
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("name must not be empty")]
//! struct EmptyName;
//!
//! impl StatusCoder for EmptyName {
//!     fn status_code(&self) -> http::StatusCode {
//!         http::StatusCode::BAD_REQUEST
//!     }
//! }
//!
//! impl Capabilities for EmptyName {
//!     fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
//!         Some(self)
//!     }
//! }
//!
//! async fn greet(_ctx: Context, req: Greet) -> Result<Greeting, Error> {
//!     if req.name.is_empty() {
//!         return Err(EmptyName.into());
//!     }
//!     Ok(Greeting { message: format!("hello {}", req.name) })
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let pipeline = Pipeline::builder(greet, decode_json, encode_json_response)
//!         .before(hooks::populate_request_context)
//!         .finalizer(hooks::log_outcome)
//!         .build();
//!
//!     let request = Request::post("/greet").body(Full::new(Bytes::from_static(br#"{"name":"zava"}"#))).unwrap();
//!     let response = pipeline.call(request).await.unwrap();
//!     assert_eq!(response.status(), http::StatusCode::OK);
//! }
//! ```

mod body;
mod error;
mod handler;
mod pipeline;
mod request;

pub mod capability;
pub mod context;
pub mod decode;
pub mod encode;
pub mod error_handler;
pub mod hooks;
pub mod intercept;
pub mod writer;

pub use body::ResponseBody;
pub use context::Context;
pub use error::Error;
pub use error::ResponseError;
pub use handler::Handler;
pub use pipeline::DecodeRequestFunc;
pub use pipeline::EncodeResponseFunc;
pub use pipeline::ErrorEncoder;
pub use pipeline::FinalizerFunc;
pub use pipeline::HandlerFunc;
pub use pipeline::Pipeline;
pub use pipeline::PipelineBuilder;
pub use pipeline::RequestFunc;
pub use pipeline::ResponseFunc;
pub use request::RequestHead;
