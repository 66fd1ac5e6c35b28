//! The request pipeline: decode, handle, encode, with hooks around each step.
//!
//! One call to [`Pipeline::serve`] runs, in order:
//!
//! 1. every `before` hook, each replacing the [`Context`];
//! 2. the decoder, turning the raw request into `I`;
//! 3. the handler, turning `I` into `O`;
//! 4. every `after` hook, which may also touch the outgoing headers;
//! 5. the encoder, writing `O` to the [`ResponseWriter`];
//! 6. every finalizer, no matter how the call ended.
//!
//! A failing decoder, handler or encoder is reported to the [`ErrorHandler`], rendered by the
//! error encoder, and ends the call: later stages are skipped, finalizers still run.

use crate::context::{Context, RESPONSE_HEADERS, RESPONSE_SIZE};
use crate::encode::default_error_encoder;
use crate::error::Error;
use crate::error_handler::{ErrorHandler, NopErrorHandler};
use crate::intercept::InterceptingWriter;
use crate::request::RequestHead;
use crate::writer::ResponseWriter;
use futures::future::BoxFuture;
use http::{Request, StatusCode};
use std::fmt;
use std::future::Future;
use std::mem;
use tracing::{debug, trace};

/// Business logic: decoded request in, response value out.
pub type HandlerFunc<I, O> = Box<dyn Fn(Context, I) -> BoxFuture<'static, Result<O, Error>> + Send + Sync>;

/// Turns the raw request into the handler's input.
pub type DecodeRequestFunc<B, I> = Box<dyn Fn(Context, Request<B>) -> BoxFuture<'static, Result<I, Error>> + Send + Sync>;

/// Writes the handler's output to the response.
pub type EncodeResponseFunc<O> = Box<dyn Fn(&Context, &mut dyn ResponseWriter, O) -> Result<(), Error> + Send + Sync>;

/// Runs before decoding; may read the request and replace the context.
pub type RequestFunc<B> = Box<dyn Fn(Context, &Request<B>) -> Context + Send + Sync>;

/// Runs after handling and before encoding; may replace the context and edit the response.
pub type ResponseFunc = Box<dyn Fn(Context, &mut dyn ResponseWriter) -> Context + Send + Sync>;

/// Renders an error to the response.
pub type ErrorEncoder = Box<dyn Fn(&Context, &Error, &mut dyn ResponseWriter) + Send + Sync>;

/// Runs once at the very end of every call with the status code actually sent.
///
/// The context carries [`RESPONSE_HEADERS`] and [`RESPONSE_SIZE`].
pub type FinalizerFunc = Box<dyn Fn(&Context, StatusCode, &RequestHead) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Stage {
    Decode,
    Handle,
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Decode => "decode",
            Stage::Handle => "handle",
            Stage::Encode => "encode",
        })
    }
}

/// A configured decode/handle/encode pipeline for one request/response type pair.
///
/// A pipeline is immutable once built and can serve any number of concurrent calls; all
/// per-call state lives in the call itself.
///
/// # Example
/// ```
/// use bytes::Bytes;
/// use http::{Request, StatusCode};
/// use http_body_util::Full;
/// use micro_kit::capability::WithStatus;
/// use micro_kit::decode::decode_json;
/// use micro_kit::encode::encode_json_response;
/// use micro_kit::writer::ResponseBuffer;
/// use micro_kit::{Context, Error, Pipeline};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct CreateUser {
///     name: String,
/// }
///
/// async fn create_user(_ctx: Context, req: CreateUser) -> Result<WithStatus<serde_json::Value>, Error> {
///     Ok(WithStatus::created(serde_json::json!({ "name": req.name })))
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pipeline = Pipeline::new(create_user, decode_json, encode_json_response);
///
/// let mut buffer = ResponseBuffer::new();
/// let request = Request::post("/users").body(Full::new(Bytes::from_static(br#"{"name":"zava"}"#))).unwrap();
/// pipeline.serve(request, &mut buffer).await;
///
/// assert_eq!(buffer.status(), Some(StatusCode::CREATED));
/// assert_eq!(buffer.body(), br#"{"name":"zava"}"#);
/// # }
/// ```
pub struct Pipeline<I, O, B> {
    handler: HandlerFunc<I, O>,
    decoder: DecodeRequestFunc<B, I>,
    encoder: EncodeResponseFunc<O>,
    before: Vec<RequestFunc<B>>,
    after: Vec<ResponseFunc>,
    error_encoder: ErrorEncoder,
    error_handler: Box<dyn ErrorHandler>,
    finalizers: Vec<FinalizerFunc>,
}

impl<I, O, B> Pipeline<I, O, B>
where
    I: Send + 'static,
    O: Send + 'static,
    B: Send + 'static,
{
    /// Starts configuring a pipeline around a handler, a decoder and an encoder.
    pub fn builder<H, HFut, HE, D, DFut, DE, E>(handler: H, decoder: D, encoder: E) -> PipelineBuilder<I, O, B>
    where
        H: Fn(Context, I) -> HFut + Send + Sync + 'static,
        HFut: Future<Output = Result<O, HE>> + Send + 'static,
        HE: Into<Error>,
        D: Fn(Context, Request<B>) -> DFut + Send + Sync + 'static,
        DFut: Future<Output = Result<I, DE>> + Send + 'static,
        DE: Into<Error>,
        E: Fn(&Context, &mut dyn ResponseWriter, O) -> Result<(), Error> + Send + Sync + 'static,
    {
        PipelineBuilder::new(
            Box::new(move |ctx: Context, req: I| -> BoxFuture<'static, Result<O, Error>> {
                let fut = handler(ctx, req);
                Box::pin(async move { fut.await.map_err(Into::into) })
            }),
            Box::new(move |ctx: Context, req: Request<B>| -> BoxFuture<'static, Result<I, Error>> {
                let fut = decoder(ctx, req);
                Box::pin(async move { fut.await.map_err(Into::into) })
            }),
            Box::new(encoder),
        )
    }

    /// A pipeline with no hooks, no finalizers, the default error encoder and an error handler
    /// that ignores errors.
    pub fn new<H, HFut, HE, D, DFut, DE, E>(handler: H, decoder: D, encoder: E) -> Self
    where
        H: Fn(Context, I) -> HFut + Send + Sync + 'static,
        HFut: Future<Output = Result<O, HE>> + Send + 'static,
        HE: Into<Error>,
        D: Fn(Context, Request<B>) -> DFut + Send + Sync + 'static,
        DFut: Future<Output = Result<I, DE>> + Send + 'static,
        DE: Into<Error>,
        E: Fn(&Context, &mut dyn ResponseWriter, O) -> Result<(), Error> + Send + Sync + 'static,
    {
        Self::builder(handler, decoder, encoder).build()
    }

    /// Serves one request, writing the outcome to `writer`.
    ///
    /// The initial context is the [`Context`] found in the request extensions, if the transport
    /// put one there, or an empty one.
    pub async fn serve(&self, request: Request<B>, writer: &mut dyn ResponseWriter) {
        let ctx = request.extensions().get::<Context>().cloned().unwrap_or_default();

        if self.finalizers.is_empty() {
            let mut ctx = ctx;
            self.process(&mut ctx, request, writer).await;
            return;
        }

        let mut scope = FinalizeScope {
            ctx,
            head: RequestHead::from(&request),
            writer: InterceptingWriter::new(writer),
            finalizers: &self.finalizers,
        };
        let FinalizeScope { ctx, writer, .. } = &mut scope;
        self.process(ctx, request, writer).await;
    }

    // `ctx` stays valid for the finalizers even when a hook panics
    async fn process(&self, ctx: &mut Context, request: Request<B>, writer: &mut dyn ResponseWriter) {
        for before in &self.before {
            *ctx = before(ctx.clone(), &request);
        }

        trace!("decoding request");
        let request = match (self.decoder)(ctx.clone(), request).await {
            Ok(request) => request,
            Err(err) => return self.fail(ctx, Stage::Decode, &err, writer),
        };

        trace!("handling request");
        let response = match (self.handler)(ctx.clone(), request).await {
            Ok(response) => response,
            Err(err) => return self.fail(ctx, Stage::Handle, &err, writer),
        };

        for after in &self.after {
            *ctx = after(ctx.clone(), &mut *writer);
        }

        trace!("encoding response");
        if let Err(err) = (self.encoder)(ctx, &mut *writer, response) {
            self.fail(ctx, Stage::Encode, &err, writer);
        }
    }

    fn fail(&self, ctx: &Context, stage: Stage, err: &Error, writer: &mut dyn ResponseWriter) {
        debug!(%stage, cause = %err, "pipeline stage failed");
        self.error_handler.handle(ctx, err);
        (self.error_encoder)(ctx, err, writer);
    }
}

impl<I, O, B> fmt::Debug for Pipeline<I, O, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("finalizers", &self.finalizers.len())
            .finish_non_exhaustive()
    }
}

/// Runs the finalizers when dropped, so they also run when the call returns early, panics,
/// or its future is dropped.
struct FinalizeScope<'p, 'w> {
    ctx: Context,
    head: RequestHead,
    writer: InterceptingWriter<'w>,
    finalizers: &'p [FinalizerFunc],
}

impl Drop for FinalizeScope<'_, '_> {
    fn drop(&mut self) {
        let ctx = mem::take(&mut self.ctx)
            .with_value(&RESPONSE_HEADERS, self.writer.headers().clone())
            .with_value(&RESPONSE_SIZE, self.writer.written());
        let status = self.writer.status();

        trace!(%status, size = self.writer.written(), "running finalizers");
        for finalizer in self.finalizers {
            finalizer(&ctx, status, &self.head);
        }
    }
}

/// Configures a [`Pipeline`]. Created by [`Pipeline::builder`].
pub struct PipelineBuilder<I, O, B> {
    handler: HandlerFunc<I, O>,
    decoder: DecodeRequestFunc<B, I>,
    encoder: EncodeResponseFunc<O>,
    before: Vec<RequestFunc<B>>,
    after: Vec<ResponseFunc>,
    error_encoder: ErrorEncoder,
    error_handler: Box<dyn ErrorHandler>,
    finalizers: Vec<FinalizerFunc>,
}

impl<I, O, B> PipelineBuilder<I, O, B> {
    fn new(handler: HandlerFunc<I, O>, decoder: DecodeRequestFunc<B, I>, encoder: EncodeResponseFunc<O>) -> Self {
        Self {
            handler,
            decoder,
            encoder,
            before: vec![],
            after: vec![],
            error_encoder: Box::new(default_error_encoder),
            error_handler: Box::new(NopErrorHandler),
            finalizers: vec![],
        }
    }

    /// Adds a hook run before decoding. Hooks run in the order they are added.
    pub fn before<F>(mut self, f: F) -> Self
    where
        F: Fn(Context, &Request<B>) -> Context + Send + Sync + 'static,
    {
        self.before.push(Box::new(f));
        self
    }

    /// Adds a hook run after a successful handler call and before encoding. Hooks run in the
    /// order they are added.
    pub fn after<F>(mut self, f: F) -> Self
    where
        F: Fn(Context, &mut dyn ResponseWriter) -> Context + Send + Sync + 'static,
    {
        self.after.push(Box::new(f));
        self
    }

    /// Replaces [`default_error_encoder`].
    pub fn error_encoder<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &Error, &mut dyn ResponseWriter) + Send + Sync + 'static,
    {
        self.error_encoder = Box::new(f);
        self
    }

    /// Replaces [`NopErrorHandler`].
    pub fn error_handler<H: ErrorHandler + 'static>(mut self, error_handler: H) -> Self {
        self.error_handler = Box::new(error_handler);
        self
    }

    /// Adds a finalizer. Finalizers run in the order they are added.
    pub fn finalizer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, StatusCode, &RequestHead) + Send + Sync + 'static,
    {
        self.finalizers.push(Box::new(f));
        self
    }

    pub fn build(self) -> Pipeline<I, O, B> {
        Pipeline {
            handler: self.handler,
            decoder: self.decoder,
            encoder: self.encoder,
            before: self.before,
            after: self.after,
            error_encoder: self.error_encoder,
            error_handler: self.error_handler,
            finalizers: self.finalizers,
        }
    }
}

impl<I, O, B> fmt::Debug for PipelineBuilder<I, O, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("finalizers", &self.finalizers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::capability::{Capabilities, StatusCoder, WithStatus};
    use crate::context::{Context, ContextKey, RESPONSE_HEADERS, RESPONSE_SIZE};
    use crate::decode::decode_json;
    use crate::encode::encode_json_response;
    use crate::error::Error;
    use crate::error_handler::MockErrorHandler;
    use crate::pipeline::Pipeline;
    use crate::request::RequestHead;
    use crate::writer::{ResponseBuffer, ResponseWriter};
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;
    use http::{HeaderValue, Request, StatusCode};
    use http_body_util::Full;
    use serde::{Deserialize, Serialize};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    type Body = Full<Bytes>;

    const TENANT: ContextKey<String> = ContextKey::new("tenant");

    #[derive(Debug, Deserialize)]
    struct CreateUser {
        name: String,
    }

    #[derive(Debug, Serialize)]
    struct User {
        id: u32,
        name: String,
    }

    impl Capabilities for User {}

    struct Deleted;

    impl Serialize for Deleted {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_unit()
        }
    }

    impl StatusCoder for Deleted {
        fn status_code(&self) -> StatusCode {
            StatusCode::NO_CONTENT
        }
    }

    impl Capabilities for Deleted {
        fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
            Some(self)
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("user {0} is locked")]
    struct Locked(String);

    impl StatusCoder for Locked {
        fn status_code(&self) -> StatusCode {
            StatusCode::LOCKED
        }
    }

    impl Capabilities for Locked {
        fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
            Some(self)
        }
    }

    /// Serializes a prefix, then fails.
    struct HalfWritten;

    impl Serialize for HalfWritten {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("half written"))
        }
    }

    impl Capabilities for HalfWritten {}

    type Outcome = (StatusCode, u64);

    fn request(body: &'static [u8]) -> Request<Body> {
        Request::post("/users").body(Full::new(Bytes::from_static(body))).unwrap()
    }

    async fn create_user(_ctx: Context, req: CreateUser) -> Result<User, Error> {
        Ok(User { id: 1, name: req.name })
    }

    fn recording_finalizer(
        outcomes: &Arc<Mutex<Vec<Outcome>>>,
    ) -> impl Fn(&Context, StatusCode, &RequestHead) + Send + Sync + 'static {
        let outcomes = Arc::clone(outcomes);
        move |ctx: &Context, status: StatusCode, _head: &RequestHead| {
            let size = ctx.value(&RESPONSE_SIZE).copied().unwrap_or_default();
            outcomes.lock().unwrap().push((status, size));
        }
    }

    #[tokio::test]
    async fn test_success_plain_value() {
        let encoded = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(vec![]));
        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().never();

        let counter = Arc::clone(&encoded);
        let pipeline: Pipeline<CreateUser, User, Body> = Pipeline::builder(
            create_user,
            decode_json,
            move |ctx: &Context, writer: &mut dyn ResponseWriter, user: User| {
                counter.fetch_add(1, Ordering::SeqCst);
                encode_json_response(ctx, writer, user)
            },
        )
        .error_handler(error_handler)
        .finalizer(recording_finalizer(&outcomes))
        .build();

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request(br#"{"name":"zava"}"#), &mut buffer).await;

        let expected = br#"{"id":1,"name":"zava"}"#;
        assert_eq!(buffer.status(), Some(StatusCode::OK));
        assert_eq!(buffer.headers().get(CONTENT_TYPE).unwrap(), "application/json; charset=utf-8");
        assert_eq!(buffer.body(), expected);
        assert_eq!(encoded.load(Ordering::SeqCst), 1);
        assert_eq!(*outcomes.lock().unwrap(), [(StatusCode::OK, expected.len() as u64)]);
    }

    #[tokio::test]
    async fn test_success_with_status_override() {
        let outcomes = Arc::new(Mutex::new(vec![]));
        let pipeline: Pipeline<CreateUser, WithStatus<serde_json::Value>, Body> = Pipeline::builder(
            |_ctx: Context, _req: CreateUser| async { Ok::<_, Error>(WithStatus::created(serde_json::json!({ "id": 1 }))) },
            decode_json,
            encode_json_response,
        )
        .finalizer(recording_finalizer(&outcomes))
        .build();

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request(br#"{"name":"zava"}"#), &mut buffer).await;

        assert_eq!(buffer.status(), Some(StatusCode::CREATED));
        assert_eq!(buffer.body(), br#"{"id":1}"#);
        assert_eq!(*outcomes.lock().unwrap(), [(StatusCode::CREATED, 8)]);
    }

    #[tokio::test]
    async fn test_decode_failure_skips_handler() {
        let handled = Arc::new(AtomicUsize::new(0));
        let error_encoded = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(vec![]));

        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().withf(|_ctx, err| err.to_string() == "empty body").times(1).return_const(());

        let handled_counter = Arc::clone(&handled);
        let error_counter = Arc::clone(&error_encoded);
        let pipeline: Pipeline<CreateUser, User, Body> = Pipeline::builder(
            move |ctx: Context, req: CreateUser| {
                handled_counter.fetch_add(1, Ordering::SeqCst);
                create_user(ctx, req)
            },
            decode_json,
            encode_json_response,
        )
        .error_handler(error_handler)
        .error_encoder(move |ctx: &Context, err: &Error, writer: &mut dyn ResponseWriter| {
            error_counter.fetch_add(1, Ordering::SeqCst);
            crate::encode::default_error_encoder(ctx, err, writer);
        })
        .finalizer(recording_finalizer(&outcomes))
        .build();

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request(b""), &mut buffer).await;

        assert_eq!(handled.load(Ordering::SeqCst), 0);
        assert_eq!(error_encoded.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(buffer.body(), b"empty body");
        assert_eq!(*outcomes.lock().unwrap(), [(StatusCode::INTERNAL_SERVER_ERROR, 10)]);
    }

    #[tokio::test]
    async fn test_handler_failure_skips_after_hooks_and_encoder() {
        let after = Arc::new(AtomicUsize::new(0));
        let encoded = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(vec![]));

        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().withf(|_ctx, err| err.is::<Locked>()).times(1).return_const(());

        let after_counter = Arc::clone(&after);
        let encode_counter = Arc::clone(&encoded);
        let pipeline: Pipeline<CreateUser, User, Body> = Pipeline::builder(
            |_ctx: Context, req: CreateUser| async move { Err::<User, _>(Locked(req.name)) },
            decode_json,
            move |ctx: &Context, writer: &mut dyn ResponseWriter, user: User| {
                encode_counter.fetch_add(1, Ordering::SeqCst);
                encode_json_response(ctx, writer, user)
            },
        )
        .after(move |ctx: Context, _writer: &mut dyn ResponseWriter| {
            after_counter.fetch_add(1, Ordering::SeqCst);
            ctx
        })
        .error_handler(error_handler)
        .finalizer(recording_finalizer(&outcomes))
        .build();

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request(br#"{"name":"zava"}"#), &mut buffer).await;

        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(encoded.load(Ordering::SeqCst), 0);
        assert_eq!(buffer.status(), Some(StatusCode::LOCKED));
        assert_eq!(buffer.body(), b"user zava is locked");
        assert_eq!(*outcomes.lock().unwrap(), [(StatusCode::LOCKED, 19)]);
    }

    #[tokio::test]
    async fn test_no_content_writes_no_bytes() {
        let outcomes = Arc::new(Mutex::new(vec![]));
        let pipeline: Pipeline<CreateUser, Deleted, Body> = Pipeline::builder(
            |_ctx: Context, _req: CreateUser| async { Ok::<_, Error>(Deleted) },
            decode_json,
            encode_json_response,
        )
        .finalizer(recording_finalizer(&outcomes))
        .build();

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request(br#"{"name":"zava"}"#), &mut buffer).await;

        assert_eq!(buffer.status(), Some(StatusCode::NO_CONTENT));
        assert!(buffer.body().is_empty());
        assert_eq!(*outcomes.lock().unwrap(), [(StatusCode::NO_CONTENT, 0)]);
    }

    #[tokio::test]
    async fn test_encode_failure_after_partial_write() {
        let outcomes = Arc::new(Mutex::new(vec![]));
        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().times(1).return_const(());

        let pipeline: Pipeline<CreateUser, HalfWritten, Body> = Pipeline::builder(
            |_ctx: Context, _req: CreateUser| async { Ok::<_, Error>(HalfWritten) },
            decode_json,
            |_ctx: &Context, writer: &mut dyn ResponseWriter, response: HalfWritten| {
                writer.write_all(b"{\"partial\":")?;
                serde_json::to_writer(&mut *writer, &response)?;
                Ok(())
            },
        )
        .error_handler(error_handler)
        .finalizer(recording_finalizer(&outcomes))
        .build();

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request(br#"{"name":"zava"}"#), &mut buffer).await;

        // the partial write committed 200, the error body is appended after it
        assert_eq!(buffer.status(), Some(StatusCode::OK));
        assert_eq!(buffer.body(), b"{\"partial\":half written");
        assert_eq!(*outcomes.lock().unwrap(), [(StatusCode::OK, 23)]);
    }

    #[tokio::test]
    async fn test_stage_ordering_and_context_flow() {
        let events = Arc::new(Mutex::new(Vec::<String>::new()));

        let e1 = Arc::clone(&events);
        let e2 = Arc::clone(&events);
        let e3 = Arc::clone(&events);
        let e4 = Arc::clone(&events);
        let e5 = Arc::clone(&events);
        let e6 = Arc::clone(&events);
        let e7 = Arc::clone(&events);

        let pipeline: Pipeline<CreateUser, User, Body> = Pipeline::builder(
            move |ctx: Context, req: CreateUser| {
                e3.lock().unwrap().push(format!("handle:{}", ctx.value(&TENANT).unwrap()));
                create_user(ctx, req)
            },
            move |ctx: Context, req: Request<Body>| {
                e2.lock().unwrap().push(format!("decode:{}", ctx.value(&TENANT).unwrap()));
                decode_json(ctx, req)
            },
            move |ctx: &Context, writer: &mut dyn ResponseWriter, user: User| {
                e5.lock().unwrap().push("encode".to_string());
                encode_json_response(ctx, writer, user)
            },
        )
        .before(move |ctx: Context, _req: &Request<Body>| {
            e1.lock().unwrap().push("before:1".to_string());
            ctx.with_value(&TENANT, "acme".to_string())
        })
        .before(|ctx: Context, _req: &Request<Body>| {
            let tenant = format!("{}-eu", ctx.value(&TENANT).unwrap());
            ctx.with_value(&TENANT, tenant)
        })
        .after(move |ctx: Context, writer: &mut dyn ResponseWriter| {
            e4.lock().unwrap().push("after".to_string());
            writer.headers_mut().insert("x-tenant", HeaderValue::from_str(ctx.value(&TENANT).unwrap()).unwrap());
            ctx
        })
        .finalizer(move |ctx: &Context, _status: StatusCode, _head: &RequestHead| {
            let headers = ctx.value(&RESPONSE_HEADERS).unwrap();
            e6.lock().unwrap().push(format!("finalize:{}", headers.get("x-tenant").unwrap().to_str().unwrap()));
        })
        .finalizer(move |_ctx: &Context, _status: StatusCode, head: &RequestHead| {
            e7.lock().unwrap().push(format!("finalize:{}", head.uri().path()));
        })
        .build();

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request(br#"{"name":"zava"}"#), &mut buffer).await;

        assert_eq!(
            *events.lock().unwrap(),
            [
                "before:1",
                "decode:acme-eu",
                "handle:acme-eu",
                "after",
                "encode",
                "finalize:acme-eu",
                "finalize:/users"
            ]
        );
        assert_eq!(buffer.headers().get("x-tenant").unwrap(), "acme-eu");
    }

    #[tokio::test]
    async fn test_finalizers_run_when_handler_panics() {
        let outcomes = Arc::new(Mutex::new(vec![]));
        let pipeline: Arc<Pipeline<CreateUser, User, Body>> = Arc::new(
            Pipeline::builder(
                |_ctx: Context, _req: CreateUser| async {
                    if true {
                        panic!("handler blew up");
                    }
                    Ok::<User, Error>(User { id: 0, name: String::new() })
                },
                decode_json,
                encode_json_response,
            )
            .finalizer(recording_finalizer(&outcomes))
            .build(),
        );

        let task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move {
                let mut buffer = ResponseBuffer::new();
                pipeline.serve(request(br#"{"name":"zava"}"#), &mut buffer).await;
            }
        });

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(*outcomes.lock().unwrap(), [(StatusCode::OK, 0)]);
    }

    #[tokio::test]
    async fn test_context_survives_panicking_hook() {
        let seen = Arc::new(Mutex::new(vec![]));

        let recorded = Arc::clone(&seen);
        let pipeline: Arc<Pipeline<CreateUser, User, Body>> = Arc::new(
            Pipeline::builder(create_user, decode_json, encode_json_response)
                .before(|ctx: Context, _req: &Request<Body>| ctx.with_value(&TENANT, "acme".to_string()))
                .before(|_ctx: Context, _req: &Request<Body>| -> Context { panic!("hook blew up") })
                .finalizer(move |ctx: &Context, _status: StatusCode, _head: &RequestHead| {
                    let token = ctx.cancellation_token().is_some();
                    recorded.lock().unwrap().push((ctx.value(&TENANT).cloned(), token));
                })
                .build(),
        );

        let mut request = request(br#"{"name":"zava"}"#);
        request.extensions_mut().insert(Context::new().with_cancellation(CancellationToken::new()));

        let task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move {
                let mut buffer = ResponseBuffer::new();
                pipeline.serve(request, &mut buffer).await;
            }
        });

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(*seen.lock().unwrap(), [(Some("acme".to_string()), true)]);
    }

    #[tokio::test]
    async fn test_finalizers_run_when_call_is_dropped() {
        let outcomes = Arc::new(Mutex::new(vec![]));
        let pipeline: Pipeline<CreateUser, User, Body> = Pipeline::builder(
            create_user,
            |_ctx: Context, _req: Request<Body>| async {
                std::future::pending::<()>().await;
                Ok::<CreateUser, Error>(CreateUser { name: String::new() })
            },
            encode_json_response,
        )
        .finalizer(recording_finalizer(&outcomes))
        .build();

        let mut buffer = ResponseBuffer::new();
        let served = tokio::time::timeout(Duration::from_millis(10), pipeline.serve(request(b""), &mut buffer)).await;

        assert!(served.is_err());
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_context_reaches_handler() {
        let token = CancellationToken::new();
        let seen = Arc::new(Mutex::new(None));

        let seen_by_handler = Arc::clone(&seen);
        let pipeline: Pipeline<CreateUser, User, Body> = Pipeline::new(
            move |ctx: Context, req: CreateUser| {
                *seen_by_handler.lock().unwrap() = ctx.cancellation_token().cloned();
                create_user(ctx, req)
            },
            decode_json,
            encode_json_response,
        );

        let mut request = request(br#"{"name":"zava"}"#);
        request.extensions_mut().insert(Context::new().with_cancellation(token.clone()));

        let mut buffer = ResponseBuffer::new();
        pipeline.serve(request, &mut buffer).await;

        let seen = seen.lock().unwrap().take().unwrap();
        assert!(!seen.is_cancelled());
        token.cancel();
        assert!(seen.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_are_isolated() {
        let outcomes = Arc::new(Mutex::new(vec![]));

        let recorded = Arc::clone(&outcomes);
        let pipeline: Arc<Pipeline<CreateUser, User, Body>> = Arc::new(
            Pipeline::builder(
                |ctx: Context, req: CreateUser| async move {
                    tokio::task::yield_now().await;
                    assert_eq!(ctx.value(&TENANT), Some(&req.name));
                    Ok::<_, Error>(User { id: 1, name: req.name })
                },
                decode_json,
                encode_json_response,
            )
            .before(|ctx: Context, req: &Request<Body>| {
                let tenant = req.headers().get("x-tenant").unwrap().to_str().unwrap().to_string();
                ctx.with_value(&TENANT, tenant)
            })
            .finalizer(move |ctx: &Context, status: StatusCode, _head: &RequestHead| {
                let tenant = ctx.value(&TENANT).cloned().unwrap();
                let size = *ctx.value(&RESPONSE_SIZE).unwrap();
                recorded.lock().unwrap().push((tenant, status, size));
            })
            .build(),
        );

        let tasks = (0..10)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    let name = "t".repeat(i + 1);
                    let body = format!(r#"{{"name":"{name}"}}"#);
                    let request = Request::post("/users").header("x-tenant", &name).body(Full::new(Bytes::from(body))).unwrap();

                    let mut buffer = ResponseBuffer::new();
                    pipeline.serve(request, &mut buffer).await;
                    (name, buffer.body().len() as u64)
                })
            })
            .collect::<Vec<_>>();

        let mut expected = vec![];
        for task in tasks {
            let (name, len) = task.await.unwrap();
            expected.push((name, StatusCode::OK, len));
        }

        let mut recorded = outcomes.lock().unwrap().clone();
        recorded.sort();
        expected.sort();
        assert_eq!(recorded, expected);
    }
}
