use bytes::Bytes;
use http::header::CACHE_CONTROL;
use http::{HeaderValue, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use micro_kit::capability::{Capabilities, StatusCoder, WithStatus};
use micro_kit::decode::decode_json;
use micro_kit::encode::encode_json_response;
use micro_kit::error_handler::LogErrorHandler;
use micro_kit::{Context, Error, Handler, Pipeline, hooks};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Deserialize)]
struct CreateTodo {
    title: String,
}

#[derive(Serialize)]
struct Todo {
    id: u64,
    title: String,
}

impl Capabilities for Todo {}

#[derive(Debug, thiserror::Error)]
#[error("title must not be blank")]
struct BlankTitle;

impl StatusCoder for BlankTitle {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

impl Capabilities for BlankTitle {
    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        Some(self)
    }
}

async fn create_todo(_ctx: Context, req: CreateTodo) -> Result<WithStatus<Todo>, Error> {
    if req.title.trim().is_empty() {
        return Err(BlankTitle.into());
    }
    Ok(WithStatus::created(Todo { id: 1, title: req.title }))
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let pipeline: Arc<Pipeline<CreateTodo, WithStatus<Todo>, Full<Bytes>>> = Arc::new(
        Pipeline::builder(create_todo, decode_json, encode_json_response)
            .before(hooks::populate_request_context)
            .after(hooks::set_response_header(CACHE_CONTROL, HeaderValue::from_static("no-store")))
            .error_handler(LogErrorHandler)
            .finalizer(hooks::log_outcome)
            .build(),
    );

    for payload in [r#"{"title":"write docs"}"#, r#"{"title":"  "}"#, ""] {
        let request = Request::post("/todos")
            .header("x-request-id", "demo")
            .body(Full::new(Bytes::from_static(payload.as_bytes())))
            .expect("request should be valid");

        let response = match pipeline.call(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        let status = response.status();
        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        info!(%status, body = %String::from_utf8_lossy(&body), "response");
    }
}
