use crate::body::ResponseBody;
use crate::pipeline::Pipeline;
use crate::writer::ResponseBuffer;
use async_trait::async_trait;
use http::{Request, Response};
use http_body::Body;
use std::convert::Infallible;
use std::error::Error;

/// A request/response service, the shape transports drive.
#[async_trait]
pub trait Handler<ReqBody> {
    type RespBody: Body;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error>;
}

/// Serves the request into a [`ResponseBuffer`] and hands it back as a response.
///
/// Failures are already rendered into the response, so this never returns an error.
#[async_trait]
impl<I, O, B> Handler<B> for Pipeline<I, O, B>
where
    I: Send + 'static,
    O: Send + 'static,
    B: Send + 'static,
{
    type RespBody = ResponseBody;
    type Error = Infallible;

    async fn call(&self, req: Request<B>) -> Result<Response<Self::RespBody>, Self::Error> {
        let mut buffer = ResponseBuffer::new();
        self.serve(req, &mut buffer).await;
        Ok(buffer.into_response())
    }
}

#[cfg(test)]
mod tests {
    use crate::capability::WithStatus;
    use crate::context::Context;
    use crate::decode::decode_json;
    use crate::encode::encode_json_response;
    use crate::error::Error;
    use crate::handler::Handler;
    use crate::pipeline::Pipeline;
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;
    use http::{Request, StatusCode};
    use http_body_util::{BodyExt, Full};
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[derive(Deserialize)]
    struct Echo {
        message: String,
    }

    async fn echo(_ctx: Context, req: Echo) -> Result<WithStatus<Value>, Error> {
        Ok(WithStatus::created(json!({ "message": req.message })))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_call_returns_response() {
        let pipeline = Pipeline::new(echo, decode_json, encode_json_response);

        let request = Request::post("/echo").body(Full::new(Bytes::from_static(br#"{"message":"hi"}"#))).unwrap();
        let response = pipeline.call(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json; charset=utf-8");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"message":"hi"}"#);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_call_renders_errors() {
        let pipeline = Pipeline::new(echo, decode_json, encode_json_response);

        let request = Request::post("/echo").body(Full::new(Bytes::new())).unwrap();
        let response = pipeline.call(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"empty body");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shared_across_tasks() {
        let pipeline = Arc::new(Pipeline::new(echo, decode_json, encode_json_response));

        let tasks = (0..4)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    let body = format!(r#"{{"message":"m{i}"}}"#);
                    let request = Request::post("/echo").body(Full::new(Bytes::from(body))).unwrap();
                    let response = pipeline.call(request).await.unwrap();
                    (i, response.into_body().collect().await.unwrap().to_bytes())
                })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            let (i, body) = task.await.unwrap();
            assert_eq!(body, Bytes::from(format!(r#"{{"message":"m{i}"}}"#)));
        }
    }
}
