//! Handler type and utilities
//!
//! Every stage of the pipeline, and the route handler at its center, shares one
//! shape: an async function from [`Request`] to `Result<Response, ApiError>`.

use crate::error::ApiError;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Outcome of handling a request
pub type HandlerResult = Result<Response, ApiError>;

/// A type-erased handler
pub type Handler = Arc<dyn Fn(Request) -> BoxFuture<HandlerResult> + Send + Sync>;

/// Build a [`Handler`] from an async function
///
/// # Example
///
/// ```rust
/// use ferrapi_core::{handler_fn, ApiError, Request};
/// use serde_json::json;
///
/// let handler = handler_fn(|_req: Request| async move {
///     Ok::<_, ApiError>(json!({"hello": "world"}))
/// });
/// ```
pub fn handler_fn<F, Fut, R>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |req: Request| {
        let fut = f(req);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) }) as BoxFuture<HandlerResult>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;

    #[tokio::test]
    async fn handler_fn_converts_return_values() {
        let handler = handler_fn(|req: Request| async move {
            Ok::<_, ApiError>((StatusCode::ACCEPTED, req.path().to_string()))
        });

        let req: Request = http::Request::builder()
            .uri("/jobs")
            .body(Bytes::new())
            .unwrap()
            .into();
        let response = handler(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn handler_fn_propagates_errors() {
        let handler = handler_fn(|_req: Request| async move {
            Err::<(), _>(ApiError::internal("boom"))
        });

        let req: Request = http::Request::builder()
            .uri("/")
            .body(Bytes::new())
            .unwrap()
            .into();
        assert_eq!(handler(req).await.unwrap_err().message, "boom");
    }
}
