//! Request handler seam
//!
//! The backend's business logic plugs into the server dispatcher through
//! [`RequestHandler`]. A failing or panicking handler never takes the
//! session down: its failure becomes a `Rejected` response.

use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::protocol::{Message, Request, Response};

/// Error type returned by handlers
pub type HandlerError = anyhow::Error;

/// Result type for handler functions
pub type HandlerResult = Result<Response, HandlerError>;

/// Maps one decoded request to one response
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, request: Request) -> HandlerResult {
        (self)(request).await
    }
}

/// A handler that did not produce a response
#[derive(Error, Debug)]
pub enum HandlerFailure {
    #[error("{0:#}")]
    Failed(HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler was cancelled")]
    Cancelled,
}

impl HandlerFailure {
    /// The `Rejected` response reported to the client
    pub fn into_response(self) -> Response {
        Response::rejected(self.to_string())
    }
}

/// Aborts the handler task when the dispatching future is dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `handler` on `request` in its own task so that a panic stays
/// contained. Dropping the returned future cancels the handler.
pub async fn dispatch<H>(handler: Arc<H>, request: Request) -> Result<Response, HandlerFailure>
where
    H: RequestHandler + ?Sized,
{
    let name = request.name();
    let mut task = AbortOnDrop(tokio::spawn(async move { handler.handle(request).await }));

    match (&mut task.0).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            tracing::warn!("Handler failed on {}: {:#}", name, e);
            Err(HandlerFailure::Failed(e))
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            tracing::warn!("Handler panicked on {}: {}", name, message);
            Err(HandlerFailure::Panicked(message))
        }
        Err(_) => Err(HandlerFailure::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DeleteElements;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn delete() -> Request {
        Request::DeleteElements(DeleteElements)
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = Arc::new(|_request: Request| async { Ok(Response::success(3)) });
        let response = dispatch(handler, delete()).await.unwrap();
        assert_eq!(response, Response::success(3));
    }

    #[tokio::test]
    async fn test_error_becomes_rejected() {
        let handler =
            Arc::new(|_request: Request| async { Err(anyhow::anyhow!("no selection")) });
        let failure = dispatch(handler, delete()).await.unwrap_err();
        assert_eq!(failure.into_response(), Response::rejected("no selection"));
    }

    #[tokio::test]
    async fn test_error_context_is_kept() {
        let handler = Arc::new(|_request: Request| async {
            Err(anyhow::anyhow!("element 42 is pinned").context("delete failed"))
        });
        let failure = dispatch(handler, delete()).await.unwrap_err();
        assert_eq!(
            failure.into_response(),
            Response::rejected("delete failed: element 42 is pinned")
        );
    }

    struct Exploding;

    #[async_trait]
    impl RequestHandler for Exploding {
        async fn handle(&self, _request: Request) -> HandlerResult {
            panic!("document is read-only");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_rejected() {
        let failure = dispatch(Arc::new(Exploding), delete()).await.unwrap_err();
        assert!(matches!(failure, HandlerFailure::Panicked(ref m) if m == "document is read-only"));
        assert_eq!(
            failure.into_response(),
            Response::rejected("handler panicked: document is read-only")
        );
    }

    #[tokio::test]
    async fn test_trait_object_handler() {
        let handler: Arc<dyn RequestHandler> = Arc::new(|_request: Request| async {
            HandlerResult::Ok(Response::success(1))
        });
        assert_eq!(
            dispatch(handler, delete()).await.unwrap(),
            Response::success(1)
        );
    }

    #[tokio::test]
    async fn test_dropping_dispatch_cancels_handler() {
        // The sender lives inside the handler task and drops with it
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let handler = Arc::new(move |_request: Request| {
            let held = tx.lock().unwrap().take();
            async move {
                let _held = held;
                std::future::pending::<()>().await;
                HandlerResult::Ok(Response::success(0))
            }
        });

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), dispatch(handler, delete())).await;
        assert!(outcome.is_err());

        let dropped = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("handler task kept running");
        assert!(dropped.is_err());
    }
}
