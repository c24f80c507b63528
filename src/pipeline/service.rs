//! tower interop.
//!
//! A [`Pipeline`] is a `tower::Service<RequestContext>`, and any such service
//! can terminate a pipeline through [`ServiceTransport`].

use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};

use crate::context::{RequestContext, Response};
use crate::error::{PipelineError, Result};
use crate::pipeline::composer::Pipeline;
use crate::pipeline::policy::Transport;

impl Service<RequestContext> for Pipeline {
    type Response = Response;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<Response>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: RequestContext) -> Self::Future {
        let pipeline = self.clone();
        Box::pin(async move { pipeline.call(ctx).await })
    }
}

/// Adapts a `tower::Service` into the terminal transport of a pipeline.
///
/// The service is cloned per call, as tower services expect exclusive
/// access between `poll_ready` and `call`.
#[derive(Clone)]
pub struct ServiceTransport<S> {
    inner: S,
}

impl<S> ServiceTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> Transport for ServiceTransport<S>
where
    S: Service<RequestContext, Response = Response, Error = PipelineError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    async fn call(&self, ctx: RequestContext) -> Result<Response> {
        self.inner.clone().oneshot(ctx).await
    }
}
