//! The policy contract.
//!
//! A policy receives the request context and a [`Next`] handle for the rest
//! of the chain. It may inspect or derive a new context, call `next` zero or
//! more times, and return whatever response or error it decides on.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::context::{RequestContext, Response};
use crate::error::Result;

/// A unit of composition wrapping the rest of the chain.
#[async_trait]
pub trait Policy: Send + Sync + 'static {
    async fn handle(&self, ctx: RequestContext, next: Next) -> Result<Response>;
}

/// The innermost link: turns a context into a response.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, ctx: RequestContext) -> Result<Response>;
}

/// Frozen chain shared by every invocation of a pipeline.
pub(crate) struct Chain {
    pub(crate) policies: Vec<Arc<dyn Policy>>,
    pub(crate) transport: Arc<dyn Transport>,
}

/// Handle to the remainder of the chain.
///
/// Cheap to clone and `'static`, so a policy may call it several times
/// (retries) or hand the resulting future to another task (dedupe).
#[derive(Clone)]
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    pub(crate) fn new(chain: Arc<Chain>) -> Self {
        Self { chain, index: 0 }
    }

    /// Run the rest of the chain with `ctx`.
    pub fn run(&self, ctx: RequestContext) -> BoxFuture<'static, Result<Response>> {
        let chain = self.chain.clone();
        let index = self.index;
        Box::pin(async move {
            match chain.policies.get(index).cloned() {
                Some(policy) => {
                    let next = Next {
                        chain: chain.clone(),
                        index: index + 1,
                    };
                    policy.handle(ctx, next).await
                }
                None => {
                    let transport = chain.transport.clone();
                    transport.call(ctx).await
                }
            }
        })
    }
}

/// Policy built from a closure. See [`policy_fn`].
pub struct PolicyFn<F> {
    f: F,
}

/// Build a policy from an async closure.
///
/// ```rust,no_run
/// use callguard::pipeline::policy_fn;
/// use http::header::{HeaderValue, AUTHORIZATION};
///
/// let auth = policy_fn(|ctx: callguard::RequestContext, next: callguard::Next| async move {
///     let token = HeaderValue::from_static("Bearer token");
///     next.run(ctx.with_header(AUTHORIZATION, token)).await
/// });
/// # let _ = auth;
/// ```
pub fn policy_fn<F, Fut>(f: F) -> PolicyFn<F>
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    PolicyFn { f }
}

#[async_trait]
impl<F, Fut> Policy for PolicyFn<F>
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn handle(&self, ctx: RequestContext, next: Next) -> Result<Response> {
        (self.f)(ctx, next).await
    }
}

/// Transport built from a closure. See [`transport_fn`].
pub struct TransportFn<F> {
    f: F,
}

/// Build a terminal transport from an async closure.
pub fn transport_fn<F, Fut>(f: F) -> TransportFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    TransportFn { f }
}

#[async_trait]
impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn call(&self, ctx: RequestContext) -> Result<Response> {
        (self.f)(ctx).await
    }
}
