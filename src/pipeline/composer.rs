//! Pipeline composition.
//!
//! # Responsibilities
//! - Freeze an ordered list of policies plus a transport into one callable
//! - Record call counts and latency for every invocation
//! - Expose the composed chain to introspection tooling
//!
//! # Design Decisions
//! - Built once, invoked many times; the chain is shared behind an `Arc`
//! - The first policy added is the outermost one
//! - Policy instances keep their own long-lived state between invocations

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::context::{RequestContext, Response};
use crate::error::Result;
use crate::inspect::{self, Kind, Metadata, PolicyOptions};
use crate::observability::metrics;
use crate::pipeline::policy::{Chain, Next, Policy, Transport};

/// A composed chain of policies ending in a transport.
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<Chain>,
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Run one request through the chain.
    pub async fn call(&self, ctx: RequestContext) -> Result<Response> {
        let start = Instant::now();
        let method = ctx.method().clone();
        let request_id = ctx.request_id();

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            url = %ctx.url(),
            policies = self.chain.policies.len(),
            "Dispatching request"
        );

        let result = Next::new(self.chain.clone()).run(ctx).await;

        let outcome = match &result {
            Ok(resp) => {
                tracing::debug!(request_id = %request_id, status = resp.status(), "Request completed");
                metrics::outcome_status(resp.status())
            }
            Err(e) => {
                tracing::debug!(request_id = %request_id, error = %e, "Request failed");
                metrics::outcome_error(e)
            }
        };
        metrics::record_call(method.as_str(), outcome, start);

        result
    }

    /// Number of policies in front of the transport.
    pub fn len(&self) -> usize {
        self.chain.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.policies.is_empty()
    }

    /// Describe the chain, outermost policy first, transport last.
    pub fn describe(&self) -> Metadata {
        let mut children: Vec<Metadata> = self
            .chain
            .policies
            .iter()
            .map(|p| inspect::describe_or_anonymous(p, Kind::Policy))
            .collect();
        children.push(inspect::describe_or_anonymous(
            &self.chain.transport,
            Kind::Transport,
        ));

        Metadata {
            id: "pipeline".to_string(),
            name: "pipeline".to_string(),
            kind: Kind::Other,
            options: PolicyOptions::None,
            children,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.chain.policies.len())
            .finish()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    policies: Vec<Arc<dyn Policy>>,
}

impl PipelineBuilder {
    /// Append a policy. Earlier policies wrap later ones.
    pub fn policy<P: Policy>(mut self, policy: Arc<P>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Append an already type-erased policy.
    pub fn boxed_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Terminate the chain with `transport`.
    pub fn transport<T: Transport>(self, transport: Arc<T>) -> Pipeline {
        self.boxed_transport(transport)
    }

    pub fn boxed_transport(self, transport: Arc<dyn Transport>) -> Pipeline {
        Pipeline {
            chain: Arc::new(Chain {
                policies: self.policies,
                transport,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{policy_fn, transport_fn};
    use http::header::{HeaderValue, AUTHORIZATION};
    use http::Method;
    use std::sync::Mutex;

    fn ctx() -> RequestContext {
        RequestContext::parse(Method::GET, "https://api.example.com/items").unwrap()
    }

    #[tokio::test]
    async fn zero_policies_behave_like_the_transport() {
        let transport = Arc::new(transport_fn(|ctx: RequestContext| async move {
            Ok(Response::new(200).with_data(ctx.url().path().to_string()))
        }));
        let direct = transport.call(ctx()).await.unwrap();
        let piped = Pipeline::builder()
            .transport(transport.clone())
            .call(ctx())
            .await
            .unwrap();
        assert_eq!(direct, piped);
    }

    #[tokio::test]
    async fn first_policy_is_outermost() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mk = |label: &'static str| {
            let order = order.clone();
            Arc::new(policy_fn(move |ctx: RequestContext, next: Next| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(format!("{}>", label));
                    let resp = next.run(ctx).await;
                    order.lock().unwrap().push(format!("<{}", label));
                    resp
                }
            }))
        };

        let seen = order.clone();
        let pipeline = Pipeline::builder()
            .policy(mk("a"))
            .policy(mk("b"))
            .transport(Arc::new(transport_fn(move |_ctx: RequestContext| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push("T".to_string());
                    Ok(Response::new(204))
                }
            })));

        pipeline.call(ctx()).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a>", "b>", "T", "<b", "<a"]);
    }

    #[tokio::test]
    async fn policies_pass_derived_contexts_down() {
        let pipeline = Pipeline::builder()
            .policy(Arc::new(policy_fn(|ctx: RequestContext, next: Next| async move {
                next.run(ctx.with_header(AUTHORIZATION, HeaderValue::from_static("Bearer secret")))
                    .await
            })))
            .transport(Arc::new(transport_fn(|ctx: RequestContext| async move {
                let auth = ctx.headers()["authorization"].to_str().unwrap().to_string();
                Ok(Response::new(200).with_data(auth))
            })));

        let resp = pipeline.call(ctx()).await.unwrap();
        assert_eq!(&resp.data()[..], b"Bearer secret");
    }

    #[tokio::test]
    async fn short_circuit_skips_the_transport() {
        let pipeline = Pipeline::builder()
            .policy(Arc::new(policy_fn(|_ctx: RequestContext, _next: Next| async move {
                Ok(Response::new(418))
            })))
            .transport(Arc::new(transport_fn(|_ctx: RequestContext| async move {
                Err(crate::PipelineError::transport("should not be reached"))
            })));

        assert_eq!(pipeline.call(ctx()).await.unwrap().status(), 418);
    }

    #[test]
    fn describe_lists_policies_then_transport() {
        let pipeline = Pipeline::builder()
            .policy(Arc::new(policy_fn(|ctx: RequestContext, next: Next| async move {
                next.run(ctx).await
            })))
            .transport(Arc::new(transport_fn(|_ctx: RequestContext| async move {
                Ok(Response::new(200))
            })));

        let tree = pipeline.describe();
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].kind, Kind::Policy);
        assert_eq!(tree.children[1].kind, Kind::Transport);
    }
}
