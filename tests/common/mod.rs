//! Shared utilities for integration tests.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use callguard::{transport_fn, RequestContext, Response, Result, Transport};
use http::Method;

/// A programmable transport. `f` receives the zero-based call number.
///
/// Returns the transport and a counter of calls that reached it.
pub fn programmable_transport<F, Fut>(f: F) -> (Arc<dyn Transport>, Arc<AtomicU32>)
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let transport = transport_fn(move |_ctx: RequestContext| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        f(n)
    });
    (Arc::new(transport), calls)
}

/// Transport answering every call with `status`.
#[allow(dead_code)]
pub fn fixed_status(status: u16) -> (Arc<dyn Transport>, Arc<AtomicU32>) {
    programmable_transport(move |_| async move { Ok(Response::new(status)) })
}

pub fn get(url: &str) -> RequestContext {
    RequestContext::parse(Method::GET, url).unwrap()
}

#[allow(dead_code)]
pub fn post(url: &str) -> RequestContext {
    RequestContext::parse(Method::POST, url).unwrap()
}
