//! Outbound request context.
//!
//! # Responsibilities
//! - Carry method, URL, headers, body and policy options through the chain
//! - Carry the request ID and cancellation token
//! - Offer copy-on-write builders for policies that need a modified request

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue, Method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// Open bag of policy-specific fields.
///
/// Typed values are keyed by their type, so each policy can define its own
/// option struct. Keys nobody knows about at compile time go in `extra`.
#[derive(Clone, Default)]
pub struct Options {
    typed: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    extra: serde_json::Map<String, Value>,
}

impl Options {
    /// Store a typed option, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.typed.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.typed
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("typed", &self.typed.len())
            .field("extra", &self.extra)
            .finish()
    }
}

/// One outbound call as seen by the policies.
///
/// Treat it as immutable: the `with_*` builders consume `self` and return the
/// modified value, so a policy that wants to change the request clones first.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    options: Options,
    request_id: Uuid,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a context with a fresh request ID and its own cancellation token.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            options: Options::default(),
            request_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }

    /// Parse `url` and build a context.
    pub fn parse(method: Method, url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, Url::parse(url)?))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Body length in bytes, zero when there is no body.
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Token that fires when the caller gives up on this request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    /// Set a header, replacing existing values with the same name.
    pub fn with_header(mut self, name: impl IntoHeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_option<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.set_extra(key, value);
        self
    }

    /// Tie this request to a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_header_replaces_every_value() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.append("accept", HeaderValue::from_static("text/plain"));

        let ctx = RequestContext::parse(Method::GET, "https://example.com")
            .unwrap()
            .with_headers(headers);
        assert_eq!(ctx.headers().get_all("Accept").iter().count(), 2);

        let ctx = ctx.with_header(http::header::ACCEPT, HeaderValue::from_static("*/*"));
        let all: Vec<_> = ctx.headers().get_all("accept").iter().collect();
        assert_eq!(all, vec!["*/*"]);
    }

    #[test]
    fn with_builders_leave_the_original_untouched() {
        let original = RequestContext::parse(Method::GET, "https://api.example.com/users").unwrap();
        let derived = original
            .clone()
            .with_header(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer t"))
            .with_body("{}");

        assert!(original.headers().is_empty());
        assert_eq!(original.body_len(), 0);
        assert_eq!(derived.headers()["Authorization"], "Bearer t");
        assert_eq!(derived.body_len(), 2);
        assert_eq!(original.request_id(), derived.request_id());
    }

    #[test]
    fn typed_and_extra_options() {
        #[derive(Debug, PartialEq)]
        struct CacheHint(u32);

        let ctx = RequestContext::parse(Method::GET, "https://example.com")
            .unwrap()
            .with_option(CacheHint(30))
            .with_extra("tenant", Value::from("acme"));

        assert_eq!(ctx.options().get::<CacheHint>(), Some(&CacheHint(30)));
        assert_eq!(ctx.options().get::<String>(), None);
        assert_eq!(ctx.options().extra("tenant"), Some(&Value::from("acme")));
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let ctx = RequestContext::parse(Method::GET, "https://example.com").unwrap();
        let copy = ctx.clone();
        ctx.cancellation().cancel();
        assert!(copy.is_cancelled());
    }
}
