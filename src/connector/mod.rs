//! Connector boundary.
//!
//! # Responsibilities
//! - Define the session-oriented contract wire transports implement
//! - Adapt any connector into the terminal link of a pipeline
//!
//! # Design Decisions
//! - One session per call; pooling belongs inside the connector if it wants it
//! - The session is always disconnected, whatever the request outcome
//! - A failed disconnect is logged, never allowed to mask the call's result

pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::context::{RequestContext, Response};
use crate::error::Result;
use crate::inspect::{self, Kind, PolicyOptions};
use crate::pipeline::Transport;

pub use simulated::{SimulatedConnector, SimulatedSession};

/// External transport boundary (HTTP, FTP, SMTP, ...).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    async fn connect(&self, uri: &Url) -> Result<Self::Session>;

    async fn request(&self, session: &Self::Session, ctx: RequestContext) -> Result<Response>;

    async fn disconnect(&self, session: Self::Session) -> Result<()>;
}

/// Terminal transport driving a [`Connector`].
pub struct ConnectorTransport<C> {
    connector: C,
}

impl<C: Connector> ConnectorTransport<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// Share and tag the transport for introspection.
    pub fn shared(self, name: &'static str) -> Arc<Self> {
        let arc = Arc::new(self);
        inspect::tag(&arc, name, Kind::Transport, PolicyOptions::None);
        arc
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[async_trait]
impl<C: Connector> Transport for ConnectorTransport<C> {
    async fn call(&self, ctx: RequestContext) -> Result<Response> {
        let request_id = ctx.request_id();
        let session = self.connector.connect(ctx.url()).await?;
        let result = self.connector.request(&session, ctx).await;

        if let Err(e) = self.connector.disconnect(session).await {
            tracing::warn!(request_id = %request_id, error = %e, "Disconnect failed");
        }
        result
    }
}
