//! The network seam of the pipeline.

use async_trait::async_trait;
use relay_adapter::http::HttpClient;
use relay_adapter::{AdapterError, OutgoingRequest, UpstreamResponse};

/// Performs one upstream attempt. Retries and deadlines are the caller's.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn call(&self, adapter: &str, req: &OutgoingRequest) -> Result<UpstreamResponse, AdapterError>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpUpstream {
    client: HttpClient,
}

impl HttpUpstream {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn call(&self, adapter: &str, req: &OutgoingRequest) -> Result<UpstreamResponse, AdapterError> {
        self.client.execute(adapter, req).await
    }
}
