//! HTTP upstream: executes an `OutgoingRequest` against the provider.
//!
//! This is the IO boundary. It does not retry or classify beyond
//! separating deadline expiry (`AdapterError::Timeout`) from transport
//! failures (`AdapterError::Http`); retry policy belongs to the caller.

use crate::error::{AdapterError, Result};
use crate::request::{OutgoingRequest, UpstreamResponse};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Execute one attempt under the request's own deadline.
    pub async fn execute(&self, adapter: &str, req: &OutgoingRequest) -> Result<UpstreamResponse> {
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|_| AdapterError::Http(format!("unsupported method: {}", req.method)))?;

        let mut builder = self
            .client
            .request(method, &req.url)
            .timeout(Duration::from_millis(req.timeout_ms));

        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(|e| classify(adapter, req, e))?;
        let status = resp.status().as_u16();

        let mut headers = BTreeMap::new();
        for (k, v) in resp.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.to_string(), val.to_string());
            }
        }

        let bytes = resp.bytes().await.map_err(|e| classify(adapter, req, e))?;
        Ok(UpstreamResponse::from_bytes(status, headers, &bytes))
    }
}

fn classify(adapter: &str, req: &OutgoingRequest, e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout {
            adapter: adapter.to_string(),
            timeout_ms: req.timeout_ms,
        }
    } else {
        AdapterError::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_method_is_rejected_before_io() {
        let client = HttpClient::new();
        let req = OutgoingRequest::new("NOT A METHOD", "http://127.0.0.1:9/x");
        let err = client.execute("test-api", &req).await.unwrap_err();
        assert!(err.to_string().contains("unsupported method"), "{err}");
    }

    #[tokio::test]
    async fn connection_refused_is_http_error() {
        let client = HttpClient::new();
        let mut req = OutgoingRequest::new("GET", "http://127.0.0.1:9/x");
        req.timeout_ms = 2000;
        match client.execute("test-api", &req).await {
            Err(AdapterError::Http(_)) | Err(AdapterError::Timeout { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
