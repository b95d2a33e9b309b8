//! A2A target transport: outbound JSON-RPC over HTTP.
//!
//! Grounded on the teacher's `turbomcp-http::transport` client path
//! (`reqwest::Client::post` with a JSON body, status checked before the
//! body is parsed), trimmed to one-shot request/response — no session
//! negotiation, no SSE upgrade, since A2A targets here are plain JSON-RPC
//! endpoints.

use std::time::Duration;

use super::{CancelSignal, UpstreamInvoker, UpstreamRequest, UpstreamResponse, UpstreamTransportFailure};

/// Where to reach the HTTP endpoint backing an A2A target.
#[derive(Debug, Clone)]
pub struct A2aHttpConfig {
    pub url: String,
    pub request_timeout: Duration,
}

/// Invokes an A2A target by POSTing the JSON-RPC payload and parsing the
/// response body as JSON.
pub struct A2aHttpInvoker {
    client: reqwest::Client,
    config: A2aHttpConfig,
}

impl A2aHttpInvoker {
    /// Builds an invoker against `config`, reusing one `reqwest::Client`
    /// (and its connection pool) for the target's lifetime.
    #[must_use]
    pub fn new(config: A2aHttpConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait::async_trait]
impl UpstreamInvoker for A2aHttpInvoker {
    async fn invoke(
        &self,
        request: UpstreamRequest,
        mut cancel: CancelSignal,
    ) -> Result<UpstreamResponse, UpstreamTransportFailure> {
        let started = tokio::time::Instant::now();

        let send = self
            .client
            .post(&self.config.url)
            .json(&request.payload)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpstreamTransportFailure("cancelled before upstream responded".to_string())),
            result = send => result.map_err(|e| UpstreamTransportFailure(format!("POST {}: {e}", self.config.url)))?,
        };

        if !response.status().is_success() {
            return Err(UpstreamTransportFailure(format!(
                "{} responded with {}",
                self.config.url,
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UpstreamTransportFailure(format!("decoding response body: {e}")))?;

        Ok(UpstreamResponse {
            body,
            upstream_latency: started.elapsed(),
        })
    }
}
