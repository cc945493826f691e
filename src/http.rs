//! §6 "HTTP interface for LOAD": the fetch boundary a host application
//! implements to satisfy `LOAD JSON FROM <url> ...`. Interface-only per the
//! HTTP client Non-goal — this crate ships the contract, not a client.
//! Grounded on the teacher's `server::clickhouse_client` request/response
//! split, generalized from "talks to ClickHouse" to "talks to anything."

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        FetchRequest { url: url.into(), method: HttpMethod::Get, headers: HashMap::new(), body: None }
    }

    /// `POST { ... }` in a LOAD clause (§4.5): a `Content-Type:
    /// application/json` header is added unless `HEADERS { ... }` overrides
    /// it.
    pub fn post(url: impl Into<String>, body: String) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        FetchRequest { url: url.into(), method: HttpMethod::Post, headers, body: Some(body) }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Transport(String),
    #[error("received HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Host-supplied network boundary. The `Load` operation calls this and
/// parses the response as JSON; errors are wrapped as `Failed to load data
/// from <url>. Error: <cause>` (§6).
#[async_trait::async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// A fetcher that always fails; useful as a default for engines that never
/// issue `LOAD`, and in tests that assert the interface is exercised only
/// when expected.
pub struct UnconfiguredFetcher;

#[async_trait::async_trait]
impl HttpFetcher for UnconfiguredFetcher {
    async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, FetchError> {
        Err(FetchError::Transport(format!("no HttpFetcher configured; cannot fetch {}", req.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_request_defaults_json_content_type() {
        let req = FetchRequest::post("http://example.test", "{}".to_string());
        assert_eq!(req.headers.get("Content-Type"), Some(&"application/json".to_string()));
    }

    #[test]
    fn explicit_headers_override_default_content_type() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        let req = FetchRequest::post("http://example.test", "{}".to_string()).with_headers(headers);
        assert_eq!(req.headers.get("Content-Type"), Some(&"text/plain".to_string()));
    }

    #[tokio::test]
    async fn unconfigured_fetcher_always_errors() {
        let result = UnconfiguredFetcher.fetch(FetchRequest::get("http://example.test")).await;
        assert!(result.is_err());
    }
}
