//! Request/response values exchanged between the host, the cache worker and the network.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// How the host issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Anything fetched by a page (scripts, images, API calls)
  Subresource,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    Self {
      method: Method::POST,
      url,
      mode: RequestMode::Subresource,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(body),
    }
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// A captured or synthesized response.
///
/// Bodies are owned bytes, so storing a copy in the cache is an explicit `clone()`
/// and the caller still receives the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status_text.into(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// JSON body with a matching content type.
  pub fn json(body: Vec<u8>) -> Self {
    Self {
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      ..Self::new(200, "OK", body)
    }
  }

  /// What the worker answers when neither cache nor network can serve a request.
  pub fn service_unavailable() -> Self {
    Self::new(503, "Service Unavailable", "Offline content not available")
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network request to {url} failed: {reason}")]
  Network { url: Url, reason: String },

  #[error("no cached fallback for {0}")]
  NoFallback(Url),
}

/// Anything that can perform a request on the worker's behalf.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Network fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client })
  }

  /// Whether `url` answers at all. Any HTTP status counts as reachable.
  pub async fn reachable(&self, url: &Url) -> bool {
    self.client.head(url.clone()).send().await.is_ok()
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let network_error = |e: reqwest::Error| FetchError::Network {
      url: request.url.clone(),
      reason: e.to_string(),
    };

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(network_error)?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await.map_err(network_error)?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_service_unavailable_is_synthesized_503() {
    let response = Response::service_unavailable();
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.body, b"Offline content not available");
    assert!(!response.is_ok());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::json(b"{}".to_vec());
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    assert_eq!(response.header("etag"), None);
  }
}
