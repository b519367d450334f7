//! Fetching of metadata documents and tile payloads.
//!
//! The provider never talks to the network directly: every request goes
//! through a [`Fetcher`]. [`HttpFetcher`] is the reqwest-backed implementation;
//! tests and embedders can substitute their own.

use std::future::Future;
use std::pin::Pin;

use reqwest::Url;

use crate::error::{Error, Result};

/// Future type for fetch operations.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// A GET request for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// A request with no extra headers.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The value of the first header named `name`, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Retrieves raw bytes for a request.
///
/// Implementations map a non-success HTTP status to [`Error::HttpStatus`] so
/// the provider can tell a missing resource from a transport failure.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> FetchFuture<'_>;
}

/// [`Fetcher`] over a reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client, e.g. with timeouts or a proxy.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> FetchFuture<'_> {
        let url = request.url.to_string();
        let mut builder = self.http.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        Box::pin(async move {
            tracing::debug!(url, "fetching");

            let response = builder.send().await.map_err(|e| Error::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    url,
                    status: status.as_u16(),
                });
            }

            let data = response.bytes().await.map_err(|e| Error::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;

            tracing::debug!(url, bytes = data.len(), "fetched");
            Ok(data.to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let url = Url::parse("https://example.com/tiles/0/0/0.terrain").unwrap();
        let request =
            FetchRequest::get(url.clone()).with_header("Accept", "application/octet-stream");
        assert_eq!(request.url, url);
        assert_eq!(request.header("accept"), Some("application/octet-stream"));
        assert_eq!(request.header("range"), None);
    }
}
