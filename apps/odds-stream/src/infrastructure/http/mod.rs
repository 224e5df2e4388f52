//! HTTP Fetch Adapter
//!
//! [`FetchPort`] implementation over a shared `reqwest` client. The client
//! carries the configured user agent and per-request timeout; request
//! descriptors supply method, query and extra headers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};

use crate::application::ports::{FetchError, FetchPort};
use crate::domain::pipeline::{FetchRequest, HttpMethod};
use crate::infrastructure::config::SportsbookSettings;

/// reqwest implementation of [`FetchPort`].
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// Build a fetcher with the given user agent and timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Build a fetcher from sportsbook settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn from_settings(settings: &SportsbookSettings) -> Result<Self, reqwest::Error> {
        Self::new(&settings.user_agent, settings.http_timeout)
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn headers_for(request: &FetchRequest) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let invalid = |message: String| FetchError::InvalidRequest {
            url: request.url(),
            message,
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

const fn method_for(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    }
}

#[async_trait]
impl FetchPort for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let url = request.url();
        let headers = headers_for(request)?;

        let response = self
            .client
            .request(method_for(request.method), &url)
            .query(&request.query)
            .headers(headers)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        tracing::info!(
            method = request.method.as_str(),
            url = %url,
            status = status.as_u16(),
            "Requested API response"
        );

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await.map_err(|e| FetchError::Body {
            url: url.clone(),
            message: e.to_string(),
        })?;

        tracing::debug!(url = %url, bytes = body.len(), body = %String::from_utf8_lossy(&body), "API response body");
        Ok(body.to_vec())
    }
}
