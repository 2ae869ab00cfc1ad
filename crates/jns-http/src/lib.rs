//! Thin reqwest wrapper shared by the Jira and Notion clients.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "jns-http";

/// Request settings. Without a timeout reqwest's own defaults apply.
#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            Self::Decode { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send and decode a JSON body. Any non-2xx status becomes
    /// [`HttpError::Status`] with the response text attached.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, HttpError> {
        let (url, bytes) = self.send_checked(request).await?;
        serde_json::from_slice(&bytes).map_err(|source| HttpError::Decode { url, source })
    }

    /// Send and discard the body once the status is known to be a success.
    pub async fn send(&self, request: RequestBuilder) -> Result<(), HttpError> {
        self.send_checked(request).await.map(|_| ())
    }

    async fn send_checked(&self, request: RequestBuilder) -> Result<(String, Vec<u8>), HttpError> {
        let request = request.build()?;
        let method = request.method().clone();
        let url = request.url().to_string();
        let span = info_span!("http_request", %method, url = %url);

        async {
            let resp = self.client.execute(request).await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(status_error(status, url, body));
            }
            let bytes = resp.bytes().await?.to_vec();
            debug!(bytes = bytes.len(), "response received");
            Ok::<_, HttpError>((url, bytes))
        }
        .instrument(span)
        .await
    }
}

fn status_error(status: StatusCode, url: String, body: String) -> HttpError {
    HttpError::Status {
        status: status.as_u16(),
        url,
        body,
    }
}
