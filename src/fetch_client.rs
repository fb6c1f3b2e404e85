// Category fetches over HTTP (reqwest). Every failure is normalized into a FetchError;
// nothing here touches aggregator state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::models::ApiEnvelope;
use crate::version::USER_AGENT;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Fully resolved request target for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub method: HttpMethod,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Endpoint {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            query: Vec::new(),
            body,
        }
    }
}

/// Successful payload plus the server's refresh hints.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub data: serde_json::Value,
    pub last_updated: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
}

impl FetchResponse {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            last_updated: None,
            next_update: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Request never reached the server (DNS, refused connection, reset).
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// Non-2xx; `message` is the envelope's `error` when the body could be parsed.
    #[error("HTTP {status}")]
    Http { status: u16, message: Option<String> },
    #[error("Invalid response: {0}")]
    Parse(String),
    /// 2xx with `success: false`.
    #[error("{0}")]
    Application(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// Source of category payloads. The aggregator only talks to this trait, so tests can
/// drive it with deterministic fakes.
pub trait DataSource: Send + Sync {
    fn fetch<'a>(&'a self, endpoint: &'a Endpoint)
    -> BoxFuture<'a, Result<FetchResponse, FetchError>>;
}

pub struct HttpFetchClient {
    client: reqwest::Client,
}

impl HttpFetchClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    #[instrument(skip(self, endpoint), fields(url = %endpoint.url, method = ?endpoint.method))]
    pub async fn send(&self, endpoint: &Endpoint) -> Result<FetchResponse, FetchError> {
        let request = match endpoint.method {
            HttpMethod::Get => self.client.get(&endpoint.url),
            HttpMethod::Post => self.client.post(&endpoint.url),
        };
        let request = if endpoint.query.is_empty() {
            request
        } else {
            request.query(&endpoint.query)
        };
        let request = match &endpoint.body {
            Some(body) => request.json(body),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        decode_response(status, &body)
    }
}

impl DataSource for HttpFetchClient {
    fn fetch<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        self.send(endpoint).boxed()
    }
}

/// Map an HTTP status + raw body to a result. Non-2xx fails even if the body is unparseable;
/// `success: false` fails even on 200.
pub fn decode_response(status: u16, body: &[u8]) -> Result<FetchResponse, FetchError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_slice::<ApiEnvelope>(body)
            .ok()
            .and_then(|e| e.error);
        return Err(FetchError::Http { status, message });
    }

    let envelope: ApiEnvelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    if !envelope.success {
        return Err(FetchError::Application(
            envelope
                .error
                .unwrap_or_else(|| "request reported failure".into()),
        ));
    }

    Ok(FetchResponse {
        data: envelope.data.unwrap_or(serde_json::Value::Null),
        last_updated: envelope.last_updated,
        next_update: envelope.next_update,
    })
}
