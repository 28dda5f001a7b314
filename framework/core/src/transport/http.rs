use std::{fmt, time::Duration};

use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::value::HttpResponse;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub(crate) fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        write!(f, "{name}")
    }
}

/// Request body attached to an HTTP action.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
}

/// Per-request options for HTTP actions. The timeout falls back to the
/// session timeout when unset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("no base_url configured for http actions")]
    MissingBaseUrl,
    #[error("invalid url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Thin async client for the target service, shared by every action of a
/// session and its forks.
#[derive(Clone, Debug, Default)]
pub struct HttpClient {
    base_url: Option<String>,
    client: Client,
}

impl HttpClient {
    #[must_use]
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn join(&self, path: &str) -> Result<Url, HttpError> {
        let base = self.base_url.as_deref().ok_or(HttpError::MissingBaseUrl)?;
        let raw = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|err| HttpError::InvalidUrl {
            url: raw,
            message: err.to_string(),
        })
    }

    /// Issue one request and capture status plus body text.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        options: &RequestOptions,
        default_timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let url = self.join(path)?;
        debug!(%method, %url, "dispatching http request");

        let mut builder = self
            .client
            .request(method.as_reqwest(), url)
            .timeout(options.timeout.unwrap_or(default_timeout));

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &options.body {
            Some(RequestBody::Json(body)) => builder.json(body),
            Some(RequestBody::Text(body)) => builder.body(body.clone()),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_normalizes_slashes() {
        let client = HttpClient::new(Some("http://localhost:8080/".to_owned()));
        let url = client.join("/status").expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/status");
    }

    #[test]
    fn join_without_base_url_is_an_error() {
        let client = HttpClient::new(None);
        assert!(matches!(client.join("/a"), Err(HttpError::MissingBaseUrl)));
    }
}
