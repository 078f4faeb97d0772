//! Content source backed by an HTTP rendering backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header, redirect};
use url::Url;

use crate::application::build::{ContentSource, FetchError, FetchResponse};

use super::error::InfraError;

const MAX_REDIRECTS: usize = 5;
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml";

pub struct HttpContentSource {
    client: Client,
}

impl HttpContentSource {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, InfraError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT_HTML));

        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|err| InfraError::http(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(FetchResponse { status, body })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}
