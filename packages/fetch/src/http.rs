//! Plain HTTP fetch backend.

use std::time::Duration;

use recrawl_shared::{HttpConfig, RecrawlError, RequestOptions, Result};
use reqwest::Client;
use tracing::debug;
use url::Url;

/// A live HTTP response with undecoded body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw Content-Type header, if present.
    pub content_type: Option<String>,
    /// Response body bytes, decoded later by charset inference.
    pub body: Vec<u8>,
}

/// HTTP backend wrapping a reqwest client built once per pipeline.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build the HTTP client from config.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RecrawlError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Perform a GET and read the full body. Errors are reqwest transport
    /// failures; the caller classifies them.
    pub async fn get(&self, url: &Url, options: &RequestOptions) -> reqwest::Result<HttpResponse> {
        debug!(%url, "live HTTP fetch");

        let mut request = self.client.get(url.as_str());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(secs) = options.timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
