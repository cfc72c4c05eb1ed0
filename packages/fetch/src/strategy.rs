//! Cache-first fetch with transport classification.
//!
//! Every fetch resolves to a [`FetchOutcome`] rather than an error: the
//! pipeline needs to record *why* a page could not be fetched, so transport
//! failures are classified into terminal statuses instead of being
//! propagated. `Err` from these methods means the cache itself failed, not
//! the network.

use std::sync::Arc;
use std::time::Duration;

use recrawl_shared::{HttpConfig, RenderOptions, RequestOptions, Result, Status};
use recrawl_store::PageCache;
use tracing::{debug, warn};
use url::Url;

use crate::browser::BrowserSession;
use crate::decode::decode_body;
use crate::http::{HttpFetcher, HttpResponse};

/// How long a batch stays paused after the upstream refuses a request.
pub const BLOCKED_PAUSE: Duration = Duration::from_secs(24 * 60 * 60);

/// The classified result of fetching one URL.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Usable page text, either live or from the cache.
    Fetched { text: String, from_cache: bool },
    /// The item is finished at this status without content.
    Terminal(Status),
    /// The upstream refused the request; the whole batch should pause.
    Throttled { pause: Duration },
}

/// Cache-first fetcher shared by every worker in a batch.
pub struct FetchStrategy {
    cache: Arc<PageCache>,
    http: HttpFetcher,
}

impl FetchStrategy {
    pub fn new(cache: Arc<PageCache>, http_config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            cache,
            http: HttpFetcher::new(http_config)?,
        })
    }

    /// Fetch `url` over plain HTTP, consulting the cache first.
    pub async fn fetch_http(
        &self,
        url: &Url,
        ignore_cache: bool,
        options: &RequestOptions,
    ) -> Result<FetchOutcome> {
        if let Some(text) = self.try_cache(url, ignore_cache).await? {
            return Ok(FetchOutcome::Fetched {
                text,
                from_cache: true,
            });
        }

        let response = match self.http.get(url, options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "request failed");
                return Ok(FetchOutcome::Terminal(Status::TransportError));
            }
        };

        Ok(classify_response(url, response))
    }

    /// Render `url` in the batch browser, consulting the cache first.
    ///
    /// Chrome does not surface the HTTP status of the main document here,
    /// so any render failure is treated as retryable.
    pub async fn fetch_browser(
        &self,
        session: &BrowserSession,
        url: &Url,
        ignore_cache: bool,
        options: &RenderOptions,
    ) -> Result<FetchOutcome> {
        if let Some(text) = self.try_cache(url, ignore_cache).await? {
            return Ok(FetchOutcome::Fetched {
                text,
                from_cache: true,
            });
        }

        match session.render(url, options).await {
            Ok(text) => Ok(FetchOutcome::Fetched {
                text,
                from_cache: false,
            }),
            Err(e) => {
                warn!(%url, error = %e, "render failed");
                Ok(FetchOutcome::Terminal(Status::TransportError))
            }
        }
    }

    async fn try_cache(&self, url: &Url, ignore_cache: bool) -> Result<Option<String>> {
        if ignore_cache {
            return Ok(None);
        }
        let hit = self.cache.get(url.as_str()).await?;
        if hit.is_some() {
            debug!(%url, "cache hit");
        }
        Ok(hit)
    }
}

fn classify_response(url: &Url, response: HttpResponse) -> FetchOutcome {
    match response.status {
        200..=299 => {
            let text = decode_body(&response.body, response.content_type.as_deref(), url);
            FetchOutcome::Fetched {
                text,
                from_cache: false,
            }
        }
        403 => {
            warn!(%url, "upstream refused the request, backing off");
            FetchOutcome::Throttled {
                pause: BLOCKED_PAUSE,
            }
        }
        404 => {
            debug!(%url, "upstream reports the page gone");
            FetchOutcome::Terminal(Status::UpstreamGone)
        }
        status => {
            // Anything else (5xx, odd 4xx, unfollowed redirects) is
            // retryable on a later batch.
            warn!(%url, status, "unexpected response status");
            FetchOutcome::Terminal(Status::TransportError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_strategy() -> FetchStrategy {
        let tmp = std::env::temp_dir().join(format!("recrawl_fetch_{}.db", Uuid::now_v7()));
        let cache = Arc::new(PageCache::open(&tmp).await.expect("open test cache"));
        FetchStrategy::new(cache, &HttpConfig::default()).expect("build strategy")
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn ok_response_is_fetched_live() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/page"), false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                text: "<html>hi</html>".to_string(),
                from_cache: false,
            }
        );
    }

    #[tokio::test]
    async fn forbidden_pauses_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/blocked"), false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(
            outcome,
            FetchOutcome::Throttled {
                pause: BLOCKED_PAUSE
            }
        );
    }

    #[tokio::test]
    async fn not_found_is_upstream_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/missing"), false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(outcome, FetchOutcome::Terminal(Status::UpstreamGone));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/broken"), false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(outcome, FetchOutcome::Terminal(Status::TransportError));
    }

    #[tokio::test]
    async fn connection_refused_is_retryable() {
        let strategy = test_strategy().await;
        let unreachable = Url::parse("http://127.0.0.1:1/page").unwrap();
        let outcome = strategy
            .fetch_http(&unreachable, false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(outcome, FetchOutcome::Terminal(Status::TransportError));
    }

    #[tokio::test]
    async fn cache_hit_skips_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("live"))
            .expect(0)
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let target = url(&server, "/cached");
        strategy
            .cache
            .set(target.as_str(), "local copy", chrono::Duration::hours(1))
            .await
            .unwrap();

        let outcome = strategy
            .fetch_http(&target, false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                text: "local copy".to_string(),
                from_cache: true,
            }
        );
    }

    #[tokio::test]
    async fn ignore_cache_forces_a_live_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("live"))
            .expect(1)
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let target = url(&server, "/page");
        strategy
            .cache
            .set(target.as_str(), "stale local copy", chrono::Duration::hours(1))
            .await
            .unwrap();

        let outcome = strategy
            .fetch_http(&target, true, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                text: "live".to_string(),
                from_cache: false,
            }
        );
    }

    #[tokio::test]
    async fn per_request_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .and(header("x-api-key", "s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_string("granted"))
            .mount(&server)
            .await;

        let mut options = RequestOptions::default();
        options
            .headers
            .insert("x-api-key".to_string(), "s3cr3t".to_string());

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/private"), false, &options)
            .await
            .expect("fetch");

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                text: "granted".to_string(),
                from_cache: false,
            }
        );
    }

    #[tokio::test]
    async fn per_request_timeout_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let options = RequestOptions {
            timeout_secs: Some(1),
            ..Default::default()
        };

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/slow"), false, &options)
            .await
            .expect("fetch");

        assert_eq!(outcome, FetchOutcome::Terminal(Status::TransportError));
    }

    #[tokio::test]
    async fn redirects_are_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/old"), false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                text: "landed".to_string(),
                from_cache: false,
            }
        );
    }

    #[tokio::test]
    async fn declared_charset_applies_to_live_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latin1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                vec![0x63, 0x61, 0x66, 0xE9],
                "text/html; charset=windows-1252",
            ))
            .mount(&server)
            .await;

        let strategy = test_strategy().await;
        let outcome = strategy
            .fetch_http(&url(&server, "/latin1"), false, &RequestOptions::default())
            .await
            .expect("fetch");

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                text: "café".to_string(),
                from_cache: false,
            }
        );
    }
}
