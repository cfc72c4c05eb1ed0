//! Headless-Chrome fetch backend.
//!
//! A [`BrowserSession`] is an exclusive resource: the pipeline launches one
//! per batch, renders every item through it, and shuts it down when the
//! batch ends. The CDP event handler runs on its own task and must keep
//! draining events for the session to make progress; dropping the session
//! aborts it, and [`BrowserSession::shutdown`] closes the Chrome process
//! gracefully first.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::page::Page;
use futures::StreamExt;
use recrawl_shared::{BrowserConfig, RecrawlError, RenderOptions, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// An exclusive headless-Chrome session.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
    default_wait: Option<String>,
    nav_timeout: Duration,
}

impl BrowserSession {
    /// Launch headless Chrome with the given settings.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let user_data_dir =
            std::env::temp_dir().join(format!("recrawl_chrome_{}", std::process::id()));
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| RecrawlError::io(&user_data_dir, e))?;

        let nav_timeout = Duration::from_secs(config.nav_timeout_secs);
        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(nav_timeout)
            .window_size(config.window_width, config.window_height)
            .user_data_dir(user_data_dir.clone())
            .headless_mode(HeadlessMode::default())
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--hide-scrollbars")
            .arg("--mute-audio");
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(PathBuf::from(path));
        }
        let browser_config = builder.build().map_err(RecrawlError::browser)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RecrawlError::browser(format!("failed to launch Chrome: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = ?e, "browser handler event error");
                }
            }
        });

        info!(
            width = config.window_width,
            height = config.window_height,
            "browser session launched"
        );

        Ok(Self {
            browser,
            handler: handler_task,
            user_data_dir: Some(user_data_dir),
            default_wait: config.wait_for_selector.clone(),
            nav_timeout,
        })
    }

    /// Render `url` on a fresh page and return the serialized DOM.
    pub async fn render(&self, url: &Url, options: &RenderOptions) -> Result<String> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RecrawlError::browser(format!("failed to open page: {e}")))?;

        let result = self.render_on(&page, url, options).await;

        if let Err(e) = page.close().await {
            debug!(%url, error = %e, "failed to close page");
        }
        result
    }

    async fn render_on(&self, page: &Page, url: &Url, options: &RenderOptions) -> Result<String> {
        debug!(%url, "rendering page");

        page.goto(url.as_str())
            .await
            .map_err(|e| RecrawlError::browser(format!("{url}: navigation failed: {e}")))?;

        // wait_for_navigation returns when the response arrives; scripted
        // content may still be rendering after that.
        page.wait_for_navigation()
            .await
            .map_err(|e| RecrawlError::browser(format!("{url}: load failed: {e}")))?;

        let selector = options
            .wait_for_selector
            .as_deref()
            .or(self.default_wait.as_deref());
        if let Some(selector) = selector {
            let timeout = options
                .nav_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.nav_timeout);
            self.wait_for_selector(page, selector, timeout).await?;
        }

        page.content()
            .await
            .map_err(|e| RecrawlError::browser(format!("{url}: content read failed: {e}")))
    }

    /// Poll the DOM until `selector` matches or `timeout` elapses.
    async fn wait_for_selector(
        &self,
        page: &Page,
        selector: &str,
        timeout: Duration,
    ) -> Result<()> {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(200);

        loop {
            if page.find_element(selector).await.is_ok() {
                debug!(
                    selector,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "selector appeared"
                );
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(RecrawlError::browser(format!(
                    "timed out waiting for selector {selector:?}"
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Close Chrome gracefully, stop the event handler, and remove the
    /// profile directory.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "failed to close browser cleanly");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "failed to wait for browser exit");
        }
        self.handler.abort();

        // Profile removal must happen after wait(): Chrome holds file locks
        // until the process exits.
        if let Some(dir) = self.user_data_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "failed to remove profile dir");
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(dir) = self.user_data_dir.take() {
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}
