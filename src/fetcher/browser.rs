//! Headless Chromium session shared by every fetch.
//!
//! The browser process is launched on first use and lives until
//! [`ChromiumRenderer::shutdown`]. Callers hold the renderer by reference (or
//! `Arc`) and every render opens its own tab, wrapped in a [`PageGuard`] so the
//! tab is closed whichever way the render ends.

use super::{RenderedPage, Renderer};
use crate::config::FetchConfig;
use crate::error::FetchError;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use std::ops::Deref;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const TAB_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const NAVIGATION_STATUS_JS: &str = r#"(() => {
    const entry = performance.getEntriesByType('navigation')[0];
    return entry && entry.responseStatus ? entry.responseStatus : 0;
})()"#;

/// Closes its tab when dropped, unless [`PageGuard::close`] already did.
pub struct PageGuard {
    page: Option<Page>,
    url: String,
    runtime: tokio::runtime::Handle,
}

impl PageGuard {
    fn new(page: Page, url: &str) -> Self {
        Self {
            page: Some(page),
            url: url.to_string(),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Close the tab, giving up after `limit`. A tab that did not close in
    /// time is left to the drop path.
    pub async fn close(mut self, limit: Duration) {
        let Some(page) = self.page.clone() else {
            return;
        };
        if close_within(page.close(), limit, &self.url).await {
            self.page = None;
        }
    }
}

/// Await a tab close for at most `limit`. Returns whether the close finished,
/// successfully or not.
async fn close_within<F, E>(close: F, limit: Duration, url: &str) -> bool
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, close).await {
        Ok(Ok(())) => {
            debug!(%url, "Closed browser tab");
            true
        }
        Ok(Err(e)) => {
            warn!(%url, error = %e, "Failed to close browser tab");
            true
        }
        Err(_) => {
            warn!(%url, limit_ms = limit.as_millis() as u64, "Closing browser tab timed out");
            false
        }
    }
}

impl Deref for PageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        // Only `close` and `drop` take the page, and both consume the guard.
        self.page.as_ref().expect("page present until the guard is consumed")
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            let url = std::mem::take(&mut self.url);
            self.runtime.spawn(async move {
                if let Err(e) = page.close().await {
                    warn!(%url, error = %e, "Tab cleanup on drop failed");
                }
            });
        }
    }
}

/// Lazily launched headless Chromium implementing [`Renderer`].
pub struct ChromiumRenderer {
    config: FetchConfig,
    browser: OnceCell<RwLock<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumRenderer {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            config: config.clone(),
            browser: OnceCell::new(),
            handler: Mutex::new(None),
        }
    }

    async fn browser(&self) -> Result<&RwLock<Browser>, FetchError> {
        self.browser
            .get_or_try_init(|| async {
                let t0 = Instant::now();
                let mut builder = BrowserConfig::builder()
                    .no_sandbox()
                    .request_timeout(self.config.timeout())
                    .args(vec![
                        "--disable-gpu",
                        "--disable-dev-shm-usage",
                        "--disable-extensions",
                        "--mute-audio",
                    ]);
                if let Some(ref path) = self.config.chrome_executable {
                    builder = builder.chrome_executable(path);
                }
                let browser_config = builder.build().map_err(FetchError::Browser)?;

                let (browser, mut handler) = Browser::launch(browser_config)
                    .await
                    .map_err(|e| FetchError::Browser(e.to_string()))?;

                let task = tokio::spawn(async move {
                    while let Some(event) = handler.next().await {
                        if let Err(e) = event {
                            debug!(error = %e, "Browser handler event error");
                        }
                    }
                });
                if let Ok(mut slot) = self.handler.lock() {
                    *slot = Some(task);
                }

                info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Launched headless browser");
                Ok(RwLock::new(browser))
            })
            .await
    }

    async fn open_page(&self, url: &str) -> Result<PageGuard, FetchError> {
        let browser = self.browser().await?.read().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Navigation(format!("could not open tab: {e}")))?;
        if let Err(e) = page.set_user_agent(self.config.user_agent.as_str()).await {
            debug!(error = %e, "Could not set user agent");
        }
        Ok(PageGuard::new(page, url))
    }

    /// Close the browser if it was ever launched.
    #[instrument(level = "info", skip_all)]
    pub async fn shutdown(&self) {
        if let Some(lock) = self.browser.get() {
            let mut browser = lock.write().await;
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Browser did not close cleanly");
            }
            if let Err(e) = browser.wait().await {
                warn!(error = %e, "Waiting for browser exit failed");
            }
            info!("Browser shut down");
        }
        if let Ok(mut slot) = self.handler.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

fn navigation_error(err: CdpError) -> FetchError {
    let message = err.to_string();
    if message.contains("ERR_NAME_NOT_RESOLVED") || message.contains("ERR_NAME_RESOLUTION_FAILED")
    {
        FetchError::Unresolvable(message)
    } else if matches!(err, CdpError::Timeout) {
        FetchError::Navigation(format!("protocol timeout: {message}"))
    } else {
        FetchError::Navigation(message)
    }
}

async fn navigation_status(page: &Page) -> Option<u16> {
    let result = page.evaluate(NAVIGATION_STATUS_JS).await.ok()?;
    match result.into_value::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(status) => Some(status),
    }
}

impl Renderer for ChromiumRenderer {
    #[instrument(level = "debug", skip(self, timeout))]
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError> {
        let guard = self.open_page(url).await?;
        let result = tokio::time::timeout(timeout, async {
            guard.goto(url).await.map_err(navigation_error)?;
            let status = navigation_status(&guard).await;
            let html = guard.content().await.map_err(navigation_error)?;
            Ok::<_, FetchError>(RenderedPage { html, status })
        })
        .await;
        guard.close(TAB_CLOSE_TIMEOUT).await;

        match result {
            Ok(page) => page,
            Err(_) => Err(FetchError::Timeout(timeout.as_millis() as u64)),
        }
    }

    #[instrument(level = "debug", skip(self, timeout))]
    async fn screenshot_element(
        &self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let guard = self.open_page(url).await?;
        let result = tokio::time::timeout(timeout, async {
            guard.goto(url).await.map_err(navigation_error)?;
            let element = match guard.find_element(selector).await {
                Ok(element) => element,
                Err(_) => return Ok(None),
            };
            let png = element
                .screenshot(CaptureScreenshotFormat::Png)
                .await
                .map_err(navigation_error)?;
            Ok::<_, FetchError>(Some(png))
        })
        .await;
        guard.close(TAB_CLOSE_TIMEOUT).await;

        match result {
            Ok(shot) => shot,
            Err(_) => Err(FetchError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_failures_are_not_transient() {
        use crate::error::{Classify, ErrorKind};
        let err = navigation_error(CdpError::ChromeMessage(
            "net::ERR_NAME_NOT_RESOLVED".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::Fatal);

        let err = navigation_error(CdpError::ChromeMessage(
            "net::ERR_CONNECTION_RESET".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn tab_close_is_bounded() {
        let limit = Duration::from_millis(20);
        let hung = std::future::pending::<Result<(), String>>();
        assert!(!close_within(hung, limit, "https://example.com").await);

        let closed = async { Ok::<(), String>(()) };
        assert!(close_within(closed, limit, "https://example.com").await);

        let failed = async { Err::<(), String>("target gone".to_string()) };
        assert!(close_within(failed, limit, "https://example.com").await);
    }

    #[tokio::test]
    async fn shutdown_without_launch_is_a_no_op() {
        let renderer = ChromiumRenderer::new(&FetchConfig::default());
        renderer.shutdown().await;
        assert!(renderer.browser.get().is_none());
    }
}
