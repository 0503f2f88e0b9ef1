use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{FetchError, PageRenderer, DEFAULT_USER_AGENT};

/// Headless Chromium renderer for listing pages that build their DOM with
/// scripts. Each render launches its own browser and tears it down before
/// returning, whatever the outcome.
#[derive(Debug, Clone)]
pub struct BrowserPageRenderer {
    user_agent: String,
    settle: Duration,
}

impl Default for BrowserPageRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl BrowserPageRenderer {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            settle: Duration::from_secs(2),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

fn browser_err(err: impl std::fmt::Display) -> FetchError {
    FetchError::Browser(err.to_string())
}

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn load(&self, url: &str, user_agent: &str, settle: Duration) -> Result<String, FetchError> {
        let page = self.browser.new_page("about:blank").await.map_err(browser_err)?;
        page.set_user_agent(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(browser_err)?;
        page.goto(url).await.map_err(browser_err)?;
        page.wait_for_navigation().await.map_err(browser_err)?;
        // listings are often injected after the load event
        tokio::time::sleep(settle).await;
        let html = page.content().await.map_err(browser_err)?;
        if let Err(err) = page.close().await {
            debug!(url, error = %err, "page close failed");
        }
        Ok(html)
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "browser close failed");
        }
        if let Err(err) = self.browser.wait().await {
            debug!(error = %err, "browser process wait failed");
        }
        self.handler.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl PageRenderer for BrowserPageRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let config = BrowserConfig::builder()
            .request_timeout(timeout)
            .no_sandbox()
            .build()
            .map_err(FetchError::Browser)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        let mut session = BrowserSession { browser, handler };

        let outcome = tokio::time::timeout(
            timeout,
            session.load(url, &self.user_agent, self.settle),
        )
        .await;
        session.shutdown().await;

        outcome.map_err(|_| FetchError::Timeout {
            url: url.to_string(),
            after: timeout,
        })?
    }
}
