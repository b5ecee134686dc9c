pub mod html;
pub mod stitch;

use anyhow::{Context, Result, anyhow};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;

/// One headless Chrome tab driven through a fixed navigate/scroll/screenshot
/// sequence. All calls block; callers run the whole session on the blocking
/// pool.
pub struct CaptureSession {
    _browser: Browser,
    tab: Arc<Tab>,
    scroll_wait: Duration,
    element_wait: Duration,
}

impl CaptureSession {
    pub fn open(
        viewport: (u32, u32),
        user_agent: Option<&str>,
        scroll_wait: Duration,
        element_wait: Duration,
    ) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some(viewport))
            .build()
            .map_err(|err| anyhow!("failed to build browser launch options: {}", err))?;
        let browser = Browser::new(options).with_context(|| "failed to launch headless chrome")?;
        let tab = browser
            .new_tab()
            .with_context(|| "failed to open browser tab")?;
        if let Some(agent) = user_agent {
            tab.set_user_agent(agent, None, None)
                .with_context(|| "failed to set user agent")?;
        }
        Ok(Self {
            _browser: browser,
            tab,
            scroll_wait,
            element_wait,
        })
    }

    /// Navigates, waits a fixed settle period, then scrolls to the bottom
    /// repeatedly until the document height stops growing, so lazy-loaded
    /// content is materialized.
    pub fn goto_and_settle(&self, url: &str, initial_wait: Duration) -> Result<()> {
        self.tab
            .navigate_to(url)
            .with_context(|| format!("failed to navigate to {}", url))?;
        self.tab
            .wait_until_navigated()
            .with_context(|| "navigation did not complete")?;
        std::thread::sleep(initial_wait);

        let mut last_height = self.scroll_height()?;
        loop {
            self.tab
                .evaluate("window.scrollTo(0, document.body.scrollHeight);", false)
                .with_context(|| "failed to scroll page")?;
            std::thread::sleep(self.scroll_wait);
            let new_height = self.scroll_height()?;
            if new_height == last_height {
                break;
            }
            last_height = new_height;
        }
        Ok(())
    }

    fn scroll_height(&self) -> Result<i64> {
        let result = self
            .tab
            .evaluate("document.body.scrollHeight", false)
            .with_context(|| "failed to read scroll height")?;
        result
            .value
            .as_ref()
            .and_then(|value| value.as_i64())
            .ok_or_else(|| anyhow!("scroll height is not a number"))
    }

    /// Screenshots every element matching the selector, in document order.
    /// A failing element is logged and skipped; zero matches yields an empty
    /// vec rather than an error.
    pub fn capture_sections(&self, selector: &str) -> Result<Vec<Vec<u8>>> {
        let elements = match self.tab.find_elements(selector) {
            Ok(elements) => elements,
            Err(err) => {
                tracing::info!("no elements found for selector {}: {}", selector, err);
                return Ok(Vec::new());
            }
        };
        tracing::info!("found {} elements for selector {}", elements.len(), selector);

        let mut screenshots = Vec::new();
        for (idx, element) in elements.iter().enumerate() {
            let shot = element
                .scroll_into_view()
                .map_err(|err| anyhow!("scroll_into_view: {}", err))
                .and_then(|_| {
                    std::thread::sleep(self.element_wait);
                    element
                        .capture_screenshot(CaptureScreenshotFormatOption::Png)
                        .map_err(|err| anyhow!("capture_screenshot: {}", err))
                });
            match shot {
                Ok(bytes) => {
                    tracing::debug!("captured section {}", idx);
                    screenshots.push(bytes);
                }
                Err(err) => {
                    tracing::warn!("skipping section {}: {}", idx, err);
                }
            }
        }
        Ok(screenshots)
    }

    /// Serializes the rendered DOM of the current page.
    pub fn page_html(&self) -> Result<String> {
        self.tab
            .get_content()
            .with_context(|| "failed to read page content")
    }
}
