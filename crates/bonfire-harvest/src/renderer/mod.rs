//! Renderer abstraction for the browser that drives the portal.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (Chromium via chromiumoxide in production, an
//! in-memory replay renderer for offline runs and tests).

pub mod chromium;
pub mod replay;

use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// How often element lookups are retried while waiting for presence.
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An element locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    /// Classify a selector string: XPath if it starts with `/` or `(`,
    /// CSS otherwise.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('/') || trimmed.starts_with('(') {
            Self::XPath(trimmed.to_string())
        } else {
            Self::Css(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Css(s) | Self::XPath(s) => s,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css:{s}"),
            Self::XPath(s) => write!(f, "xpath:{s}"),
        }
    }
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab). Cookies persist across navigations.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<()>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Whether an element matching `selector` is currently in the page.
    async fn has_element(&self, selector: &Selector) -> Result<bool>;
    /// Focus the matching element and type `text` into it.
    async fn type_text(&mut self, selector: &Selector, text: &str) -> Result<()>;
    /// Click the matching element.
    async fn click(&mut self, selector: &Selector) -> Result<()>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Poll the candidates in order until one is present or `timeout` elapses.
///
/// Every candidate is tried at least once. Lookup errors count as "not
/// present". Returns the first candidate found.
pub async fn wait_for_any(
    ctx: &dyn RenderContext,
    candidates: &[Selector],
    timeout: Duration,
) -> Option<Selector> {
    let start = Instant::now();
    loop {
        for selector in candidates {
            match ctx.has_element(selector).await {
                Ok(true) => return Some(selector.clone()),
                Ok(false) => {}
                Err(e) => tracing::debug!("lookup of {selector} failed: {e}"),
            }
        }
        if start.elapsed() >= timeout {
            return None;
        }
        tokio::time::sleep(ELEMENT_POLL_INTERVAL.min(timeout)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            Selector::parse("//button[@type='submit']"),
            Selector::XPath("//button[@type='submit']".into())
        );
        assert_eq!(
            Selector::parse("(//input)[1]"),
            Selector::XPath("(//input)[1]".into())
        );
        assert_eq!(
            Selector::parse(" input#password "),
            Selector::Css("input#password".into())
        );
    }

    #[test]
    fn test_selector_display() {
        assert_eq!(Selector::parse("input#a").to_string(), "css:input#a");
        assert_eq!(Selector::parse("//a").to_string(), "xpath://a");
    }
}
