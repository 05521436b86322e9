//! In-memory renderer that replays canned pages.
//!
//! Each URL maps to a queue of replies consumed one per navigation; the last
//! reply repeats once the queue is down to one entry. Elements can be
//! registered per URL, optionally appearing only after a number of clicks on
//! that page (multi-step forms). Every navigation, keystroke batch and click is
//! recorded so callers can inspect what the pipeline did.

use super::{RenderContext, Renderer, Selector};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// One canned response for a navigation.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Raw page HTML.
    Html(String),
    /// A JSON body as a browser renders it (inside `<pre>`).
    Json(Value),
    /// The navigation fails with this message.
    Fail(String),
}

impl Reply {
    fn render(&self) -> Result<String> {
        match self {
            Self::Html(html) => Ok(html.clone()),
            Self::Json(value) => Ok(format!(
                "<html><head></head><body><pre style=\"word-wrap: break-word; white-space: pre-wrap;\">{}</pre></body></html>",
                html_escape(&value.to_string())
            )),
            Self::Fail(msg) => Err(anyhow!("{msg}")),
        }
    }
}

/// A recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Navigate(String),
    Type(Selector, String),
    Click(Selector),
}

#[derive(Debug, Clone)]
struct ElementRule {
    url: String,
    selector: Selector,
    after_clicks: usize,
}

#[derive(Default)]
struct ReplayState {
    routes: HashMap<String, VecDeque<Reply>>,
    elements: Vec<ElementRule>,
    clicks: HashMap<String, usize>,
    interactions: Vec<Interaction>,
    refuse_contexts: bool,
    active: usize,
    closed: usize,
}

/// Renderer serving canned replies. Clones share state.
#[derive(Clone, Default)]
pub struct ReplayRenderer {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serve `reply` for every navigation to `url`.
    pub fn route(self, url: impl Into<String>, reply: Reply) -> Self {
        self.route_sequence(url, vec![reply])
    }

    /// Serve `replies` in order for successive navigations to `url`.
    pub fn route_sequence(self, url: impl Into<String>, replies: Vec<Reply>) -> Self {
        self.state()
            .routes
            .insert(url.into(), replies.into_iter().collect());
        self
    }

    /// Shorthand for a JSON route.
    pub fn json(self, url: impl Into<String>, value: Value) -> Self {
        self.route(url, Reply::Json(value))
    }

    /// Register an element present on `url` from the start.
    pub fn element(self, url: impl Into<String>, selector: &str) -> Self {
        self.element_after_clicks(url, selector, 0)
    }

    /// Register an element that appears on `url` after `clicks` clicks there.
    pub fn element_after_clicks(
        self,
        url: impl Into<String>,
        selector: &str,
        clicks: usize,
    ) -> Self {
        self.state().elements.push(ElementRule {
            url: url.into(),
            selector: Selector::parse(selector),
            after_clicks: clicks,
        });
        self
    }

    /// Make `new_context` fail, as when the browser cannot start a tab.
    pub fn refuse_contexts(self) -> Self {
        self.state().refuse_contexts = true;
        self
    }

    /// Everything the contexts did, in order.
    pub fn interactions(&self) -> Vec<Interaction> {
        self.state().interactions.clone()
    }

    /// Number of navigations to `url`.
    pub fn visits(&self, url: &str) -> usize {
        self.state()
            .interactions
            .iter()
            .filter(|i| matches!(i, Interaction::Navigate(u) if u == url))
            .count()
    }

    /// Contexts closed so far.
    pub fn closed_contexts(&self) -> usize {
        self.state().closed
    }
}

#[async_trait]
impl Renderer for ReplayRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let mut state = self.state();
        if state.refuse_contexts {
            bail!("replay renderer refused to open a context");
        }
        state.active += 1;
        Ok(Box::new(ReplayContext {
            state: Arc::clone(&self.state),
            current_url: "about:blank".to_string(),
            current_html: String::new(),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.state().active
    }
}

/// A context of the replay renderer.
pub struct ReplayContext {
    state: Arc<Mutex<ReplayState>>,
    current_url: String,
    current_html: String,
}

impl ReplayContext {
    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_present(&self, selector: &Selector) -> bool {
        let state = self.state();
        let clicks = state.clicks.get(&self.current_url).copied().unwrap_or(0);
        state.elements.iter().any(|r| {
            r.url == self.current_url && &r.selector == selector && clicks >= r.after_clicks
        })
    }
}

#[async_trait]
impl RenderContext for ReplayContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<()> {
        let reply = {
            let mut state = self.state();
            state.interactions.push(Interaction::Navigate(url.to_string()));
            let queue = state
                .routes
                .get_mut(url)
                .ok_or_else(|| anyhow!("navigation failed: no route for {url}"))?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };
        let reply = reply.ok_or_else(|| anyhow!("navigation failed: empty route for {url}"))?;

        self.current_html = reply.render()?;
        self.current_url = url.to_string();
        self.state().clicks.remove(url);
        Ok(())
    }

    async fn get_html(&self) -> Result<String> {
        Ok(self.current_html.clone())
    }

    async fn has_element(&self, selector: &Selector) -> Result<bool> {
        Ok(self.is_present(selector))
    }

    async fn type_text(&mut self, selector: &Selector, text: &str) -> Result<()> {
        if !self.is_present(selector) {
            bail!("element not found: {selector}");
        }
        self.state()
            .interactions
            .push(Interaction::Type(selector.clone(), text.to_string()));
        Ok(())
    }

    async fn click(&mut self, selector: &Selector) -> Result<()> {
        if !self.is_present(selector) {
            bail!("element not found: {selector}");
        }
        let url = self.current_url.clone();
        let mut state = self.state();
        state.interactions.push(Interaction::Click(selector.clone()));
        *state.clicks.entry(url).or_insert(0) += 1;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.state();
        state.active = state.active.saturating_sub(1);
        state.closed += 1;
        Ok(())
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
