//! Authenticated portal session.
//!
//! A session owns one browser context for the whole run and walks the
//! portal's two-step login form:
//!
//! ```text
//! Unauthenticated → EmailSubmitted → PasswordSubmitted → Authenticated
//!        └──────────────┴──────────────────┴──→ Failed
//! ```
//!
//! The form is script-rendered and gives no readiness signal, so each step
//! waits a fixed settle delay before looking for the next field. Success is
//! reported once the final submit went through; no post-login marker is
//! checked, so bad credentials only show up later as an empty discovery.

use crate::config::{Credentials, HarvestConfig};
use crate::renderer::{wait_for_any, RenderContext, Renderer, Selector};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{error, info};

/// Where the login sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    EmailSubmitted,
    PasswordSubmitted,
    Authenticated,
    Failed,
}

impl std::fmt::Display for LoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::EmailSubmitted => write!(f, "email-submitted"),
            Self::PasswordSubmitted => write!(f, "password-submitted"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Login form layout and timing.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    pub login_url: String,
    pub email: Vec<Selector>,
    pub password: Vec<Selector>,
    pub submit: Vec<Selector>,
    pub navigation_timeout_ms: u64,
    /// Bounded wait for each field lookup.
    pub element_timeout: Duration,
    /// Pause after submitting the email, before the password field exists.
    pub password_settle: Duration,
    /// Pause after submitting the password, for the redirect to land.
    pub login_settle: Duration,
}

impl LoginFlow {
    pub fn from_config(config: &HarvestConfig) -> Self {
        let parse = |list: &[String]| -> Vec<Selector> {
            list.iter().map(|s| Selector::parse(s)).collect()
        };
        Self {
            login_url: config.login_url.clone(),
            email: parse(&config.selectors.email),
            password: parse(&config.selectors.password),
            submit: parse(&config.selectors.submit),
            navigation_timeout_ms: config.navigation_timeout_ms,
            element_timeout: config.element_timeout(),
            password_settle: config.password_settle(),
            login_settle: config.login_settle(),
        }
    }
}

/// A browser context plus its login state.
pub struct PortalSession {
    context: Box<dyn RenderContext>,
    state: LoginState,
    failure: Option<String>,
}

impl PortalSession {
    /// Wrap an already opened context.
    pub fn new(context: Box<dyn RenderContext>) -> Self {
        Self {
            context,
            state: LoginState::Unauthenticated,
            failure: None,
        }
    }

    /// Open a fresh context on `renderer`.
    pub async fn open(renderer: &dyn Renderer) -> Result<Self> {
        let context = renderer
            .new_context()
            .await
            .context("failed to open browser context")?;
        Ok(Self::new(context))
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == LoginState::Authenticated
    }

    /// Why the login failed, with the state it failed in.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// The navigable context, for discovery and harvesting.
    pub fn context_mut(&mut self) -> &mut dyn RenderContext {
        self.context.as_mut()
    }

    /// Run the login sequence. Never returns an error: any failure moves the
    /// session to [`LoginState::Failed`] and yields `false`.
    pub async fn login(&mut self, flow: &LoginFlow, credentials: &Credentials) -> bool {
        if self.state == LoginState::Failed {
            return false;
        }
        info!("attempting login");
        match self.drive_login(flow, credentials).await {
            Ok(()) => {
                self.state = LoginState::Authenticated;
                info!("login sequence completed");
                true
            }
            Err(e) => {
                let reason = format!("{e:#} (in state {})", self.state);
                error!("login failed: {reason}");
                self.failure = Some(reason);
                self.state = LoginState::Failed;
                false
            }
        }
    }

    async fn drive_login(&mut self, flow: &LoginFlow, credentials: &Credentials) -> Result<()> {
        self.context
            .navigate(&flow.login_url, flow.navigation_timeout_ms)
            .await?;

        let Some(email) = wait_for_any(&*self.context, &flow.email, flow.element_timeout).await
        else {
            bail!("could not find email input field");
        };
        self.context.type_text(&email, &credentials.email).await?;

        let Some(submit) =
            wait_for_any(&*self.context, &flow.submit, flow.element_timeout).await
        else {
            bail!("continue button not found");
        };
        self.context.click(&submit).await?;
        self.state = LoginState::EmailSubmitted;
        tokio::time::sleep(flow.password_settle).await;

        let Some(password) =
            wait_for_any(&*self.context, &flow.password, flow.element_timeout).await
        else {
            bail!("password field not found");
        };
        self.context.type_text(&password, &credentials.password).await?;

        // The password step sometimes submits on its own; a missing button is not fatal.
        if let Some(submit) =
            wait_for_any(&*self.context, &flow.submit, flow.element_timeout).await
        {
            self.context.click(&submit).await?;
        }
        self.state = LoginState::PasswordSubmitted;
        tokio::time::sleep(flow.login_settle).await;

        Ok(())
    }

    /// Close the session and release the browser context.
    pub async fn close(self) -> Result<()> {
        self.context.close().await
    }
}
