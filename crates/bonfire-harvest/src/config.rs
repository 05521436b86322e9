//! Harvest configuration and credentials.
//!
//! Configuration is resolved in three layers, later layers winning:
//! 1. Built-in defaults (the values the portal is known to tolerate)
//! 2. An optional JSON file (`HarvestConfig::from_file`)
//! 3. `BONFIRE_*` environment variables (`HarvestConfig::apply_env`)
//!
//! The CLI applies its own flags on top and then calls [`HarvestConfig::validate`].
//! The core treats the result as immutable for the duration of a run.

use crate::error::{HarvestError, HarvestResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOGIN_URL: &str = "https://account.bonfirehub.com/login";
pub const DEFAULT_ORGANIZATIONS_API: &str =
    "https://common-production-api-global.bonfirehub.com/v1.0/organizations/searchByLocation";

/// Account credentials for the vendor portal. Never written to disk.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Both fields present and non-blank.
    pub fn is_complete(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Selector lists tried in order during login; first match wins.
///
/// Entries starting with `/` or `(` are XPath, everything else is CSS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSelectors {
    pub email: Vec<String>,
    pub password: Vec<String>,
    pub submit: Vec<String>,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            email: vec![
                "input#input-email".to_string(),
                "input[type='email']".to_string(),
                "input[name='email']".to_string(),
            ],
            password: vec![
                "input#password".to_string(),
                "input[type='password']".to_string(),
                "//input[@type='password']".to_string(),
            ],
            submit: vec!["//button[@type='submit']".to_string()],
        }
    }
}

/// Every tunable the harvest pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// First letters of the agency names to collect.
    pub target_letters: Vec<char>,
    /// Quota per letter bucket.
    pub agencies_per_letter: usize,
    /// `limit` query parameter of the listing endpoint.
    pub page_limit: u32,
    /// Attempts per listing page and per agency feed.
    pub max_retries: u32,
    /// Upper bound on listing pages visited in one discovery pass.
    pub max_pages: u32,

    pub request_delay_ms: u64,
    pub retry_delay_ms: u64,
    /// Pause between login and the first listing request.
    pub discovery_warmup_ms: u64,
    pub navigation_timeout_ms: u64,
    pub element_timeout_ms: u64,
    pub password_settle_ms: u64,
    pub login_settle_ms: u64,

    pub headless: bool,
    pub browser_timeout_ms: u64,
    pub chromium_path: Option<PathBuf>,

    pub login_url: String,
    pub organizations_api: String,
    pub selectors: LoginSelectors,

    pub output_dir: PathBuf,
    pub agencies_file: String,
    pub open_file: String,
    pub past_file: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            target_letters: vec!['D', 'G', 'J', 'L'],
            agencies_per_letter: 5,
            page_limit: 80,
            max_retries: 3,
            max_pages: 1000,
            request_delay_ms: 1500,
            retry_delay_ms: 1500,
            discovery_warmup_ms: 40_000,
            navigation_timeout_ms: 30_000,
            element_timeout_ms: 10_000,
            password_settle_ms: 3000,
            login_settle_ms: 5000,
            headless: true,
            browser_timeout_ms: 60_000,
            chromium_path: None,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            organizations_api: DEFAULT_ORGANIZATIONS_API.to_string(),
            selectors: LoginSelectors::default(),
            output_dir: PathBuf::from("output/raw"),
            agencies_file: "agencies.json".to_string(),
            open_file: "open_opportunities_raw.json".to_string(),
            past_file: "past_opportunities_raw.json".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> HarvestResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| HarvestError::Config(format!("{}: {e}", path.display())))
    }

    /// Overlay `BONFIRE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(letters) = read_env_string("BONFIRE_TARGET_LETTERS") {
            self.target_letters = parse_letters(&letters);
        }
        if let Some(v) = read_env_parse("BONFIRE_AGENCIES_PER_LETTER") {
            self.agencies_per_letter = v;
        }
        if let Some(v) = read_env_parse("BONFIRE_PAGE_LIMIT") {
            self.page_limit = v;
        }
        if let Some(v) = read_env_parse("BONFIRE_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = read_env_parse("BONFIRE_REQUEST_DELAY_MS") {
            self.request_delay_ms = v;
        }
        if let Some(v) = read_env_parse("BONFIRE_DISCOVERY_WARMUP_MS") {
            self.discovery_warmup_ms = v;
        }
        if let Some(v) = read_env_parse("BONFIRE_BROWSER_TIMEOUT_MS") {
            self.browser_timeout_ms = v;
        }
        if let Some(v) = read_env_bool("BONFIRE_HEADLESS") {
            self.headless = v;
        }
        if let Some(p) = read_env_string("BONFIRE_CHROMIUM_PATH") {
            self.chromium_path = Some(PathBuf::from(p));
        }
        if let Some(url) = read_env_string("BONFIRE_LOGIN_URL") {
            self.login_url = url;
        }
        if let Some(url) = read_env_string("BONFIRE_ORGANIZATIONS_API") {
            self.organizations_api = url;
        }
        if let Some(dir) = read_env_string("BONFIRE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> HarvestResult<()> {
        if self.target_letters.is_empty() {
            return Err(HarvestError::Config("no target letters".into()));
        }
        if let Some(bad) = self.target_letters.iter().find(|c| !c.is_alphabetic()) {
            return Err(HarvestError::Config(format!(
                "target letter {bad:?} is not alphabetic"
            )));
        }
        if self.agencies_per_letter == 0 {
            return Err(HarvestError::Config(
                "agencies_per_letter must be at least 1".into(),
            ));
        }
        if self.page_limit == 0 {
            return Err(HarvestError::Config("page_limit must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(HarvestError::Config("max_retries must be at least 1".into()));
        }
        if self.max_pages == 0 {
            return Err(HarvestError::Config("max_pages must be at least 1".into()));
        }
        url::Url::parse(&self.organizations_api)
            .map_err(|e| HarvestError::Config(format!("organizations_api: {e}")))?;
        url::Url::parse(&self.login_url)
            .map_err(|e| HarvestError::Config(format!("login_url: {e}")))?;
        Ok(())
    }

    /// Target letters uppercased with duplicates removed, caller order kept.
    pub fn letters(&self) -> Vec<char> {
        normalize_letters(&self.target_letters)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn discovery_warmup(&self) -> Duration {
        Duration::from_millis(self.discovery_warmup_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn password_settle(&self) -> Duration {
        Duration::from_millis(self.password_settle_ms)
    }

    pub fn login_settle(&self) -> Duration {
        Duration::from_millis(self.login_settle_ms)
    }

    pub fn agencies_path(&self) -> PathBuf {
        self.output_dir.join(&self.agencies_file)
    }

    pub fn open_path(&self) -> PathBuf {
        self.output_dir.join(&self.open_file)
    }

    pub fn past_path(&self) -> PathBuf {
        self.output_dir.join(&self.past_file)
    }
}

/// Parse a letter list such as `"D,G,J,L"` or `"dgjl"`.
pub fn parse_letters(raw: &str) -> Vec<char> {
    let letters: Vec<char> = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    normalize_letters(&letters)
}

fn normalize_letters(letters: &[char]) -> Vec<char> {
    let mut out: Vec<char> = Vec::with_capacity(letters.len());
    for c in letters {
        let upper = uppercase_char(*c);
        if !out.contains(&upper) {
            out.push(upper);
        }
    }
    out
}

/// Uppercase a single character, keeping it as-is when the uppercase form
/// is not a single character (e.g. `ß`).
pub(crate) fn uppercase_char(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = read_env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {name}={raw:?}: not a valid value");
            None
        }
    }
}

fn read_env_bool(name: &str) -> Option<bool> {
    let raw = read_env_string(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = HarvestConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.letters(), vec!['D', 'G', 'J', 'L']);
        assert_eq!(cfg.agencies_per_letter, 5);
        assert_eq!(cfg.open_path(), PathBuf::from("output/raw/open_opportunities_raw.json"));
    }

    #[test]
    fn test_parse_letters_normalizes() {
        assert_eq!(parse_letters("d, g,J,d"), vec!['D', 'G', 'J']);
        assert_eq!(parse_letters("lj"), vec!['L', 'J']);
    }

    #[test]
    fn test_validate_rejects_zero_quota() {
        let cfg = HarvestConfig {
            agencies_per_letter: 0,
            ..HarvestConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(HarvestError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_non_letter() {
        let cfg = HarvestConfig {
            target_letters: vec!['D', '7'],
            ..HarvestConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.json");
        std::fs::write(&path, r#"{"target_letters": ["a", "b"], "page_limit": 10}"#).unwrap();

        let cfg = HarvestConfig::from_file(&path).unwrap();
        assert_eq!(cfg.letters(), vec!['A', 'B']);
        assert_eq!(cfg.page_limit, 10);
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("buyer@example.com", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("buyer@example.com"));
        assert!(!shown.contains("hunter2"));
        assert!(creds.is_complete());
        assert!(!Credentials::new(" ", "x").is_complete());
    }
}
