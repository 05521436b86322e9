//! Quota-bounded agency discovery.
//!
//! Walks the paginated organization listing, keeping agencies whose name
//! starts with one of the target letters until every letter bucket holds its
//! quota or the listing runs out. Pages are visited strictly in order and never
//! twice. A page that keeps failing is skipped after its retries; an empty page
//! or an error mapping ends discovery.

use crate::config::{uppercase_char, HarvestConfig};
use crate::events::{emit, EventBus, HarvestEvent};
use crate::extract::extract_payload;
use crate::renderer::RenderContext;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An agency found on the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub agency_name: String,
    pub agency_url: String,
}

impl Organization {
    /// Build from a raw listing record. `None` if name or domain is missing.
    pub fn from_listing(entry: &Value) -> Option<Self> {
        let name = entry.get("OrganizationName")?.as_str()?;
        let domain = entry.get("Domain")?.as_str()?.trim();
        if name.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self {
            agency_name: name.to_string(),
            agency_url: format!("https://{domain}"),
        })
    }

    /// Uppercased first character of the name.
    pub fn initial(&self) -> Option<char> {
        self.agency_name.chars().next().map(uppercase_char)
    }
}

/// Per-letter agency buckets, each capped at the same quota.
///
/// Buckets keep the caller's letter order; agencies inside a bucket keep
/// discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetterBuckets {
    quota: usize,
    buckets: Vec<(char, Vec<Organization>)>,
}

impl LetterBuckets {
    pub fn new(letters: &[char], quota: usize) -> Self {
        let mut buckets: Vec<(char, Vec<Organization>)> = Vec::with_capacity(letters.len());
        for &letter in letters {
            let letter = uppercase_char(letter);
            if !buckets.iter().any(|(l, _)| *l == letter) {
                buckets.push((letter, Vec::new()));
            }
        }
        Self { quota, buckets }
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Every bucket has reached the quota.
    pub fn is_full(&self) -> bool {
        self.buckets.iter().all(|(_, orgs)| orgs.len() >= self.quota)
    }

    /// Place `org` in its letter's bucket if that bucket exists and has room.
    /// Returns the bucket letter when accepted.
    pub fn offer(&mut self, org: Organization) -> Option<char> {
        let initial = org.initial()?;
        let quota = self.quota;
        let (letter, orgs) = self.buckets.iter_mut().find(|(l, _)| *l == initial)?;
        if orgs.len() >= quota {
            return None;
        }
        orgs.push(org);
        Some(*letter)
    }

    pub fn get(&self, letter: char) -> Option<&[Organization]> {
        let letter = uppercase_char(letter);
        self.buckets
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, orgs)| orgs.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, &[Organization])> {
        self.buckets.iter().map(|(l, orgs)| (*l, orgs.as_slice()))
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(|(_, orgs)| orgs.len()).sum()
    }

    /// All agencies, bucket by bucket in letter order.
    pub fn into_selection(self) -> Vec<Organization> {
        self.buckets.into_iter().flat_map(|(_, orgs)| orgs).collect()
    }
}

/// Why discovery stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every bucket reached its quota.
    QuotaFilled,
    /// The listing returned an empty page or an error mapping.
    EndOfData,
    /// The page cap was reached first.
    PageCap,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaFilled => write!(f, "quota filled"),
            Self::EndOfData => write!(f, "end of data"),
            Self::PageCap => write!(f, "page cap reached"),
        }
    }
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub buckets: LetterBuckets,
    /// Listing pages requested, including skipped ones.
    pub pages_visited: u32,
    pub stop: StopReason,
}

/// A classified listing response.
#[derive(Debug, Clone, PartialEq)]
enum ListingPage {
    Entries(Vec<Value>),
    EndOfData,
}

impl ListingPage {
    /// `None` for payloads that are neither a list nor an error mapping.
    fn classify(payload: Value) -> Option<Self> {
        match payload {
            Value::Array(entries) if entries.is_empty() => Some(Self::EndOfData),
            Value::Array(entries) => Some(Self::Entries(entries)),
            Value::Object(map) if map.is_empty() => Some(Self::EndOfData),
            Value::Object(map) if is_truthy(map.get("message")) => Some(Self::EndOfData),
            _ => None,
        }
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(_)) => true,
    }
}

/// Listing endpoint and pacing for discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub organizations_api: String,
    pub page_limit: u32,
    pub max_retries: u32,
    pub max_pages: u32,
    pub retry_delay: Duration,
    pub navigation_timeout_ms: u64,
}

impl DiscoveryOptions {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            organizations_api: config.organizations_api.clone(),
            page_limit: config.page_limit,
            max_retries: config.max_retries,
            max_pages: config.max_pages,
            retry_delay: config.retry_delay(),
            navigation_timeout_ms: config.navigation_timeout_ms,
        }
    }
}

/// URL of one listing page.
pub fn listing_page_url(api: &str, page: u32, limit: u32) -> String {
    match url::Url::parse(api) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("limit", &limit.to_string());
            url.to_string()
        }
        Err(_) => format!("{api}?page={page}&limit={limit}"),
    }
}

/// Fill one bucket per letter in `letters`, at most `quota` agencies each.
pub async fn discover(
    ctx: &mut dyn RenderContext,
    options: &DiscoveryOptions,
    letters: &[char],
    quota: usize,
    events: Option<&EventBus>,
) -> DiscoveryReport {
    info!("fetching agency listings");
    let mut buckets = LetterBuckets::new(letters, quota);
    let mut page = 1u32;
    let mut pages_visited = 0u32;

    let stop = loop {
        if buckets.is_full() {
            info!("collected required agencies for all target letters");
            break StopReason::QuotaFilled;
        }
        if page > options.max_pages {
            warn!("stopping discovery at page cap {}", options.max_pages);
            break StopReason::PageCap;
        }

        debug!("processing listing page {page}");
        let url = listing_page_url(&options.organizations_api, page, options.page_limit);
        pages_visited += 1;

        match fetch_with_retries(ctx, &url, page, options).await {
            Some(ListingPage::EndOfData) => {
                info!("listing exhausted at page {page}");
                break StopReason::EndOfData;
            }
            Some(ListingPage::Entries(entries)) => {
                let accepted = absorb_page(&mut buckets, &entries, events);
                emit(
                    events,
                    HarvestEvent::PageScanned {
                        page,
                        entries: entries.len(),
                        accepted,
                    },
                );
            }
            None => {
                warn!("skipping listing page {page} after {} attempts", options.max_retries);
                emit(
                    events,
                    HarvestEvent::PageSkipped {
                        page,
                        attempts: options.max_retries,
                    },
                );
            }
        }

        page += 1;
    };

    info!("total agencies selected: {}", buckets.total());
    for (letter, orgs) in buckets.iter() {
        info!("  {letter}: {} agencies", orgs.len());
    }
    emit(
        events,
        HarvestEvent::DiscoveryComplete {
            pages: pages_visited,
            agencies: buckets.total(),
            reason: stop.to_string(),
        },
    );

    DiscoveryReport {
        buckets,
        pages_visited,
        stop,
    }
}

/// Offer every usable entry to the buckets. Returns how many were accepted.
fn absorb_page(buckets: &mut LetterBuckets, entries: &[Value], events: Option<&EventBus>) -> usize {
    let mut accepted = 0;
    for entry in entries {
        let Some(org) = Organization::from_listing(entry) else {
            debug!("skipping listing record without name or domain");
            continue;
        };
        let name = org.agency_name.clone();
        if let Some(letter) = buckets.offer(org) {
            info!("added agency [{letter}]: {name}");
            emit(
                events,
                HarvestEvent::AgencyDiscovered {
                    letter,
                    agency_name: name,
                },
            );
            accepted += 1;
        }
    }
    accepted
}

async fn fetch_with_retries(
    ctx: &mut dyn RenderContext,
    url: &str,
    page: u32,
    options: &DiscoveryOptions,
) -> Option<ListingPage> {
    for attempt in 1..=options.max_retries {
        match fetch_page(ctx, url, options.navigation_timeout_ms).await {
            Ok(listing) => return Some(listing),
            Err(e) => {
                warn!(
                    "listing page {page} failed (attempt {attempt}/{}): {e:#}",
                    options.max_retries
                );
                if attempt < options.max_retries {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }
    None
}

async fn fetch_page(
    ctx: &mut dyn RenderContext,
    url: &str,
    timeout_ms: u64,
) -> Result<ListingPage> {
    ctx.navigate(url, timeout_ms).await?;
    let html = ctx.get_html().await?;
    let Some(payload) = extract_payload(&html) else {
        bail!("no embedded payload");
    };
    match ListingPage::classify(payload) {
        Some(listing) => Ok(listing),
        None => bail!("unexpected listing payload shape"),
    }
}
