//! Per-agency opportunity harvesting.
//!
//! Each agency exposes two feeds, open and past. A feed is fetched through
//! the browser with bounded retries, its embedded payload extracted, and the
//! nested `projects` collection mapped into [`RawOpportunity`] records. A feed
//! that never yields a payload produces an empty set instead of an error, so
//! one broken agency cannot stop the run.

use crate::config::HarvestConfig;
use crate::deadline::days_remaining_at;
use crate::discovery::Organization;
use crate::events::{emit, EventBus, HarvestEvent};
use crate::extract::extract_payload;
use crate::renderer::RenderContext;
use anyhow::{bail, Result};
use chrono::{Local, NaiveDateTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which of the two agency feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Open,
    Past,
}

impl FeedKind {
    /// JSON endpoint for this feed under an agency base URL.
    pub fn endpoint(self, agency_url: &str) -> String {
        let base = agency_url.trim_end_matches('/');
        match self {
            Self::Open => format!("{base}/PublicPortal/getOpenPublicOpportunitiesSectionData"),
            Self::Past => format!("{base}/PublicPortal/getPastPublicOpportunitiesSectionData"),
        }
    }

    /// Human-facing portal tab for this feed.
    pub fn portal_url(self, agency_url: &str) -> String {
        let base = agency_url.trim_end_matches('/');
        match self {
            Self::Open => format!("{base}/portal/?tab=openOpportunities"),
            Self::Past => format!("{base}/portal/?tab=pastOpportunities"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Past => "past",
        }
    }

    fn url_key(self) -> &'static str {
        match self {
            Self::Open => "Agency Open Public Opportunity Url",
            Self::Past => "Agency Past Public Opportunity Url",
        }
    }

    fn list_key(self) -> &'static str {
        match self {
            Self::Open => "Agency Open Public Opportunities",
            Self::Past => "Agency Past Public Opportunities",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Opportunity status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityStatus {
    Open,
    Closed,
    Cancelled,
    Awarded,
    Unknown,
}

impl OpportunityStatus {
    /// Map a past-feed `ProjectSubStatusID`.
    pub fn from_sub_status(code: &str) -> Self {
        match code.trim() {
            "1" => Self::Closed,
            "2" => Self::Cancelled,
            "3" => Self::Awarded,
            _ => Self::Unknown,
        }
    }
}

/// One opportunity as written to the checkpoint artifacts.
///
/// Key names are what the cleaning stage reads, spelling included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOpportunity {
    #[serde(rename = "Status")]
    pub status: OpportunityStatus,
    #[serde(rename = "Refference")]
    pub reference_id: String,
    #[serde(rename = "Project Name")]
    pub project_name: String,
    #[serde(rename = "Closed Date")]
    pub close_date: String,
    /// Open feed only.
    #[serde(
        rename = "Number of days Left",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub days_remaining: Option<i64>,
}

impl RawOpportunity {
    /// Map an open-feed record; days left are computed against `now`.
    pub fn open(record: &Map<String, Value>, now: NaiveDateTime) -> Self {
        let close_date = text_field(record, "DateClose");
        let days = if close_date.is_empty() {
            0
        } else {
            days_remaining_at(&close_date, now)
        };
        Self {
            status: OpportunityStatus::Open,
            reference_id: text_field(record, "ReferenceID"),
            project_name: text_field(record, "ProjectName"),
            close_date,
            days_remaining: Some(days),
        }
    }

    /// Map a past-feed record.
    pub fn past(record: &Map<String, Value>) -> Self {
        Self {
            status: OpportunityStatus::from_sub_status(&text_field(record, "ProjectSubStatusID")),
            reference_id: text_field(record, "ReferenceID"),
            project_name: text_field(record, "ProjectName"),
            close_date: text_field(record, "DateClose"),
            days_remaining: None,
        }
    }
}

/// Scalar field as text; missing, null and structured values become "".
fn text_field(record: &Map<String, Value>, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// All opportunities of one agency for one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct AgencyOpportunitySet {
    pub kind: FeedKind,
    pub agency_name: String,
    pub portal_url: String,
    pub opportunities: Vec<RawOpportunity>,
}

impl AgencyOpportunitySet {
    pub fn empty(kind: FeedKind, org: &Organization) -> Self {
        Self {
            kind,
            agency_name: org.agency_name.clone(),
            portal_url: kind.portal_url(&org.agency_url),
            opportunities: Vec::new(),
        }
    }
}

impl Serialize for AgencyOpportunitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(self.kind.url_key(), &self.portal_url)?;
        map.serialize_entry("Agency Name", &self.agency_name)?;
        map.serialize_entry(self.kind.list_key(), &self.opportunities)?;
        map.end()
    }
}

/// The feed's `projects` collection arrives keyed by project id or as a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProjectCollection {
    Keyed(Map<String, Value>),
    Listed(Vec<Value>),
}

impl ProjectCollection {
    fn into_records(self) -> Vec<Value> {
        match self {
            Self::Keyed(map) => map.into_iter().map(|(_, v)| v).collect(),
            Self::Listed(list) => list,
        }
    }
}

/// Project records of a feed payload, in document order.
///
/// A payload without `payload.projects` has no records.
pub fn project_records(payload: &Value) -> Vec<Map<String, Value>> {
    let Some(projects) = payload.get("payload").and_then(|p| p.get("projects")) else {
        return Vec::new();
    };
    let records = match ProjectCollection::deserialize(projects) {
        Ok(collection) => collection.into_records(),
        Err(_) => {
            debug!("projects collection is neither a mapping nor a list");
            return Vec::new();
        }
    };
    records
        .into_iter()
        .filter_map(|record| match record {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// Retry and pacing settings for feed fetches.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub navigation_timeout_ms: u64,
}

impl HarvestOptions {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            navigation_timeout_ms: config.navigation_timeout_ms,
        }
    }
}

/// Harvest the open-opportunities feed of `org`.
pub async fn harvest_open(
    ctx: &mut dyn RenderContext,
    org: &Organization,
    options: &HarvestOptions,
    events: Option<&EventBus>,
) -> AgencyOpportunitySet {
    harvest_feed(ctx, org, FeedKind::Open, options, events).await
}

/// Harvest the past-opportunities feed of `org`.
pub async fn harvest_past(
    ctx: &mut dyn RenderContext,
    org: &Organization,
    options: &HarvestOptions,
    events: Option<&EventBus>,
) -> AgencyOpportunitySet {
    harvest_feed(ctx, org, FeedKind::Past, options, events).await
}

async fn harvest_feed(
    ctx: &mut dyn RenderContext,
    org: &Organization,
    kind: FeedKind,
    options: &HarvestOptions,
    events: Option<&EventBus>,
) -> AgencyOpportunitySet {
    let mut set = AgencyOpportunitySet::empty(kind, org);
    let url = kind.endpoint(&org.agency_url);

    for attempt in 1..=options.max_retries {
        match fetch_feed(ctx, &url, options.navigation_timeout_ms).await {
            Ok(payload) => {
                let now = Local::now().naive_local();
                set.opportunities = project_records(&payload)
                    .iter()
                    .map(|record| match kind {
                        FeedKind::Open => RawOpportunity::open(record, now),
                        FeedKind::Past => RawOpportunity::past(record),
                    })
                    .collect();
                info!(
                    "{} {kind} opportunities for {}",
                    set.opportunities.len(),
                    org.agency_name
                );
                return set;
            }
            Err(e) => {
                debug!(
                    "no {kind} data for {} (attempt {attempt}/{}): {e:#}",
                    org.agency_name, options.max_retries
                );
                if attempt < options.max_retries {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }

    warn!(
        "giving up on {kind} feed for {} after {} attempts",
        org.agency_name, options.max_retries
    );
    emit(
        events,
        HarvestEvent::FeedFailed {
            agency_name: org.agency_name.clone(),
            feed: kind.label().to_string(),
            attempts: options.max_retries,
        },
    );
    set
}

/// Fetch a feed and return its payload if it is a non-empty object.
async fn fetch_feed(ctx: &mut dyn RenderContext, url: &str, timeout_ms: u64) -> Result<Value> {
    ctx.navigate(url, timeout_ms).await?;
    let html = ctx.get_html().await?;
    match extract_payload(&html) {
        Some(Value::Object(map)) if !map.is_empty() => Ok(Value::Object(map)),
        Some(Value::Object(_)) | Some(Value::Array(_)) | Some(Value::Null) | None => {
            bail!("no embedded payload")
        }
        Some(other) => bail!("unexpected feed payload: {other}"),
    }
}
