//! Orchestrator: drives one complete harvest run.
//!
//! 1. Open a browser context and log in (both fatal on failure)
//! 2. Wait for the portal to settle, then discover agencies per letter
//! 3. For each agency: open feed, past feed, checkpoint, pause
//!
//! The session is closed on every exit path once it has been opened.

use crate::checkpoint::CheckpointWriter;
use crate::config::{Credentials, HarvestConfig};
use crate::discovery::{discover, DiscoveryOptions, Organization, StopReason};
use crate::error::{HarvestError, HarvestResult};
use crate::events::{emit, now_timestamp, EventBus, HarvestEvent};
use crate::harvest::{harvest_open, harvest_past, AgencyOpportunitySet, HarvestOptions};
use crate::renderer::Renderer;
use crate::session::{LoginFlow, PortalSession};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What a finished run collected.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    /// Agencies selected by discovery, in harvest order.
    pub agencies: Vec<Organization>,
    pub open_sets: Vec<AgencyOpportunitySet>,
    pub past_sets: Vec<AgencyOpportunitySet>,
    pub pages_visited: u32,
    pub stop: StopReason,
    pub elapsed: Duration,
}

impl HarvestReport {
    pub fn open_count(&self) -> usize {
        self.open_sets.iter().map(|s| s.opportunities.len()).sum()
    }

    pub fn past_count(&self) -> usize {
        self.past_sets.iter().map(|s| s.opportunities.len()).sum()
    }

    /// True when no agency was harvested.
    pub fn is_empty(&self) -> bool {
        self.agencies.is_empty()
    }
}

/// Runs the pipeline against a renderer.
pub struct Orchestrator {
    config: HarvestConfig,
    renderer: Arc<dyn Renderer>,
    events: Option<EventBus>,
}

impl Orchestrator {
    pub fn new(config: HarvestConfig, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            config,
            renderer,
            events: None,
        }
    }

    /// Publish progress on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Run one harvest: login, discovery, then every agency in turn.
    pub async fn run(&self, credentials: &Credentials) -> HarvestResult<HarvestReport> {
        let start = Instant::now();
        let result = self.run_inner(credentials, start).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(report) => {
                info!(
                    "harvest finished in {:.1}s: {} agencies, {} open, {} past",
                    report.elapsed.as_secs_f64(),
                    report.agencies.len(),
                    report.open_count(),
                    report.past_count()
                );
                self.emit(HarvestEvent::RunComplete {
                    agencies: report.agencies.len(),
                    open_opportunities: report.open_count(),
                    past_opportunities: report.past_count(),
                    elapsed_ms,
                });
            }
            Err(e) => {
                warn!("harvest aborted: {e}");
                self.emit(HarvestEvent::RunFailed {
                    error: e.to_string(),
                    elapsed_ms,
                });
            }
        }
        result
    }

    async fn run_inner(
        &self,
        credentials: &Credentials,
        start: Instant,
    ) -> HarvestResult<HarvestReport> {
        self.config.validate()?;
        if !credentials.is_complete() {
            return Err(HarvestError::Config("email and password are required".into()));
        }

        let mut session = PortalSession::open(self.renderer.as_ref())
            .await
            .map_err(|e| HarvestError::Browser(format!("{e:#}")))?;
        self.emit(HarvestEvent::SessionOpened {
            timestamp: now_timestamp(),
        });

        let result = self.drive(&mut session, credentials, start).await;

        if let Err(e) = session.close().await {
            warn!("failed to close browser context: {e:#}");
        }
        self.emit(HarvestEvent::SessionClosed);
        result
    }

    async fn drive(
        &self,
        session: &mut PortalSession,
        credentials: &Credentials,
        start: Instant,
    ) -> HarvestResult<HarvestReport> {
        let events = self.events.as_ref();

        let flow = LoginFlow::from_config(&self.config);
        let logged_in = session.login(&flow, credentials).await;
        self.emit(HarvestEvent::LoginComplete {
            success: logged_in,
            state: session.state().to_string(),
        });
        if !logged_in {
            let reason = session.failure().unwrap_or("login did not complete");
            return Err(HarvestError::Login(reason.to_string()));
        }

        let warmup = self.config.discovery_warmup();
        if !warmup.is_zero() {
            info!("waiting {:.0}s before discovery", warmup.as_secs_f64());
            tokio::time::sleep(warmup).await;
        }

        let letters = self.config.letters();
        let discovery = discover(
            session.context_mut(),
            &DiscoveryOptions::from_config(&self.config),
            &letters,
            self.config.agencies_per_letter,
            events,
        )
        .await;
        let pages_visited = discovery.pages_visited;
        let stop = discovery.stop;
        let agencies = discovery.buckets.into_selection();

        let writer = CheckpointWriter::from_config(&self.config);
        writer.write_agencies(&agencies)?;
        // Start the snapshot over so it never describes an earlier run.
        writer.write(&[], &[])?;

        if agencies.is_empty() {
            warn!("no agencies discovered, nothing to harvest");
        }

        let options = HarvestOptions::from_config(&self.config);
        let total = agencies.len();
        let mut open_sets = Vec::with_capacity(total);
        let mut past_sets = Vec::with_capacity(total);

        for (i, org) in agencies.iter().enumerate() {
            info!("processing agency {}/{}: {}", i + 1, total, org.agency_name);

            let open = harvest_open(session.context_mut(), org, &options, events).await;
            let past = harvest_past(session.context_mut(), org, &options, events).await;
            let open_count = open.opportunities.len();
            let past_count = past.opportunities.len();
            open_sets.push(open);
            past_sets.push(past);

            writer.write(&open_sets, &past_sets)?;
            self.emit(HarvestEvent::CheckpointWritten {
                agencies: open_sets.len(),
            });
            self.emit(HarvestEvent::AgencyHarvested {
                index: i + 1,
                total,
                agency_name: org.agency_name.clone(),
                open_count,
                past_count,
            });

            tokio::time::sleep(self.config.request_delay()).await;
        }

        Ok(HarvestReport {
            agencies,
            open_sets,
            past_sets,
            pages_visited,
            stop,
            elapsed: start.elapsed(),
        })
    }

    fn emit(&self, event: HarvestEvent) {
        emit(self.events.as_ref(), event);
    }
}
