//! End-to-end harvest runs against the replay renderer.
//!
//! Every test wires a login form, a paginated listing and per-agency feeds,
//! then drives `Orchestrator::run` and inspects the report, the emitted
//! events and the artifacts on disk.

use bonfire_harvest::config::{Credentials, HarvestConfig};
use bonfire_harvest::discovery::{listing_page_url, StopReason};
use bonfire_harvest::events::{drain, EventBus, HarvestEvent};
use bonfire_harvest::harvest::FeedKind;
use bonfire_harvest::renderer::replay::{Reply, ReplayRenderer};
use bonfire_harvest::{HarvestError, Orchestrator};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const LOGIN: &str = "https://account.example.test/login";
const API: &str = "https://api.example.test/v1.0/organizations/searchByLocation";

// ── Fixtures ──

fn config(dir: &Path) -> HarvestConfig {
    HarvestConfig {
        target_letters: vec!['D', 'G'],
        agencies_per_letter: 1,
        page_limit: 3,
        max_retries: 2,
        request_delay_ms: 0,
        retry_delay_ms: 0,
        discovery_warmup_ms: 0,
        element_timeout_ms: 0,
        password_settle_ms: 0,
        login_settle_ms: 0,
        login_url: LOGIN.to_string(),
        organizations_api: API.to_string(),
        output_dir: dir.to_path_buf(),
        ..HarvestConfig::default()
    }
}

fn creds() -> Credentials {
    Credentials::new("buyer@example.com", "s3cret")
}

fn page(n: u32) -> String {
    listing_page_url(API, n, 3)
}

fn agency_url(slug: &str) -> String {
    format!("https://{slug}.example.test")
}

fn listing(name: &str, slug: &str) -> Value {
    json!({"OrganizationName": name, "Domain": format!("{slug}.example.test")})
}

fn with_login(renderer: ReplayRenderer) -> ReplayRenderer {
    renderer
        .route(LOGIN, Reply::Html("<form id=\"login\"></form>".into()))
        .element(LOGIN, "input#input-email")
        .element(LOGIN, "//button[@type='submit']")
        .element_after_clicks(LOGIN, "input#password", 1)
}

/// Login plus a one-page listing of Delta, Gamma and Zeta with feeds for the
/// two target agencies.
fn portal() -> ReplayRenderer {
    let delta = agency_url("delta");
    let gamma = agency_url("gamma");
    with_login(ReplayRenderer::new())
        .json(
            page(1),
            json!([
                listing("Delta Corp", "delta"),
                listing("Gamma LLC", "gamma"),
                listing("Zeta Inc", "zeta")
            ]),
        )
        .json(page(2), json!([]))
        .json(
            FeedKind::Open.endpoint(&delta),
            json!({"payload": {"projects": {
                "501": {
                    "ReferenceID": "D-501",
                    "ProjectName": "Bridge Inspection",
                    "DateClose": "2001-01-01 00:00:00"
                },
                "502": {"ReferenceID": "D-502", "ProjectName": "Snow Plowing", "DateClose": ""}
            }}}),
        )
        .json(
            FeedKind::Past.endpoint(&delta),
            json!({"payload": {"projects": [
                {
                    "ReferenceID": "D-100",
                    "ProjectName": "Office Chairs",
                    "DateClose": "2020-05-01 12:00:00",
                    "ProjectSubStatusID": "3"
                }
            ]}}),
        )
        .json(
            FeedKind::Open.endpoint(&gamma),
            json!({"payload": {"projects": []}}),
        )
        .json(
            FeedKind::Past.endpoint(&gamma),
            json!({"payload": {"projects": {
                "7": {
                    "ReferenceID": "G-7",
                    "ProjectName": "Fencing",
                    "DateClose": "2019-03-03 09:00:00",
                    "ProjectSubStatusID": 2
                }
            }}}),
        )
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ── Runs ──

#[tokio::test]
async fn test_full_run_harvests_selected_agencies() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());
    let renderer = portal();
    let bus = EventBus::new(128);
    let mut rx = bus.subscribe();

    let report = Orchestrator::new(cfg.clone(), Arc::new(renderer.clone()))
        .with_events(bus)
        .run(&creds())
        .await
        .unwrap();

    let names: Vec<&str> = report
        .agencies
        .iter()
        .map(|o| o.agency_name.as_str())
        .collect();
    assert_eq!(names, vec!["Delta Corp", "Gamma LLC"]);
    assert_eq!(report.stop, StopReason::QuotaFilled);
    assert_eq!(report.pages_visited, 1);
    assert_eq!(report.open_count(), 2);
    assert_eq!(report.past_count(), 2);

    // Zeta is never harvested and page 2 never requested.
    assert_eq!(renderer.visits(&page(2)), 0);
    assert_eq!(
        renderer.visits(&FeedKind::Open.endpoint(&agency_url("zeta"))),
        0
    );
    assert_eq!(renderer.closed_contexts(), 1);

    let open = read_json(&cfg.open_path());
    assert_eq!(open.as_array().unwrap().len(), 2);
    assert_eq!(
        open[0]["Agency Open Public Opportunity Url"],
        "https://delta.example.test/portal/?tab=openOpportunities"
    );
    let delta_open = &open[0]["Agency Open Public Opportunities"];
    assert_eq!(delta_open[0]["Refference"], "D-501");
    assert_eq!(delta_open[0]["Status"], "Open");
    assert_eq!(delta_open[0]["Number of days Left"], 0);
    assert_eq!(delta_open[1]["Number of days Left"], 0);

    let past = read_json(&cfg.past_path());
    assert_eq!(
        past[0]["Agency Past Public Opportunities"][0]["Status"],
        "Awarded"
    );
    assert_eq!(
        past[1]["Agency Past Public Opportunities"][0]["Status"],
        "Cancelled"
    );
    assert!(past[1]["Agency Past Public Opportunities"][0]
        .get("Number of days Left")
        .is_none());

    let agencies = read_json(&cfg.agencies_path());
    assert_eq!(agencies[1]["agency_url"], "https://gamma.example.test");

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(HarvestEvent::SessionOpened { .. })));
    assert!(events.contains(&HarvestEvent::LoginComplete {
        success: true,
        state: "authenticated".into()
    }));
    let checkpoints = events
        .iter()
        .filter(|e| matches!(e, HarvestEvent::CheckpointWritten { .. }))
        .count();
    assert_eq!(checkpoints, 2);
    assert!(matches!(
        events.last(),
        Some(HarvestEvent::RunComplete {
            agencies: 2,
            open_opportunities: 2,
            past_opportunities: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn test_failing_open_feed_yields_empty_set_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());
    let delta_open = FeedKind::Open.endpoint(&agency_url("delta"));
    let renderer = portal().route(delta_open.clone(), Reply::Fail("net::ERR_TIMED_OUT".into()));
    let bus = EventBus::new(128);
    let mut rx = bus.subscribe();

    let report = Orchestrator::new(cfg.clone(), Arc::new(renderer.clone()))
        .with_events(bus)
        .run(&creds())
        .await
        .unwrap();

    assert_eq!(renderer.visits(&delta_open), 2);
    assert!(report.open_sets[0].opportunities.is_empty());
    assert_eq!(report.past_sets[0].opportunities.len(), 1);
    assert_eq!(report.agencies.len(), 2);

    let open = read_json(&cfg.open_path());
    assert_eq!(open[0]["Agency Name"], "Delta Corp");
    assert_eq!(
        open[0]["Agency Open Public Opportunities"],
        json!([])
    );

    assert!(drain(&mut rx).contains(&HarvestEvent::FeedFailed {
        agency_name: "Delta Corp".into(),
        feed: "open".into(),
        attempts: 2
    }));
}

#[tokio::test]
async fn test_login_failure_is_fatal_and_closes_session() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());
    // No password field ever appears.
    let renderer = ReplayRenderer::new()
        .route(LOGIN, Reply::Html("<form></form>".into()))
        .element(LOGIN, "input#input-email")
        .element(LOGIN, "//button[@type='submit']")
        .json(page(1), json!([listing("Delta Corp", "delta")]));

    let err = Orchestrator::new(cfg.clone(), Arc::new(renderer.clone()))
        .run(&creds())
        .await
        .unwrap_err();

    match err {
        HarvestError::Login(reason) => assert!(reason.contains("password field not found")),
        other => panic!("expected login error, got {other}"),
    }
    assert_eq!(renderer.closed_contexts(), 1);
    assert_eq!(renderer.visits(&page(1)), 0);
    assert!(!cfg.agencies_path().exists());
}

#[tokio::test]
async fn test_context_refusal_is_browser_error() {
    let dir = TempDir::new().unwrap();
    let renderer = portal().refuse_contexts();
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    let err = Orchestrator::new(config(dir.path()), Arc::new(renderer.clone()))
        .with_events(bus)
        .run(&creds())
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Browser(_)));
    assert!(renderer.interactions().is_empty());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [HarvestEvent::RunFailed { .. }]
    ));
}

#[tokio::test]
async fn test_empty_listing_returns_empty_report() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());
    let stale = r#"[{"agency_name": "Delta Corp", "opportunities": []}]"#;
    std::fs::write(cfg.open_path(), stale).unwrap();
    std::fs::write(cfg.past_path(), stale).unwrap();
    let renderer = with_login(ReplayRenderer::new())
        .json(page(1), json!({"message": "No organizations found"}));

    let report = Orchestrator::new(cfg.clone(), Arc::new(renderer.clone()))
        .run(&creds())
        .await
        .unwrap();

    assert!(report.is_empty());
    assert_eq!(report.stop, StopReason::EndOfData);
    assert_eq!(read_json(&cfg.agencies_path()), json!([]));
    assert_eq!(read_json(&cfg.open_path()), json!([]));
    assert_eq!(read_json(&cfg.past_path()), json!([]));
    assert_eq!(renderer.closed_contexts(), 1);
}

#[tokio::test]
async fn test_rerun_overwrites_checkpoints() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());

    for _ in 0..2 {
        Orchestrator::new(cfg.clone(), Arc::new(portal()))
            .run(&creds())
            .await
            .unwrap();
    }

    let open = read_json(&cfg.open_path());
    assert_eq!(open.as_array().unwrap().len(), 2);
}
