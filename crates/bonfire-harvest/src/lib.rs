//! Bonfire Harvest: authenticated opportunity harvesting for Bonfire Hub agency portals.

pub mod checkpoint;
pub mod config;
pub mod deadline;
pub mod discovery;
pub mod error;
pub mod events;
pub mod extract;
pub mod harvest;
pub mod orchestrator;
pub mod renderer;
pub mod session;

pub use checkpoint::CheckpointWriter;
pub use config::{Credentials, HarvestConfig};
pub use deadline::days_remaining;
pub use discovery::{discover, LetterBuckets, Organization, StopReason};
pub use error::{HarvestError, HarvestResult};
pub use events::{EventBus, HarvestEvent};
pub use extract::extract_payload;
pub use harvest::{
    harvest_open, harvest_past, AgencyOpportunitySet, FeedKind, OpportunityStatus, RawOpportunity,
};
pub use orchestrator::{HarvestReport, Orchestrator};
pub use renderer::{RenderContext, Renderer};
pub use session::{LoginState, PortalSession};
