//! Kino Tracker - Playback and Ad Telemetry for Kino
//!
//! This crate observes a host media player and normalizes what it sees into
//! one canonical event stream:
//! - Content lifecycle (request, start, pause, buffering, seeking, end)
//! - Ad lifecycle from several ad-delivery families
//! - Server-side stitched ad schedules polled against the playhead
//! - Rendition metadata from whichever streaming tech is active
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Kino Tracker                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐        ┌──────────────┐   ┌──────────────┐    │
//! │  │ Host Player  │──────► │   Content    │──►│   Emitter    │──► │ sink
//! │  │   events     │        │   Tracker    │   │  (sequence)  │    │
//! │  └──────────────┘        └──────┬───────┘   └──────▲───────┘    │
//! │                                 │ one per session  │            │
//! │  ┌──────────────┐        ┌──────┴───────┐          │            │
//! │  │   Provider   │──────► │  Ad Tracker  │──────────┘            │
//! │  │   Selector   │        │  (variant)   │                       │
//! │  └──────────────┘        └──────┬───────┘                       │
//! │                                 │                               │
//! │          named events · SDK callbacks · stream handle ·         │
//! │          stitched schedule (background bootstrap)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod events;
pub mod player;
pub mod tech;
pub mod ads;
pub mod session;
pub mod replay;

pub use error::{Error, Result};
pub use types::*;
pub use config::{ScheduleConfig, StreamConfig, TrackerConfig};
pub use events::{
    AdAttributes, Attributes, CanonicalEvent, ChannelSink, ContentAttributes, Emitter,
    EventRecord, MemorySink, Origin, TelemetrySink,
};
pub use player::{HostPlayer, ListenerId, PlayerCapabilities, PlayerEventKind, ProviderFault};
pub use ads::{AdSignal, AdTracker, ProviderEvent, ProviderKind, ProviderSelector};
pub use session::ContentTracker;
pub use replay::{ReplayReport, ReplayScript, ReplayStep};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracker library
pub fn init() {
    tracing::info!(version = VERSION, "Kino Tracker initialized");
}
