//! Canonical event emission
//!
//! Every tracker in this crate reports through the same fixed vocabulary,
//! regardless of which player or ad provider produced the original signal:
//! - Content lifecycle (`CONTENT_*`)
//! - Ad lifecycle (`AD_*`), including breaks, quartiles and clicks
//! - Errors with an optional code and message

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Canonical lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// Playback (or an ad) was requested
    Request,

    /// Download progress milestone
    Download { state: String },

    /// Playback (or an ad) started; repeated STARTs act as heartbeats
    Start,

    Pause,

    Resume,

    BufferStart,

    BufferEnd,

    SeekStart,

    SeekEnd,

    /// Playback (or an ad) finished
    End { skipped: bool },

    /// Error with whatever detail the source could provide
    Error {
        code: Option<String>,
        message: Option<String>,
    },

    AdBreakStart,

    AdBreakEnd,

    AdClick { url: Option<String> },

    /// Quartile number 1, 2 or 3
    AdQuartile { quartile: u8 },
}

impl CanonicalEvent {
    pub fn end() -> Self {
        CanonicalEvent::End { skipped: false }
    }

    pub fn skipped() -> Self {
        CanonicalEvent::End { skipped: true }
    }

    pub fn download(state: impl Into<String>) -> Self {
        CanonicalEvent::Download { state: state.into() }
    }

    pub fn quartile(quartile: Quartile) -> Self {
        CanonicalEvent::AdQuartile {
            quartile: quartile.number(),
        }
    }

    pub fn error(code: Option<String>, message: Option<String>) -> Self {
        CanonicalEvent::Error { code, message }
    }

    /// Action name without the origin prefix
    fn base_name(&self) -> &'static str {
        match self {
            CanonicalEvent::Request => "REQUEST",
            CanonicalEvent::Download { .. } => "DOWNLOAD",
            CanonicalEvent::Start => "START",
            CanonicalEvent::Pause => "PAUSE",
            CanonicalEvent::Resume => "RESUME",
            CanonicalEvent::BufferStart => "BUFFER_START",
            CanonicalEvent::BufferEnd => "BUFFER_END",
            CanonicalEvent::SeekStart => "SEEK_START",
            CanonicalEvent::SeekEnd => "SEEK_END",
            CanonicalEvent::End { .. } => "END",
            CanonicalEvent::Error { .. } => "ERROR",
            CanonicalEvent::AdBreakStart => "BREAK_START",
            CanonicalEvent::AdBreakEnd => "BREAK_END",
            CanonicalEvent::AdClick { .. } => "CLICK",
            CanonicalEvent::AdQuartile { .. } => "QUARTILE",
        }
    }

    /// True for events that only exist in the ad vocabulary
    pub fn is_ad_only(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::AdBreakStart
                | CanonicalEvent::AdBreakEnd
                | CanonicalEvent::AdClick { .. }
                | CanonicalEvent::AdQuartile { .. }
        )
    }

    /// Full action name as the sink sees it, e.g. `AD_QUARTILE`
    pub fn action_name(&self, origin: Origin) -> String {
        let prefix = if self.is_ad_only() { Origin::Ad } else { origin };
        format!("{}_{}", prefix.prefix(), self.base_name())
    }
}

/// Which side of the session produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Content,
    Ad,
}

impl Origin {
    fn prefix(&self) -> &'static str {
        match self {
            Origin::Content => "CONTENT",
            Origin::Ad => "AD",
        }
    }
}

/// Content metadata attached to content events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentAttributes {
    pub playhead_ms: Option<f64>,
    pub duration_ms: Option<f64>,
    pub src: Option<String>,
    pub title: Option<String>,
    pub muted: bool,
    pub autoplay: bool,
    pub preload: Preload,
    pub fullscreen: bool,
    pub playrate: Option<f64>,
    #[serde(flatten)]
    pub rendition: RenditionInfo,
}

/// Ad metadata attached to ad events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdAttributes {
    pub ad_id: Option<String>,
    pub creative_id: Option<String>,
    pub title: Option<String>,
    pub src: Option<String>,
    pub duration_ms: Option<f64>,
    pub playhead_ms: Option<f64>,
    pub position: Option<AdPosition>,
    pub partner: Option<String>,
    pub bitrate: Option<u64>,
    pub break_id: Option<String>,
}

/// Metadata carried by a record; the variant decides the origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum Attributes {
    Content(ContentAttributes),
    Ad(AdAttributes),
}

impl Attributes {
    pub fn origin(&self) -> Origin {
        match self {
            Attributes::Content(_) => Origin::Content,
            Attributes::Ad(_) => Origin::Ad,
        }
    }
}

/// Canonical event with delivery metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic per tracker, starting at 1
    pub sequence: u64,
    /// Session the event belongs to
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    /// Name of the reporting tracker (content or ad provider)
    pub tracker: String,
    /// Full action name, e.g. `CONTENT_START`
    pub action: String,
    #[serde(flatten)]
    pub event: CanonicalEvent,
    pub attributes: Attributes,
}

impl EventRecord {
    pub fn origin(&self) -> Origin {
        self.attributes.origin()
    }
}

/// Receiver of canonical events.
///
/// Delivery is one-way: the tracker never looks at what the sink does with
/// a record.
pub trait TelemetrySink: Send + Sync {
    fn deliver(&self, record: EventRecord);
}

/// Stamps canonical events and hands them to the sink in order
pub struct Emitter {
    session_id: SessionId,
    sequence: u64,
    sink: Arc<dyn TelemetrySink>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            session_id: SessionId::new(),
            sequence: 0,
            sink,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Switch to a new session; the sequence keeps counting
    pub fn start_session(&mut self) -> SessionId {
        self.session_id = SessionId::new();
        self.session_id
    }

    /// Emit one event and return its sequence number
    pub fn emit(&mut self, tracker: &str, event: CanonicalEvent, attributes: Attributes) -> u64 {
        self.sequence += 1;
        let action = event.action_name(attributes.origin());

        debug!(
            sequence = self.sequence,
            session_id = %self.session_id,
            tracker,
            action = %action,
            "Canonical event"
        );

        self.sink.deliver(EventRecord {
            sequence: self.sequence,
            session_id: self.session_id,
            timestamp: Utc::now(),
            tracker: tracker.to_string(),
            action,
            event,
            attributes,
        });

        self.sequence
    }
}

/// Keeps every record in memory
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all delivered records
    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Action names in delivery order
    pub fn actions(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.action).collect()
    }

    /// Action names for one origin only
    pub fn actions_for(&self, origin: Origin) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.origin() == origin)
            .map(|r| r.action)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl TelemetrySink for MemorySink {
    fn deliver(&self, record: EventRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}

/// Forwards records to an async consumer
#[derive(Clone)]
pub struct ChannelSink {
    event_tx: mpsc::UnboundedSender<EventRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn deliver(&self, record: EventRecord) {
        // Consumer gone means nobody is listening anymore
        let _ = self.event_tx.send(record);
    }
}
