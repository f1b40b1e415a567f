//! Ad tracking
//!
//! One [`AdTracker`] implementation per ad-delivery family. Each one turns
//! its provider's native signals into the same canonical calls (REQUEST,
//! START, PAUSE, RESUME, QUARTILE, END, BREAK_START, BREAK_END, CLICK,
//! ERROR); they differ only in how they notice ad activity:
//!
//! ```text
//!  named player events ──► NamedEventTracker   (generic, IMA3, FreeWheel)
//!  SDK callbacks       ──► SdkTracker          (ads manager listeners)
//!  stream handle       ──► StreamTracker       (handler table on a pushed handle)
//!  time-update polling ──► ScheduleTracker     (bootstrapped avail schedule)
//! ```
//!
//! The content tracker holds at most one of them per session, chosen by
//! the [`selector`].

pub mod named;
pub mod progress;
pub mod schedule;
pub mod sdk;
pub mod selector;
pub mod stream;

pub use named::{NamedEventTracker, NamedFlavor};
pub use progress::{Ad, AdBreak, QuartileLatch};
pub use schedule::{
    AdSchedule, AvailEntry, AvailPhase, HttpScheduleClient, ScheduleClient, ScheduleTracker,
};
pub use sdk::{AdsManager, SdkAd, SdkEvent, SdkEventKind, SdkTracker};
pub use selector::{AttachmentSlot, ProviderSelector};
pub use stream::{StreamEvent, StreamEventKind, StreamManager, StreamTracker};

use crate::config::TrackerConfig;
use crate::events::{AdAttributes, Attributes, CanonicalEvent, Emitter};
use crate::player::{HostPlayer, PlayerEventKind};
use crate::types::{AdPosition, CuePoints};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Ad-delivery provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Generic ads plugin events
    Generic,
    /// Interactive ad SDK with an ads manager
    SdkCallback,
    /// IMA3 plugin events
    Brightcove,
    /// FreeWheel plugin over the generic events
    FreeWheel,
    /// Stream-manifest ad insertion with a pushed stream handle
    StreamManifest,
    /// Server-side stitching with a polled avail schedule
    Schedule,
}

impl ProviderKind {
    /// Tracker name reported to the sink
    pub fn tracker_name(&self) -> &'static str {
        match self {
            ProviderKind::Generic => "videojs-ads",
            ProviderKind::SdkCallback => "ima-ads",
            ProviderKind::Brightcove => "brightcove-ima-ads",
            ProviderKind::FreeWheel => "freewheel-ads",
            ProviderKind::StreamManifest => "dai-ads",
            ProviderKind::Schedule => "aws-media-tailor",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tracker_name())
    }
}

/// Native provider events that do not travel as named player events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderEvent {
    Sdk(SdkEvent),
    Stream(StreamEvent),
}

/// Ad activity the content tracker needs to know about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdSignal {
    Started { position: Option<AdPosition> },
    Ended,
    /// The provider has nothing left to play, post-roll included
    AllCompleted,
}

/// Everything an ad tracker may touch while handling one event
pub struct AdContext<'a> {
    pub player: &'a dyn HostPlayer,
    pub config: &'a TrackerConfig,
    emitter: &'a mut Emitter,
    session_live: bool,
    signals: Vec<AdSignal>,
}

impl<'a> AdContext<'a> {
    pub fn new(
        player: &'a dyn HostPlayer,
        config: &'a TrackerConfig,
        emitter: &'a mut Emitter,
        session_live: bool,
    ) -> Self {
        Self {
            player,
            config,
            emitter,
            session_live,
            signals: Vec::new(),
        }
    }

    /// Emit an ad-origin canonical event
    pub fn emit(&mut self, tracker: &str, event: CanonicalEvent, attributes: AdAttributes) {
        self.emitter.emit(tracker, event, Attributes::Ad(attributes));
    }

    /// Tell the content tracker about ad activity
    pub fn signal(&mut self, signal: AdSignal) {
        self.signals.push(signal);
    }

    /// False once the session has ended or the player is gone
    pub fn is_session_live(&self) -> bool {
        self.session_live
    }

    pub fn into_signals(self) -> Vec<AdSignal> {
        self.signals
    }
}

/// Common contract of every ad tracker variant
#[async_trait]
pub trait AdTracker: Send {
    fn kind(&self) -> ProviderKind;

    fn tracker_name(&self) -> &'static str {
        self.kind().tracker_name()
    }

    /// False once the tracker gave up for this session
    fn is_active(&self) -> bool {
        true
    }

    /// Register with the provider
    fn on_activated(&mut self, ctx: &mut AdContext<'_>);

    /// Unregister everything registered in `on_activated`
    fn on_deactivated(&mut self, ctx: &mut AdContext<'_>);

    /// Named player event; trackers ignore kinds they did not subscribe to
    fn handle_player_event(&mut self, _kind: PlayerEventKind, _ctx: &mut AdContext<'_>) {}

    fn handle_provider_event(&mut self, _event: &ProviderEvent, _ctx: &mut AdContext<'_>) {}

    /// Apply results of background work that already arrived
    fn poll_background(&mut self, _ctx: &mut AdContext<'_>) {}

    /// Wait for the next background result. Returns false when nothing is
    /// outstanding.
    async fn wait_background(&mut self) -> bool {
        false
    }

    /// Planned break offsets, when the provider publishes them
    fn cue_points(&self) -> Option<CuePoints> {
        None
    }

    /// Position of the ad currently playing
    fn current_position(&self, _player: &dyn HostPlayer) -> Option<AdPosition> {
        None
    }

    /// Metadata attached to this tracker's events
    fn ad_attributes(&self, player: &dyn HostPlayer) -> AdAttributes;
}
