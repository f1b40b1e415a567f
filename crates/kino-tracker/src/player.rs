//! Host player boundary
//!
//! The tracker never drives playback. It subscribes to named player events,
//! reads a handful of synchronous accessors, and reaches provider objects
//! (ads plugins, SDK managers, stream handles) through optional accessors
//! that may fail at any time.

use crate::ads::sdk::AdsManager;
use crate::ads::stream::StreamManager;
use crate::tech::TechHandle;
use crate::types::{MediaError, Preload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Failure while reading a provider-owned object
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderFault(pub String);

impl ProviderFault {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// The accessor exists but the object behind it is not there
    pub fn unavailable(what: &str) -> Self {
        Self(format!("{what} unavailable"))
    }
}

/// Result of a provider accessor
pub type ProviderResult<T> = std::result::Result<T, ProviderFault>;

/// Read a provider value, treating any fault as "unknown".
///
/// Faults are logged at trace level and never propagate into tracker state.
pub fn introspect<T>(what: &'static str, probe: impl FnOnce() -> ProviderResult<T>) -> Option<T> {
    match probe() {
        Ok(value) => Some(value),
        Err(fault) => {
            trace!(what, %fault, "Provider introspection failed");
            None
        }
    }
}

/// Named events a host player can dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerEventKind {
    // Content
    #[serde(rename = "loadstart")]
    LoadStart,
    #[serde(rename = "loadeddata")]
    LoadedData,
    #[serde(rename = "loadedmetadata")]
    LoadedMetadata,
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "playing")]
    Playing,
    #[serde(rename = "pause")]
    Pause,
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "stalled")]
    Stalled,
    #[serde(rename = "seeking")]
    Seeking,
    #[serde(rename = "seeked")]
    Seeked,
    #[serde(rename = "timeupdate")]
    TimeUpdate,
    #[serde(rename = "ended")]
    Ended,
    #[serde(rename = "dispose")]
    Dispose,
    #[serde(rename = "abort")]
    Abort,
    #[serde(rename = "error")]
    Error,

    // Ads plugin
    #[serde(rename = "adsready")]
    AdsReady,
    #[serde(rename = "adstart")]
    AdStart,
    #[serde(rename = "adend")]
    AdEnd,
    #[serde(rename = "adskip")]
    AdSkip,
    #[serde(rename = "adserror")]
    AdsError,
    #[serde(rename = "ads-request")]
    AdsRequest,
    #[serde(rename = "ads-load")]
    AdsLoad,
    #[serde(rename = "ads-click")]
    AdsClick,
    #[serde(rename = "ads-pod-started")]
    AdsPodStarted,
    #[serde(rename = "ads-pod-ended")]
    AdsPodEnded,
    #[serde(rename = "ads-first-quartile")]
    AdsFirstQuartile,
    #[serde(rename = "ads-midpoint")]
    AdsMidpoint,
    #[serde(rename = "ads-third-quartile")]
    AdsThirdQuartile,
    #[serde(rename = "ads-pause")]
    AdsPause,
    #[serde(rename = "ads-play")]
    AdsPlay,

    // IMA3 plugin
    #[serde(rename = "ima3-started")]
    Ima3Started,
    #[serde(rename = "ima3-paused")]
    Ima3Paused,
    #[serde(rename = "ima3-resumed")]
    Ima3Resumed,
    #[serde(rename = "ima3-complete")]
    Ima3Complete,
    #[serde(rename = "ima3-skipped")]
    Ima3Skipped,
}

impl PlayerEventKind {
    /// Event name as the player dispatches it
    pub fn as_str(&self) -> &'static str {
        use PlayerEventKind::*;
        match self {
            LoadStart => "loadstart",
            LoadedData => "loadeddata",
            LoadedMetadata => "loadedmetadata",
            Play => "play",
            Playing => "playing",
            Pause => "pause",
            Waiting => "waiting",
            Stalled => "stalled",
            Seeking => "seeking",
            Seeked => "seeked",
            TimeUpdate => "timeupdate",
            Ended => "ended",
            Dispose => "dispose",
            Abort => "abort",
            Error => "error",
            AdsReady => "adsready",
            AdStart => "adstart",
            AdEnd => "adend",
            AdSkip => "adskip",
            AdsError => "adserror",
            AdsRequest => "ads-request",
            AdsLoad => "ads-load",
            AdsClick => "ads-click",
            AdsPodStarted => "ads-pod-started",
            AdsPodEnded => "ads-pod-ended",
            AdsFirstQuartile => "ads-first-quartile",
            AdsMidpoint => "ads-midpoint",
            AdsThirdQuartile => "ads-third-quartile",
            AdsPause => "ads-pause",
            AdsPlay => "ads-play",
            Ima3Started => "ima3-started",
            Ima3Paused => "ima3-paused",
            Ima3Resumed => "ima3-resumed",
            Ima3Complete => "ima3-complete",
            Ima3Skipped => "ima3-skipped",
        }
    }
}

impl std::fmt::Display for PlayerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle returned by a listener registration.
///
/// Unregistering must hand back the exact id the registration returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// Plugins and SDKs the host has loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerCapabilities {
    /// Generic ads plugin (contrib-ads style)
    pub ads_plugin: bool,
    /// Interactive ad SDK plugin with its SDK loaded
    pub ima_sdk: bool,
    /// IMA3 plugin (Brightcove style)
    pub ima3_plugin: bool,
    /// FreeWheel plugin with its SDK loaded
    pub freewheel_plugin: bool,
    /// Stream-manifest ad insertion plugin
    pub stream_plugin: bool,
}

/// Catalog metadata some hosts expose
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub name: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
}

/// Currently playing FreeWheel ad, as far as the plugin exposes it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FreewheelAd {
    /// `PREROLL`, `MIDROLL` or `POSTROLL`
    pub slot_type: Option<String>,
    /// Seconds into the ad
    pub current_time: Option<f64>,
    /// Seconds
    pub duration: Option<f64>,
    /// Primary creative rendition asset URL
    pub src: Option<String>,
    /// Primary creative rendition asset name
    pub title: Option<String>,
}

/// The host media player.
///
/// All times are in seconds. Implementations are queried from the event
/// loop only; `Send + Sync` lets the tracker live inside async hosts.
pub trait HostPlayer: Send + Sync {
    /// Register interest in a named event
    fn on(&self, kind: PlayerEventKind) -> ListenerId;

    /// Drop a registration made by [`HostPlayer::on`]
    fn off(&self, kind: PlayerEventKind, id: ListenerId);

    fn current_time(&self) -> f64;

    /// `None` while unknown, `f64::INFINITY` for live streams
    fn duration(&self) -> Option<f64>;

    fn muted(&self) -> bool;

    fn autoplay(&self) -> bool;

    fn preload(&self) -> Preload;

    fn fullscreen(&self) -> bool;

    fn playback_rate(&self) -> f64;

    fn current_src(&self) -> Option<String>;

    /// Error object of the last failure, if any
    fn error(&self) -> Option<MediaError>;

    fn capabilities(&self) -> PlayerCapabilities;

    /// Streaming technology handle backing playback
    fn tech(&self) -> Option<Arc<dyn TechHandle>>;

    /// Replace the media source
    fn set_source(&self, src: &str, mime_type: &str);

    /// Toggle the seek bar. Hosts without one can ignore this.
    fn set_seek_enabled(&self, _enabled: bool) {}

    /// Content time saved by the ads plugin while an ad plays
    fn ads_snapshot_time(&self) -> ProviderResult<Option<f64>> {
        Ok(None)
    }

    /// Absolute timeline position for hosts that stitch content
    fn absolute_time(&self) -> ProviderResult<f64> {
        Err(ProviderFault::unavailable("absolute time"))
    }

    fn media_info(&self) -> ProviderResult<MediaInfo> {
        Err(ProviderFault::unavailable("media info"))
    }

    fn ads_plugin_version(&self) -> ProviderResult<String> {
        Err(ProviderFault::unavailable("ads plugin"))
    }

    /// SDK ads manager, once the SDK has created one
    fn ads_manager(&self) -> Option<Arc<dyn AdsManager>> {
        None
    }

    /// Stream-manifest handle, if the host already holds one
    fn stream_manager(&self) -> Option<Arc<dyn StreamManager>> {
        None
    }

    /// Playhead of the IMA3 ad player
    fn ima3_ad_time(&self) -> ProviderResult<f64> {
        Err(ProviderFault::unavailable("ima3 ad player"))
    }

    fn freewheel_ad(&self) -> ProviderResult<FreewheelAd> {
        Err(ProviderFault::unavailable("freewheel ad"))
    }
}

/// Listener registrations owned by one tracker.
///
/// Releasing hands every id back to the player it came from, so nothing is
/// left behind when a tracker goes away.
#[derive(Debug, Default)]
pub struct Subscriptions {
    entries: Vec<(PlayerEventKind, ListenerId)>,
}

impl Subscriptions {
    /// Register one listener per kind
    pub fn subscribe(player: &dyn HostPlayer, kinds: &[PlayerEventKind]) -> Self {
        let entries = kinds.iter().map(|kind| (*kind, player.on(*kind))).collect();
        Self { entries }
    }

    pub fn contains(&self, kind: PlayerEventKind) -> bool {
        self.entries.iter().any(|(k, _)| *k == kind)
    }

    /// Unregister everything with the ids the player handed out
    pub fn release(&mut self, player: &dyn HostPlayer) {
        for (kind, id) in self.entries.drain(..) {
            player.off(kind, id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introspect_maps_faults_to_none() {
        let value: Option<u32> = introspect("bitrate", || Err(ProviderFault::new("boom")));
        assert_eq!(value, None);
        assert_eq!(introspect("bitrate", || Ok(5)), Some(5));
    }

    #[test]
    fn test_event_names_round_trip() {
        let kind: PlayerEventKind = serde_json::from_str("\"ads-pod-started\"").unwrap();
        assert_eq!(kind, PlayerEventKind::AdsPodStarted);
        assert_eq!(kind.as_str(), "ads-pod-started");
        assert_eq!(
            serde_json::to_string(&PlayerEventKind::TimeUpdate).unwrap(),
            "\"timeupdate\""
        );
    }
}
