//! Core types for Kino Tracker

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a tracked playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content lifecycle states as seen by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing requested yet
    Idle,
    /// Playback requested by the viewer
    Requested,
    /// Playhead is advancing
    Started,
    /// Playback paused
    Paused,
    /// Waiting for data
    Buffering,
    /// Seek in progress
    Seeking,
    /// Terminal for the session
    Ended,
}

impl PlaybackState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: PlaybackState) -> bool {
        use PlaybackState::*;
        match (self, target) {
            (Ended, _) => false,
            (_, Idle) => false,
            (from, to) => *from != to,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Requested => write!(f, "requested"),
            PlaybackState::Started => write!(f, "started"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Seeking => write!(f, "seeking"),
            PlaybackState::Ended => write!(f, "ended"),
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Currently decoded rendition, as far as the tech can tell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionInfo {
    pub name: Option<String>,
    /// Bits per second
    pub bitrate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl RenditionInfo {
    /// True when the tech could not tell us anything
    pub fn is_unknown(&self) -> bool {
        self.name.is_none() && self.bitrate.is_none() && self.width.is_none() && self.height.is_none()
    }
}

/// Position of an ad break within the content timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdPosition {
    Pre,
    Mid,
    Post,
}

impl AdPosition {
    /// Map an SDK pod index: 0 is the pre-roll pod, -1 the post-roll pod
    pub fn from_pod_index(index: i32) -> Self {
        match index {
            0 => AdPosition::Pre,
            -1 => AdPosition::Post,
            _ => AdPosition::Mid,
        }
    }

    /// Map an ad-server slot type such as `PREROLL`
    pub fn from_slot_type(slot: &str) -> Option<Self> {
        match slot.to_ascii_uppercase().as_str() {
            "PREROLL" => Some(AdPosition::Pre),
            "MIDROLL" => Some(AdPosition::Mid),
            "POSTROLL" => Some(AdPosition::Post),
            _ => None,
        }
    }

    /// Classify from the content playhead when the provider gives no flag.
    ///
    /// Within `pre_window` seconds of the start counts as pre-roll, within
    /// `post_window` seconds of a finite duration counts as post-roll.
    pub fn classify_by_playhead(
        current_time: f64,
        duration: Option<f64>,
        pre_window: f64,
        post_window: f64,
    ) -> Self {
        if current_time < pre_window {
            return AdPosition::Pre;
        }
        match duration {
            Some(d) if d.is_finite() && d > 0.0 && current_time > d - post_window => AdPosition::Post,
            _ => AdPosition::Mid,
        }
    }
}

impl std::fmt::Display for AdPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdPosition::Pre => write!(f, "pre"),
            AdPosition::Mid => write!(f, "mid"),
            AdPosition::Post => write!(f, "post"),
        }
    }
}

/// Ad progress milestones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quartile {
    First,
    Midpoint,
    Third,
}

impl Quartile {
    pub const ALL: [Quartile; 3] = [Quartile::First, Quartile::Midpoint, Quartile::Third];

    /// Quartile number as reported to the sink
    pub fn number(&self) -> u8 {
        match self {
            Quartile::First => 1,
            Quartile::Midpoint => 2,
            Quartile::Third => 3,
        }
    }

    /// Fraction of the ad duration at which this quartile is reached
    pub fn fraction(&self) -> f64 {
        match self {
            Quartile::First => 0.25,
            Quartile::Midpoint => 0.5,
            Quartile::Third => 0.75,
        }
    }
}

impl std::fmt::Display for Quartile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Q{}", self.number())
    }
}

/// Preload policy of the media element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preload {
    None,
    Metadata,
    #[default]
    Auto,
}

/// Error reported by the host player
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl MediaError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
        }
    }
}

/// Planned ad-break offsets for a session, in seconds.
///
/// An offset of `-1` marks a post-roll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuePoints(pub Vec<f64>);

impl CuePoints {
    /// Sentinel offset for a post-roll break
    pub const POST_ROLL: f64 = -1.0;

    pub fn new(offsets: Vec<f64>) -> Self {
        Self(offsets)
    }

    pub fn has_post_roll(&self) -> bool {
        self.0.iter().any(|offset| *offset == Self::POST_ROLL)
    }

    pub fn has_pre_roll(&self) -> bool {
        self.0.iter().any(|offset| *offset == 0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_index_positions() {
        assert_eq!(AdPosition::from_pod_index(0), AdPosition::Pre);
        assert_eq!(AdPosition::from_pod_index(-1), AdPosition::Post);
        assert_eq!(AdPosition::from_pod_index(2), AdPosition::Mid);
    }

    #[test]
    fn test_playhead_classification() {
        assert_eq!(AdPosition::classify_by_playhead(2.0, Some(600.0), 5.0, 10.0), AdPosition::Pre);
        assert_eq!(AdPosition::classify_by_playhead(300.0, Some(600.0), 5.0, 10.0), AdPosition::Mid);
        assert_eq!(AdPosition::classify_by_playhead(595.0, Some(600.0), 5.0, 10.0), AdPosition::Post);
        // live streams never classify as post-roll
        assert_eq!(
            AdPosition::classify_by_playhead(595.0, Some(f64::INFINITY), 5.0, 10.0),
            AdPosition::Mid
        );
    }

    #[test]
    fn test_slot_types() {
        assert_eq!(AdPosition::from_slot_type("POSTROLL"), Some(AdPosition::Post));
        assert_eq!(AdPosition::from_slot_type("overlay"), None);
    }

    #[test]
    fn test_ended_is_terminal() {
        assert!(PlaybackState::Idle.can_transition_to(PlaybackState::Requested));
        assert!(PlaybackState::Started.can_transition_to(PlaybackState::Paused));
        assert!(PlaybackState::Paused.can_transition_to(PlaybackState::Ended));
        assert!(!PlaybackState::Ended.can_transition_to(PlaybackState::Started));
        assert!(!PlaybackState::Started.can_transition_to(PlaybackState::Idle));
    }

    #[test]
    fn test_cue_points_post_roll() {
        assert!(CuePoints::new(vec![0.0, 300.0, -1.0]).has_post_roll());
        assert!(!CuePoints::new(vec![0.0, 300.0]).has_post_roll());
    }

    #[test]
    fn test_quartile_order() {
        assert!(Quartile::First < Quartile::Midpoint);
        assert_eq!(Quartile::Third.number(), 3);
        assert_eq!(Quartile::Midpoint.fraction(), 0.5);
    }
}
