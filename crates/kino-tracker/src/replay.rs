//! Scripted hosts and provider fakes
//!
//! In-memory implementations of every boundary trait the tracker talks to,
//! plus a JSON replay format that drives a [`ContentTracker`] through a
//! recorded sequence of player and provider events. Used by the test suites
//! and by the `replay` command of the CLI.

use crate::{
    ads::{
        schedule::{SessionRequest, SessionResponse, TrackingDocument},
        AdsManager, ProviderEvent, ProviderKind, ScheduleClient, SdkAd, SdkEvent, SdkEventKind,
        StreamEvent, StreamEventKind, StreamManager,
    },
    config::TrackerConfig,
    events::TelemetrySink,
    player::{
        FreewheelAd, HostPlayer, ListenerId, MediaInfo, PlayerCapabilities, PlayerEventKind,
        ProviderFault, ProviderResult,
    },
    session::ContentTracker,
    tech::TechHandle,
    types::{MediaError, PlaybackState, Preload, SessionId},
    Error, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use url::Url;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Listener registrations handed out by a fake
#[derive(Debug)]
struct ListenerBook<K> {
    next_id: u64,
    active: Vec<(K, ListenerId)>,
    /// Removals that matched no active registration
    unmatched: Vec<(K, ListenerId)>,
}

impl<K> Default for ListenerBook<K> {
    fn default() -> Self {
        Self {
            next_id: 1,
            active: Vec::new(),
            unmatched: Vec::new(),
        }
    }
}

impl<K: Copy + PartialEq> ListenerBook<K> {
    fn add(&mut self, kind: K) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.active.push((kind, id));
        id
    }

    fn remove(&mut self, kind: K, id: ListenerId) {
        match self.active.iter().position(|entry| *entry == (kind, id)) {
            Some(index) => {
                self.active.remove(index);
            }
            None => self.unmatched.push((kind, id)),
        }
    }

    fn contains(&self, kind: K) -> bool {
        self.active.iter().any(|(k, _)| *k == kind)
    }
}

// ============================================================================
// Player
// ============================================================================

#[derive(Default)]
struct PlayerState {
    listeners: ListenerBook<PlayerEventKind>,
    src: Option<String>,
    current_time: f64,
    duration: Option<f64>,
    muted: bool,
    autoplay: bool,
    preload: Preload,
    fullscreen: bool,
    playback_rate: f64,
    error: Option<MediaError>,
    capabilities: PlayerCapabilities,
    tech: Option<Arc<dyn TechHandle>>,
    media_info: Option<MediaInfo>,
    ads_snapshot_time: Option<f64>,
    ads_plugin_version: Option<String>,
    ads_manager: Option<Arc<dyn AdsManager>>,
    stream_manager: Option<Arc<dyn StreamManager>>,
    ima3_ad_time: Option<f64>,
    freewheel_ad: Option<FreewheelAd>,
    source_changes: Vec<(String, String)>,
    seek_enabled: bool,
}

/// Host player whose every property is set by the caller
pub struct ScriptedPlayer {
    state: Mutex<PlayerState>,
}

impl ScriptedPlayer {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(PlayerState {
                src: Some(src.into()),
                playback_rate: 1.0,
                seek_enabled: true,
                ..PlayerState::default()
            }),
        }
    }

    pub fn set_current_time(&self, seconds: f64) {
        lock(&self.state).current_time = seconds;
    }

    pub fn set_duration(&self, seconds: Option<f64>) {
        lock(&self.state).duration = seconds;
    }

    pub fn set_muted(&self, muted: bool) {
        lock(&self.state).muted = muted;
    }

    pub fn set_error(&self, error: Option<MediaError>) {
        lock(&self.state).error = error;
    }

    pub fn set_capabilities(&self, capabilities: PlayerCapabilities) {
        lock(&self.state).capabilities = capabilities;
    }

    pub fn set_tech(&self, tech: Option<Arc<dyn TechHandle>>) {
        lock(&self.state).tech = tech;
    }

    pub fn set_media_info(&self, info: Option<MediaInfo>) {
        lock(&self.state).media_info = info;
    }

    pub fn set_ads_snapshot_time(&self, seconds: Option<f64>) {
        lock(&self.state).ads_snapshot_time = seconds;
    }

    pub fn set_ads_plugin_version(&self, version: impl Into<String>) {
        lock(&self.state).ads_plugin_version = Some(version.into());
    }

    pub fn set_ads_manager(&self, manager: Arc<dyn AdsManager>) {
        lock(&self.state).ads_manager = Some(manager);
    }

    pub fn set_stream_manager(&self, manager: Arc<dyn StreamManager>) {
        lock(&self.state).stream_manager = Some(manager);
    }

    pub fn set_ima3_ad_time(&self, seconds: Option<f64>) {
        lock(&self.state).ima3_ad_time = seconds;
    }

    pub fn set_freewheel_ad(&self, ad: FreewheelAd) {
        lock(&self.state).freewheel_ad = Some(ad);
    }

    /// Active listener registrations
    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.active.len()
    }

    pub fn has_listener(&self, kind: PlayerEventKind) -> bool {
        lock(&self.state).listeners.contains(kind)
    }

    /// `off` calls that named no active registration
    pub fn unmatched_removals(&self) -> Vec<(PlayerEventKind, ListenerId)> {
        lock(&self.state).listeners.unmatched.clone()
    }

    /// Every `set_source` call as `(src, mime type)`
    pub fn source_changes(&self) -> Vec<(String, String)> {
        lock(&self.state).source_changes.clone()
    }

    pub fn seek_enabled(&self) -> bool {
        lock(&self.state).seek_enabled
    }
}

impl HostPlayer for ScriptedPlayer {
    fn on(&self, kind: PlayerEventKind) -> ListenerId {
        lock(&self.state).listeners.add(kind)
    }

    fn off(&self, kind: PlayerEventKind, id: ListenerId) {
        lock(&self.state).listeners.remove(kind, id);
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).current_time
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.state).duration
    }

    fn muted(&self) -> bool {
        lock(&self.state).muted
    }

    fn autoplay(&self) -> bool {
        lock(&self.state).autoplay
    }

    fn preload(&self) -> Preload {
        lock(&self.state).preload
    }

    fn fullscreen(&self) -> bool {
        lock(&self.state).fullscreen
    }

    fn playback_rate(&self) -> f64 {
        lock(&self.state).playback_rate
    }

    fn current_src(&self) -> Option<String> {
        lock(&self.state).src.clone()
    }

    fn error(&self) -> Option<MediaError> {
        lock(&self.state).error.clone()
    }

    fn capabilities(&self) -> PlayerCapabilities {
        lock(&self.state).capabilities
    }

    fn tech(&self) -> Option<Arc<dyn TechHandle>> {
        lock(&self.state).tech.clone()
    }

    fn set_source(&self, src: &str, mime_type: &str) {
        let mut state = lock(&self.state);
        state.src = Some(src.to_string());
        state
            .source_changes
            .push((src.to_string(), mime_type.to_string()));
    }

    fn set_seek_enabled(&self, enabled: bool) {
        lock(&self.state).seek_enabled = enabled;
    }

    fn ads_snapshot_time(&self) -> ProviderResult<Option<f64>> {
        Ok(lock(&self.state).ads_snapshot_time)
    }

    fn media_info(&self) -> ProviderResult<MediaInfo> {
        lock(&self.state)
            .media_info
            .clone()
            .ok_or_else(|| ProviderFault::unavailable("media info"))
    }

    fn ads_plugin_version(&self) -> ProviderResult<String> {
        lock(&self.state)
            .ads_plugin_version
            .clone()
            .ok_or_else(|| ProviderFault::unavailable("ads plugin"))
    }

    fn ads_manager(&self) -> Option<Arc<dyn AdsManager>> {
        lock(&self.state).ads_manager.clone()
    }

    fn stream_manager(&self) -> Option<Arc<dyn StreamManager>> {
        lock(&self.state).stream_manager.clone()
    }

    fn ima3_ad_time(&self) -> ProviderResult<f64> {
        lock(&self.state)
            .ima3_ad_time
            .ok_or_else(|| ProviderFault::unavailable("ima3 ad player"))
    }

    fn freewheel_ad(&self) -> ProviderResult<FreewheelAd> {
        lock(&self.state)
            .freewheel_ad
            .clone()
            .ok_or_else(|| ProviderFault::unavailable("freewheel ad"))
    }
}

// ============================================================================
// SDK
// ============================================================================

/// SDK ad; unset optional fields read as provider faults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedAd {
    pub id: String,
    pub creative_id: Option<String>,
    /// Seconds
    pub duration: f64,
    pub media_url: Option<String>,
    pub title: Option<String>,
    pub pod_index: i32,
    pub bitrate: Option<u64>,
    pub click_through_url: Option<String>,
}

fn present<T: Clone>(value: &Option<T>, what: &str) -> ProviderResult<T> {
    value.clone().ok_or_else(|| ProviderFault::unavailable(what))
}

impl SdkAd for ScriptedAd {
    fn ad_id(&self) -> ProviderResult<String> {
        Ok(self.id.clone())
    }

    fn creative_id(&self) -> ProviderResult<String> {
        present(&self.creative_id, "creative id")
    }

    fn duration(&self) -> ProviderResult<f64> {
        Ok(self.duration)
    }

    fn media_url(&self) -> ProviderResult<String> {
        present(&self.media_url, "media url")
    }

    fn title(&self) -> ProviderResult<String> {
        present(&self.title, "title")
    }

    fn pod_index(&self) -> ProviderResult<i32> {
        Ok(self.pod_index)
    }

    fn bitrate(&self) -> ProviderResult<u64> {
        present(&self.bitrate, "bitrate")
    }

    fn click_through_url(&self) -> ProviderResult<String> {
        present(&self.click_through_url, "click-through url")
    }
}

#[derive(Default)]
struct AdsManagerState {
    listeners: ListenerBook<SdkEventKind>,
    cue_points: Vec<f64>,
    current_ad: Option<ScriptedAd>,
    remaining_time: Option<f64>,
}

/// SDK ads manager with a settable current ad
pub struct ScriptedAdsManager {
    state: Mutex<AdsManagerState>,
}

impl ScriptedAdsManager {
    pub fn new(cue_points: Vec<f64>) -> Self {
        Self {
            state: Mutex::new(AdsManagerState {
                cue_points,
                ..AdsManagerState::default()
            }),
        }
    }

    pub fn set_current_ad(&self, ad: Option<ScriptedAd>) {
        lock(&self.state).current_ad = ad;
    }

    pub fn set_remaining_time(&self, seconds: f64) {
        lock(&self.state).remaining_time = Some(seconds);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.active.len()
    }

    pub fn unmatched_removals(&self) -> Vec<(SdkEventKind, ListenerId)> {
        lock(&self.state).listeners.unmatched.clone()
    }
}

impl AdsManager for ScriptedAdsManager {
    fn add_event_listener(&self, kind: SdkEventKind) -> ListenerId {
        lock(&self.state).listeners.add(kind)
    }

    fn remove_event_listener(&self, kind: SdkEventKind, id: ListenerId) {
        lock(&self.state).listeners.remove(kind, id);
    }

    fn cue_points(&self) -> ProviderResult<Vec<f64>> {
        Ok(lock(&self.state).cue_points.clone())
    }

    fn current_ad(&self) -> ProviderResult<Option<Arc<dyn SdkAd>>> {
        Ok(lock(&self.state)
            .current_ad
            .clone()
            .map(|ad| Arc::new(ad) as Arc<dyn SdkAd>))
    }

    fn remaining_time(&self) -> ProviderResult<f64> {
        lock(&self.state)
            .remaining_time
            .ok_or_else(|| ProviderFault::unavailable("remaining time"))
    }

    fn sdk_version(&self) -> ProviderResult<String> {
        Ok("scripted".to_string())
    }
}

// ============================================================================
// Stream handle
// ============================================================================

#[derive(Default)]
struct StreamManagerState {
    listeners: ListenerBook<StreamEventKind>,
    stream_time: Option<f64>,
}

/// Stream-manifest handle with a settable stream time
#[derive(Default)]
pub struct ScriptedStreamManager {
    state: Mutex<StreamManagerState>,
}

impl ScriptedStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stream_time(&self, seconds: Option<f64>) {
        lock(&self.state).stream_time = seconds;
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.active.len()
    }

    pub fn unmatched_removals(&self) -> Vec<(StreamEventKind, ListenerId)> {
        lock(&self.state).listeners.unmatched.clone()
    }
}

impl StreamManager for ScriptedStreamManager {
    fn add_event_listener(&self, kind: StreamEventKind) -> ListenerId {
        lock(&self.state).listeners.add(kind)
    }

    fn remove_event_listener(&self, kind: StreamEventKind, id: ListenerId) {
        lock(&self.state).listeners.remove(kind, id);
    }

    fn stream_time(&self) -> ProviderResult<f64> {
        lock(&self.state)
            .stream_time
            .ok_or_else(|| ProviderFault::unavailable("stream time"))
    }
}

// ============================================================================
// Stitching service
// ============================================================================

/// Stitching service with canned responses. A missing response fails the
/// corresponding request.
pub struct ScriptedScheduleClient {
    session: Option<SessionResponse>,
    tracking: Option<TrackingDocument>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedScheduleClient {
    pub fn new(session: Option<SessionResponse>, tracking: Option<TrackingDocument>) -> Self {
        Self {
            session,
            tracking,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ScheduleClient for ScriptedScheduleClient {
    async fn open_session(&self, url: &Url, _request: &SessionRequest) -> Result<SessionResponse> {
        lock(&self.requests).push(url.to_string());
        self.session
            .clone()
            .ok_or_else(|| Error::bootstrap("scripted session failure"))
    }

    async fn fetch_tracking(&self, url: &Url) -> Result<TrackingDocument> {
        lock(&self.requests).push(url.to_string());
        self.tracking
            .clone()
            .ok_or_else(|| Error::ScheduleFetch("scripted tracking failure".to_string()))
    }
}

// ============================================================================
// Replay scripts
// ============================================================================

/// Canned stitching-service responses for a script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleFixture {
    pub session: Option<SessionResponse>,
    pub tracking: Option<TrackingDocument>,
}

/// SDK ads manager present from the start of a script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsManagerFixture {
    pub cue_points: Vec<f64>,
}

/// One step of a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Dispatch a named player event, optionally moving the playhead first
    Event {
        event: PlayerEventKind,
        #[serde(default)]
        time: Option<f64>,
    },
    /// Move the playhead and dispatch `timeupdate`
    Tick { time: f64 },
    /// Deliver an SDK callback, optionally replacing the current ad first
    Sdk {
        #[serde(flatten)]
        event: SdkEvent,
        #[serde(default)]
        ad: Option<ScriptedAd>,
    },
    /// Deliver a stream callback
    Stream {
        #[serde(flatten)]
        event: StreamEvent,
    },
    /// The host hands over a stream handle
    StreamHandle,
    /// Set the player error and dispatch `error`
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Wait until background work has nothing left to report
    Settle,
}

/// A recorded playback session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// Initial media source
    pub source: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub capabilities: PlayerCapabilities,
    #[serde(default)]
    pub ads_manager: Option<AdsManagerFixture>,
    #[serde(default)]
    pub schedule: ScheduleFixture,
    pub steps: Vec<ReplayStep>,
}

/// What a replay left behind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub steps: usize,
    pub session_id: SessionId,
    pub final_state: PlaybackState,
    pub ad_tracker: Option<ProviderKind>,
}

impl ReplayScript {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Drive a fresh content tracker through every step, delivering to `sink`
    pub async fn run(
        &self,
        config: TrackerConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<ReplayReport> {
        let player = Arc::new(ScriptedPlayer::new(self.source.clone()));
        player.set_duration(self.duration);
        player.set_capabilities(self.capabilities);

        let ads_manager = self.ads_manager.as_ref().map(|fixture| {
            let manager = Arc::new(ScriptedAdsManager::new(fixture.cue_points.clone()));
            player.set_ads_manager(manager.clone());
            manager
        });
        let client = Arc::new(ScriptedScheduleClient::new(
            self.schedule.session.clone(),
            self.schedule.tracking.clone(),
        ));

        let mut tracker =
            ContentTracker::new(player.clone(), sink, config)?.with_schedule_client(client);
        info!(steps = self.steps.len(), source = %self.source, "Replaying script");

        for step in &self.steps {
            debug!(?step, "Replay step");
            match step {
                ReplayStep::Event { event, time } => {
                    if let Some(time) = time {
                        player.set_current_time(*time);
                    }
                    tracker.handle_event(*event);
                }
                ReplayStep::Tick { time } => {
                    player.set_current_time(*time);
                    tracker.handle_event(PlayerEventKind::TimeUpdate);
                }
                ReplayStep::Sdk { event, ad } => {
                    if let (Some(manager), Some(ad)) = (&ads_manager, ad) {
                        manager.set_current_ad(Some(ad.clone()));
                    }
                    tracker.handle_provider_event(ProviderEvent::Sdk(event.clone()));
                }
                ReplayStep::Stream { event } => {
                    tracker.handle_provider_event(ProviderEvent::Stream(event.clone()));
                }
                ReplayStep::StreamHandle => {
                    tracker.on_stream_manager(Arc::new(ScriptedStreamManager::new()));
                }
                ReplayStep::Error { code, message } => {
                    player.set_error(Some(MediaError {
                        code: code.clone(),
                        message: message.clone(),
                    }));
                    tracker.handle_event(PlayerEventKind::Error);
                }
                ReplayStep::Settle => while tracker.settle().await {},
            }
        }

        Ok(ReplayReport {
            steps: self.steps.len(),
            session_id: tracker.session_id(),
            final_state: tracker.state(),
            ad_tracker: tracker.ad_tracker_kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;

    #[test]
    fn test_listener_book_tracks_mismatches() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        let id = player.on(PlayerEventKind::Play);
        player.off(PlayerEventKind::Pause, id);
        assert_eq!(player.listener_count(), 1);
        assert_eq!(player.unmatched_removals(), vec![(PlayerEventKind::Pause, id)]);

        player.off(PlayerEventKind::Play, id);
        assert_eq!(player.listener_count(), 0);
    }

    #[test]
    fn test_script_parsing() {
        let json = r#"{
            "source": "https://cdn.example.com/movie.mp4",
            "capabilities": {"ima_sdk": true},
            "ads_manager": {"cue_points": [0, -1]},
            "steps": [
                {"step": "event", "event": "adsready"},
                {"step": "sdk", "kind": "started", "ad": {"id": "a", "duration": 15, "pod_index": 0}},
                {"step": "tick", "time": 3.5},
                {"step": "error", "code": "4"},
                {"step": "settle"}
            ]
        }"#;
        let script = ReplayScript::from_json(json).unwrap();

        assert!(script.capabilities.ima_sdk);
        assert_eq!(script.steps.len(), 5);
        match &script.steps[1] {
            ReplayStep::Sdk { event, ad } => {
                assert_eq!(event.kind, SdkEventKind::Started);
                assert_eq!(ad.as_ref().map(|a| a.pod_index), Some(0));
            }
            other => panic!("unexpected step: {other:?}"),
        }
        assert_eq!(script.steps[4], ReplayStep::Settle);
    }

    #[tokio::test]
    async fn test_replay_plain_content() {
        let script = ReplayScript {
            source: "https://cdn.example.com/movie.mp4".to_string(),
            duration: Some(60.0),
            capabilities: PlayerCapabilities::default(),
            ads_manager: None,
            schedule: ScheduleFixture::default(),
            steps: vec![
                ReplayStep::Event {
                    event: PlayerEventKind::Play,
                    time: None,
                },
                ReplayStep::Event {
                    event: PlayerEventKind::Playing,
                    time: None,
                },
                ReplayStep::Tick { time: 1.0 },
                ReplayStep::Event {
                    event: PlayerEventKind::Ended,
                    time: Some(60.0),
                },
            ],
        };
        let sink = MemorySink::new();

        let report = script
            .run(TrackerConfig::default(), Arc::new(sink.clone()))
            .await
            .unwrap();

        assert_eq!(report.final_state, PlaybackState::Ended);
        assert_eq!(report.ad_tracker, None);
        assert_eq!(
            sink.actions(),
            vec![
                "CONTENT_REQUEST",
                "CONTENT_RESUME",
                "CONTENT_BUFFER_END",
                "CONTENT_START",
                "CONTENT_END",
            ]
        );
    }
}
