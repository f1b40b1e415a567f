//! Stream-manifest ad tracker
//!
//! The host hands over a stream handle once the stream request is made.
//! Activation builds the event-type to handler table and registers one
//! listener per entry; deactivation walks the same registrations and hands
//! each id back.

use super::progress::{Ad, AdBreak};
use super::{AdContext, AdSignal, AdTracker, ProviderEvent, ProviderKind};
use crate::events::{AdAttributes, CanonicalEvent};
use crate::player::{introspect, HostPlayer, ListenerId, ProviderResult};
use crate::types::{AdPosition, CuePoints, MediaError, Quartile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Event types a stream handle dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Loaded,
    StreamInitialized,
    Error,
    AdBreakStarted,
    AdBreakEnded,
    AdPeriodStarted,
    AdPeriodEnded,
    Started,
    FirstQuartile,
    Midpoint,
    ThirdQuartile,
    Complete,
    Skipped,
    Paused,
    Resumed,
    Click,
    VideoClicked,
    CuepointsChanged,
    TimedMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Live,
    Vod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamData {
    pub stream_id: Option<String>,
    pub url: Option<String>,
    pub ad_tag_parameters: BTreeMap<String, String>,
    pub stream_type: Option<StreamType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamAdBreak {
    pub id: Option<String>,
    pub title: Option<String>,
    pub ad_count: usize,
    /// Explicit position flag, when the stream reports one
    pub position: Option<AdPosition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamAd {
    pub ad_id: Option<String>,
    pub creative_id: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub advertiser_name: Option<String>,
    pub click_through_url: Option<String>,
    pub deal_id: Option<String>,
    pub wrapper_ad_ids: Vec<String>,
}

/// Stitched break on the stream timeline, seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamCuePoint {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub played: bool,
}

/// One stream callback and whatever payload it carried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_break: Option<StreamAdBreak>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad: Option<StreamAd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MediaError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cue_points: Option<Vec<StreamCuePoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind) -> Self {
        Self {
            kind,
            stream: None,
            ad_break: None,
            ad: None,
            error: None,
            cue_points: None,
            metadata: None,
        }
    }

    pub fn with_ad(mut self, ad: StreamAd) -> Self {
        self.ad = Some(ad);
        self
    }

    pub fn with_ad_break(mut self, ad_break: StreamAdBreak) -> Self {
        self.ad_break = Some(ad_break);
        self
    }
}

/// Stream handle owned by the stream-manifest plugin
pub trait StreamManager: Send + Sync {
    fn add_event_listener(&self, kind: StreamEventKind) -> ListenerId;

    fn remove_event_listener(&self, kind: StreamEventKind, id: ListenerId);

    /// Seconds on the stitched stream timeline
    fn stream_time(&self) -> ProviderResult<f64>;
}

type StreamHandler = fn(&mut StreamTracker, &StreamEvent, &mut AdContext<'_>);

const HANDLERS: &[(StreamEventKind, StreamHandler)] = &[
    (StreamEventKind::Loaded, StreamTracker::on_stream_loaded),
    (StreamEventKind::StreamInitialized, StreamTracker::on_stream_initialized),
    (StreamEventKind::Error, StreamTracker::on_stream_error),
    (StreamEventKind::AdBreakStarted, StreamTracker::on_break_started),
    (StreamEventKind::AdBreakEnded, StreamTracker::on_break_ended),
    (StreamEventKind::AdPeriodStarted, StreamTracker::on_period_started),
    (StreamEventKind::AdPeriodEnded, StreamTracker::on_period_ended),
    (StreamEventKind::Started, StreamTracker::on_ad_started),
    (StreamEventKind::FirstQuartile, StreamTracker::on_first_quartile),
    (StreamEventKind::Midpoint, StreamTracker::on_midpoint),
    (StreamEventKind::ThirdQuartile, StreamTracker::on_third_quartile),
    (StreamEventKind::Complete, StreamTracker::on_ad_complete),
    (StreamEventKind::Skipped, StreamTracker::on_ad_skipped),
    (StreamEventKind::Paused, StreamTracker::on_ad_paused),
    (StreamEventKind::Resumed, StreamTracker::on_ad_resumed),
    (StreamEventKind::Click, StreamTracker::on_ad_clicked),
    (StreamEventKind::VideoClicked, StreamTracker::on_ad_clicked),
    (StreamEventKind::CuepointsChanged, StreamTracker::on_cue_points_changed),
    (StreamEventKind::TimedMetadata, StreamTracker::on_timed_metadata),
];

const UNKNOWN_STREAM_ERROR: &str = "Unknown stream error";

/// Ad tracker for a stream handle
pub struct StreamTracker {
    manager: Arc<dyn StreamManager>,
    handlers: HashMap<StreamEventKind, StreamHandler>,
    registrations: Vec<(StreamEventKind, ListenerId)>,
    stream: Option<StreamData>,
    current_ad: Option<Ad>,
    current_break: Option<AdBreak>,
    cue_points: Vec<StreamCuePoint>,
}

impl StreamTracker {
    pub fn new(manager: Arc<dyn StreamManager>) -> Self {
        Self {
            manager,
            handlers: HashMap::new(),
            registrations: Vec::new(),
            stream: None,
            current_ad: None,
            current_break: None,
            cue_points: Vec::new(),
        }
    }

    /// Declared stream type, else inferred from the player's duration
    pub fn stream_type(&self, player: &dyn HostPlayer) -> StreamType {
        if let Some(stream_type) = self.stream.as_ref().and_then(|s| s.stream_type) {
            return stream_type;
        }
        match player.duration() {
            Some(d) if d.is_infinite() => StreamType::Live,
            _ => StreamType::Vod,
        }
    }

    pub fn current_break(&self) -> Option<&AdBreak> {
        self.current_break.as_ref()
    }

    pub fn current_ad(&self) -> Option<&Ad> {
        self.current_ad.as_ref()
    }

    /// Explicit flag from the break, else guessed from the content playhead
    fn position(explicit: Option<AdPosition>, ctx: &AdContext<'_>) -> AdPosition {
        explicit.unwrap_or_else(|| {
            AdPosition::classify_by_playhead(
                ctx.player.current_time(),
                ctx.player.duration(),
                ctx.config.stream.pre_roll_window_secs,
                ctx.config.stream.post_roll_window_secs,
            )
        })
    }

    fn emit(&self, event: CanonicalEvent, ctx: &mut AdContext<'_>) {
        let attributes = self.ad_attributes(ctx.player);
        ctx.emit(self.tracker_name(), event, attributes);
    }

    fn on_stream_loaded(&mut self, event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.stream = Some(event.stream.clone().unwrap_or_default());
        info!(
            stream_id = ?self.stream.as_ref().and_then(|s| s.stream_id.as_deref()),
            stream_type = ?self.stream_type(ctx.player),
            "Stream loaded"
        );
        self.emit(CanonicalEvent::Request, ctx);
    }

    fn on_stream_initialized(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.emit(CanonicalEvent::download("stream-initialized"), ctx);
    }

    fn on_stream_error(&mut self, event: &StreamEvent, ctx: &mut AdContext<'_>) {
        let detail = event.error.clone().unwrap_or_default();
        let message = detail
            .message
            .unwrap_or_else(|| UNKNOWN_STREAM_ERROR.to_string());
        error!(code = ?detail.code, %message, "Stream error");
        self.emit(CanonicalEvent::error(detail.code, Some(message)), ctx);
    }

    fn on_break_started(&mut self, event: &StreamEvent, ctx: &mut AdContext<'_>) {
        let data = event.ad_break.clone().unwrap_or_default();
        let position = Some(Self::position(data.position, ctx));
        self.current_break = Some(AdBreak {
            id: data.id,
            title: data.title,
            position,
            start_offset: Some(ctx.player.current_time()),
            duration: None,
            ad_count: data.ad_count,
        });
        debug!(?position, ads = data.ad_count, "Ad break started");
        self.emit(CanonicalEvent::AdBreakStart, ctx);
    }

    fn on_break_ended(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.emit(CanonicalEvent::AdBreakEnd, ctx);
        let closed = self.current_break.take();
        // nothing plays after the post-roll break
        if closed.and_then(|b| b.position) == Some(AdPosition::Post) {
            ctx.signal(AdSignal::AllCompleted);
        }
    }

    fn on_period_started(&mut self, event: &StreamEvent, ctx: &mut AdContext<'_>) {
        if self.current_break.is_none() {
            self.on_break_started(event, ctx);
        }
    }

    fn on_period_ended(&mut self, _event: &StreamEvent, _ctx: &mut AdContext<'_>) {
        // more ads may follow in the same break
        debug!("Ad period ended");
    }

    fn on_ad_started(&mut self, event: &StreamEvent, ctx: &mut AdContext<'_>) {
        let data = event.ad.clone().unwrap_or_default();
        let explicit = self.current_break.as_ref().and_then(|b| b.position);
        let position = Some(Self::position(explicit, ctx));

        debug!(
            ad_id = ?data.ad_id,
            advertiser = ?data.advertiser_name,
            deal_id = ?data.deal_id,
            wrappers = data.wrapper_ad_ids.len(),
            "Stream ad started"
        );
        self.current_ad = Some(Ad {
            id: data.ad_id,
            creative_id: data.creative_id,
            duration_ms: data.duration.map(|d| d * 1000.0),
            media_url: None,
            title: data.title,
            click_through_url: data.click_through_url,
            partner: Some("google-dai".to_string()),
            bitrate: None,
            position,
            ..Ad::default()
        });
        ctx.signal(AdSignal::Started { position });
        self.emit(CanonicalEvent::Start, ctx);
    }

    fn quartile(&mut self, quartile: Quartile, ctx: &mut AdContext<'_>) {
        let ad = self.current_ad.get_or_insert_with(Ad::default);
        if ad.quartiles.fire(quartile) {
            self.emit(CanonicalEvent::quartile(quartile), ctx);
        } else {
            debug!(%quartile, "Quartile already fired for this ad");
        }
    }

    fn on_first_quartile(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.quartile(Quartile::First, ctx);
    }

    fn on_midpoint(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.quartile(Quartile::Midpoint, ctx);
    }

    fn on_third_quartile(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.quartile(Quartile::Third, ctx);
    }

    fn on_ad_complete(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.emit(CanonicalEvent::end(), ctx);
        self.current_ad = None;
        ctx.signal(AdSignal::Ended);
    }

    fn on_ad_skipped(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.emit(CanonicalEvent::skipped(), ctx);
        self.current_ad = None;
        ctx.signal(AdSignal::Ended);
    }

    fn on_ad_paused(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.emit(CanonicalEvent::Pause, ctx);
    }

    fn on_ad_resumed(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        self.emit(CanonicalEvent::Resume, ctx);
    }

    fn on_ad_clicked(&mut self, _event: &StreamEvent, ctx: &mut AdContext<'_>) {
        let url = self
            .current_ad
            .as_ref()
            .and_then(|ad| ad.click_through_url.clone());
        self.emit(CanonicalEvent::AdClick { url }, ctx);
    }

    fn on_cue_points_changed(&mut self, event: &StreamEvent, _ctx: &mut AdContext<'_>) {
        self.cue_points = event.cue_points.clone().unwrap_or_default();
        debug!(count = self.cue_points.len(), "Cue points changed");
    }

    fn on_timed_metadata(&mut self, event: &StreamEvent, _ctx: &mut AdContext<'_>) {
        debug!(metadata = ?event.metadata, "Timed metadata");
    }
}

impl AdTracker for StreamTracker {
    fn kind(&self) -> ProviderKind {
        ProviderKind::StreamManifest
    }

    fn on_activated(&mut self, _ctx: &mut AdContext<'_>) {
        self.handlers = HANDLERS.iter().copied().collect();
        self.registrations = HANDLERS
            .iter()
            .map(|(kind, _)| (*kind, self.manager.add_event_listener(*kind)))
            .collect();

        info!(
            tracker = self.tracker_name(),
            listeners = self.registrations.len(),
            "Ad tracker activated"
        );
    }

    fn on_deactivated(&mut self, _ctx: &mut AdContext<'_>) {
        for (kind, id) in self.registrations.drain(..) {
            self.manager.remove_event_listener(kind, id);
        }
        self.handlers.clear();
        self.stream = None;
        self.current_ad = None;
        self.current_break = None;
        self.cue_points.clear();
        debug!(tracker = self.tracker_name(), "Ad tracker deactivated");
    }

    fn handle_provider_event(&mut self, event: &ProviderEvent, ctx: &mut AdContext<'_>) {
        let ProviderEvent::Stream(event) = event else {
            return;
        };
        if let Some(handler) = self.handlers.get(&event.kind).copied() {
            handler(self, event, ctx);
        }
    }

    fn cue_points(&self) -> Option<CuePoints> {
        if self.cue_points.is_empty() {
            return None;
        }
        Some(CuePoints::new(
            self.cue_points.iter().map(|cue| cue.start).collect(),
        ))
    }

    fn current_position(&self, _player: &dyn HostPlayer) -> Option<AdPosition> {
        self.current_ad
            .as_ref()
            .and_then(|ad| ad.position)
            .or_else(|| self.current_break.as_ref().and_then(|b| b.position))
    }

    fn ad_attributes(&self, player: &dyn HostPlayer) -> AdAttributes {
        let mut attributes = self
            .current_ad
            .as_ref()
            .map(Ad::attributes)
            .unwrap_or_default();

        attributes.partner = Some("google-dai".to_string());
        attributes.src = self.stream.as_ref().and_then(|s| s.url.clone());
        attributes.playhead_ms = Some(
            introspect("stream time", || self.manager.stream_time())
                .unwrap_or_else(|| player.current_time())
                * 1000.0,
        );
        if attributes.position.is_none() {
            attributes.position = self.current_break.as_ref().and_then(|b| b.position);
        }
        attributes.break_id = self.current_break.as_ref().and_then(|b| b.id.clone());
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::events::{Attributes, Emitter, MemorySink};
    use crate::replay::{ScriptedPlayer, ScriptedStreamManager};

    struct Harness {
        player: ScriptedPlayer,
        manager: Arc<ScriptedStreamManager>,
        sink: MemorySink,
        emitter: Emitter,
        config: TrackerConfig,
        tracker: StreamTracker,
    }

    impl Harness {
        fn new() -> Self {
            let player = ScriptedPlayer::new("https://dai.example.com/stream.m3u8");
            player.set_duration(Some(600.0));
            let manager = Arc::new(ScriptedStreamManager::new());
            let sink = MemorySink::new();
            let emitter = Emitter::new(Arc::new(sink.clone()));
            let tracker = StreamTracker::new(manager.clone());
            let mut h = Self {
                player,
                manager,
                sink,
                emitter,
                config: TrackerConfig::default(),
                tracker,
            };
            {
                let mut ctx = AdContext::new(&h.player, &h.config, &mut h.emitter, true);
                h.tracker.on_activated(&mut ctx);
            }
            h
        }

        fn send(&mut self, event: StreamEvent) -> Vec<AdSignal> {
            let event = ProviderEvent::Stream(event);
            let mut ctx = AdContext::new(&self.player, &self.config, &mut self.emitter, true);
            self.tracker.handle_provider_event(&event, &mut ctx);
            ctx.into_signals()
        }
    }

    #[test]
    fn test_handler_table_registration_is_symmetric() {
        let mut h = Harness::new();
        assert_eq!(h.manager.listener_count(), HANDLERS.len());

        let mut ctx = AdContext::new(&h.player, &h.config, &mut h.emitter, true);
        h.tracker.on_deactivated(&mut ctx);
        assert_eq!(h.manager.listener_count(), 0);
        assert!(h.manager.unmatched_removals().is_empty());
    }

    #[test]
    fn test_pre_roll_heuristic() {
        let mut h = Harness::new();
        h.player.set_current_time(1.0);

        h.send(StreamEvent::new(StreamEventKind::AdBreakStarted));
        let signals = h.send(StreamEvent::new(StreamEventKind::Started).with_ad(StreamAd {
            ad_id: Some("dai-1".to_string()),
            duration: Some(15.0),
            ..StreamAd::default()
        }));

        assert_eq!(
            signals,
            vec![AdSignal::Started {
                position: Some(AdPosition::Pre)
            }]
        );
        assert_eq!(h.sink.actions(), vec!["AD_BREAK_START", "AD_START"]);
    }

    #[test]
    fn test_explicit_position_wins() {
        let mut h = Harness::new();
        h.player.set_current_time(1.0);

        h.send(
            StreamEvent::new(StreamEventKind::AdBreakStarted).with_ad_break(StreamAdBreak {
                id: Some("break-9".to_string()),
                position: Some(AdPosition::Mid),
                ..StreamAdBreak::default()
            }),
        );
        h.send(StreamEvent::new(StreamEventKind::Started));

        let record = h.sink.records().pop().unwrap();
        match record.attributes {
            Attributes::Ad(ad) => {
                assert_eq!(ad.position, Some(AdPosition::Mid));
                assert_eq!(ad.break_id.as_deref(), Some("break-9"));
                assert_eq!(ad.partner.as_deref(), Some("google-dai"));
            }
            other => panic!("unexpected attributes: {other:?}"),
        }
    }

    #[test]
    fn test_period_only_opens_one_break() {
        let mut h = Harness::new();
        h.send(StreamEvent::new(StreamEventKind::AdPeriodStarted));
        h.send(StreamEvent::new(StreamEventKind::AdPeriodStarted));
        h.send(StreamEvent::new(StreamEventKind::AdPeriodEnded));
        h.send(StreamEvent::new(StreamEventKind::AdBreakEnded));
        assert_eq!(h.sink.actions(), vec!["AD_BREAK_START", "AD_BREAK_END"]);
    }

    #[test]
    fn test_error_fallback_message() {
        let mut h = Harness::new();
        h.send(StreamEvent::new(StreamEventKind::Error));
        assert_eq!(
            h.sink.records()[0].event,
            CanonicalEvent::error(None, Some(UNKNOWN_STREAM_ERROR.to_string()))
        );
    }

    #[test]
    fn test_playhead_falls_back_to_player() {
        let mut h = Harness::new();
        h.player.set_current_time(42.0);
        h.send(StreamEvent::new(StreamEventKind::Paused));
        match &h.sink.records()[0].attributes {
            Attributes::Ad(ad) => assert_eq!(ad.playhead_ms, Some(42000.0)),
            other => panic!("unexpected attributes: {other:?}"),
        }

        h.manager.set_stream_time(Some(50.0));
        h.send(StreamEvent::new(StreamEventKind::Resumed));
        match &h.sink.records()[1].attributes {
            Attributes::Ad(ad) => assert_eq!(ad.playhead_ms, Some(50000.0)),
            other => panic!("unexpected attributes: {other:?}"),
        }
    }

    #[test]
    fn test_live_inferred_from_duration() {
        let h = Harness::new();
        h.player.set_duration(Some(f64::INFINITY));
        assert_eq!(h.tracker.stream_type(&h.player), StreamType::Live);
    }

    #[test]
    fn test_cue_points_changed() {
        let mut h = Harness::new();
        let mut event = StreamEvent::new(StreamEventKind::CuepointsChanged);
        event.cue_points = Some(vec![
            StreamCuePoint {
                start: 0.0,
                end: 30.0,
                played: true,
            },
            StreamCuePoint {
                start: 300.0,
                end: 330.0,
                played: false,
            },
        ]);
        h.send(event);
        assert_eq!(h.tracker.cue_points(), Some(CuePoints::new(vec![0.0, 300.0])));
        assert!(h.sink.is_empty());
    }

    #[test]
    fn test_post_roll_break_end_completes_ads() {
        let mut h = Harness::new();
        h.player.set_current_time(300.0);
        h.send(StreamEvent::new(StreamEventKind::AdBreakStarted));
        assert!(h.send(StreamEvent::new(StreamEventKind::AdBreakEnded)).is_empty());

        h.player.set_current_time(595.0);
        h.send(StreamEvent::new(StreamEventKind::AdBreakStarted));
        assert_eq!(
            h.send(StreamEvent::new(StreamEventKind::AdBreakEnded)),
            vec![AdSignal::AllCompleted]
        );
        assert!(h.tracker.current_break().is_none());
    }
}
