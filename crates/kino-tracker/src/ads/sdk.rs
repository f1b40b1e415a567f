//! SDK-callback ad tracker
//!
//! The SDK's ads manager calls back once per ad event type. Ad metadata is
//! read from the SDK's current-ad object once, when the ad starts, and that
//! snapshot serves every later event for the same ad.

use super::progress::{Ad, AdBreak};
use super::{AdContext, AdSignal, AdTracker, ProviderEvent, ProviderKind};
use crate::events::{AdAttributes, CanonicalEvent};
use crate::player::{introspect, HostPlayer, ListenerId, ProviderResult};
use crate::types::{AdPosition, CuePoints, MediaError, Quartile};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ad event types the SDK dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdkEventKind {
    Loaded,
    Started,
    Paused,
    Resumed,
    Complete,
    Skipped,
    Click,
    FirstQuartile,
    Midpoint,
    ThirdQuartile,
    ContentPauseRequested,
    ContentResumeRequested,
    AllAdsCompleted,
    AdError,
}

impl SdkEventKind {
    pub const ALL: [SdkEventKind; 14] = [
        SdkEventKind::Loaded,
        SdkEventKind::Started,
        SdkEventKind::Paused,
        SdkEventKind::Resumed,
        SdkEventKind::Complete,
        SdkEventKind::Skipped,
        SdkEventKind::Click,
        SdkEventKind::FirstQuartile,
        SdkEventKind::Midpoint,
        SdkEventKind::ThirdQuartile,
        SdkEventKind::ContentPauseRequested,
        SdkEventKind::ContentResumeRequested,
        SdkEventKind::AllAdsCompleted,
        SdkEventKind::AdError,
    ];
}

/// One SDK callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkEvent {
    pub kind: SdkEventKind,
    /// Set on `AdError`
    #[serde(default)]
    pub error: Option<MediaError>,
}

impl SdkEvent {
    pub fn new(kind: SdkEventKind) -> Self {
        Self { kind, error: None }
    }

    pub fn ad_error(error: MediaError) -> Self {
        Self {
            kind: SdkEventKind::AdError,
            error: Some(error),
        }
    }
}

/// The SDK's current-ad object. Every accessor may fail.
pub trait SdkAd: Send + Sync {
    fn ad_id(&self) -> ProviderResult<String>;
    fn creative_id(&self) -> ProviderResult<String>;
    /// Seconds
    fn duration(&self) -> ProviderResult<f64>;
    fn media_url(&self) -> ProviderResult<String>;
    fn title(&self) -> ProviderResult<String>;
    /// 0 for the pre-roll pod, -1 for the post-roll pod
    fn pod_index(&self) -> ProviderResult<i32>;
    /// Bits per second
    fn bitrate(&self) -> ProviderResult<u64>;
    fn click_through_url(&self) -> ProviderResult<String>;
}

/// The SDK's ads manager
pub trait AdsManager: Send + Sync {
    fn add_event_listener(&self, kind: SdkEventKind) -> ListenerId;

    fn remove_event_listener(&self, kind: SdkEventKind, id: ListenerId);

    /// Planned break offsets in seconds, `-1` for a post-roll
    fn cue_points(&self) -> ProviderResult<Vec<f64>>;

    fn current_ad(&self) -> ProviderResult<Option<Arc<dyn SdkAd>>>;

    /// Seconds left in the current ad
    fn remaining_time(&self) -> ProviderResult<f64>;

    fn sdk_version(&self) -> ProviderResult<String> {
        Ok("unknown".to_string())
    }
}

/// Read every field of the SDK's current ad once
fn snapshot(ad: &dyn SdkAd) -> Ad {
    Ad {
        id: introspect("ad id", || ad.ad_id()),
        creative_id: introspect("creative id", || ad.creative_id()),
        duration_ms: introspect("ad duration", || ad.duration()).map(|d| d * 1000.0),
        media_url: introspect("media url", || ad.media_url()),
        title: introspect("ad title", || ad.title()),
        click_through_url: introspect("click-through url", || ad.click_through_url()),
        partner: Some("ima".to_string()),
        bitrate: introspect("ad bitrate", || ad.bitrate()),
        position: introspect("pod index", || ad.pod_index()).map(AdPosition::from_pod_index),
        ..Ad::default()
    }
}

/// Ad tracker for an SDK ads manager
pub struct SdkTracker {
    manager: Option<Arc<dyn AdsManager>>,
    registrations: Vec<(SdkEventKind, ListenerId)>,
    current_ad: Option<Ad>,
    open_break: Option<AdBreak>,
}

impl SdkTracker {
    pub fn new() -> Self {
        Self {
            manager: None,
            registrations: Vec::new(),
            current_ad: None,
            open_break: None,
        }
    }

    fn is_registered(&self, kind: SdkEventKind) -> bool {
        self.registrations.iter().any(|(k, _)| *k == kind)
    }

    fn emit(&self, event: CanonicalEvent, ctx: &mut AdContext<'_>) {
        let attributes = self.ad_attributes(ctx.player);
        ctx.emit(self.tracker_name(), event, attributes);
    }

    fn on_sdk_event(&mut self, event: &SdkEvent, ctx: &mut AdContext<'_>) {
        match event.kind {
            SdkEventKind::Loaded => self.emit(CanonicalEvent::Request, ctx),
            SdkEventKind::Started => {
                let ad = self
                    .manager
                    .as_ref()
                    .and_then(|manager| introspect("current ad", || manager.current_ad()))
                    .flatten()
                    .map(|ad| snapshot(ad.as_ref()))
                    .unwrap_or_else(|| Ad {
                        partner: Some("ima".to_string()),
                        ..Ad::default()
                    });
                let position = ad.position;
                self.current_ad = Some(ad);
                ctx.signal(AdSignal::Started { position });
                self.emit(CanonicalEvent::Start, ctx);
            }
            SdkEventKind::Paused => self.emit(CanonicalEvent::Pause, ctx),
            SdkEventKind::Resumed => self.emit(CanonicalEvent::Resume, ctx),
            SdkEventKind::Complete | SdkEventKind::Skipped => {
                let event = if event.kind == SdkEventKind::Skipped {
                    CanonicalEvent::skipped()
                } else {
                    CanonicalEvent::end()
                };
                self.emit(event, ctx);
                self.current_ad = None;
                ctx.signal(AdSignal::Ended);
            }
            SdkEventKind::Click => {
                let url = self
                    .current_ad
                    .as_ref()
                    .and_then(|ad| ad.click_through_url.clone());
                self.emit(CanonicalEvent::AdClick { url }, ctx);
            }
            SdkEventKind::FirstQuartile => self.quartile(Quartile::First, ctx),
            SdkEventKind::Midpoint => self.quartile(Quartile::Midpoint, ctx),
            SdkEventKind::ThirdQuartile => self.quartile(Quartile::Third, ctx),
            SdkEventKind::ContentPauseRequested => {
                if self.open_break.is_some() {
                    return;
                }
                self.open_break = Some(AdBreak {
                    position: self.current_ad.as_ref().and_then(|ad| ad.position),
                    ..AdBreak::default()
                });
                self.emit(CanonicalEvent::AdBreakStart, ctx);
            }
            SdkEventKind::ContentResumeRequested => self.close_break(ctx),
            SdkEventKind::AllAdsCompleted => {
                self.close_break(ctx);
                ctx.signal(AdSignal::AllCompleted);
            }
            SdkEventKind::AdError => {
                let error = event.error.clone().unwrap_or_default();
                self.emit(CanonicalEvent::error(error.code, error.message), ctx);
            }
        }
    }

    fn close_break(&mut self, ctx: &mut AdContext<'_>) {
        if self.open_break.take().is_some() {
            self.emit(CanonicalEvent::AdBreakEnd, ctx);
        }
    }

    fn quartile(&mut self, quartile: Quartile, ctx: &mut AdContext<'_>) {
        let ad = self.current_ad.get_or_insert_with(Ad::default);
        if ad.quartiles.fire(quartile) {
            self.emit(CanonicalEvent::quartile(quartile), ctx);
        } else {
            debug!(%quartile, "Quartile already fired for this ad");
        }
    }
}

impl Default for SdkTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AdTracker for SdkTracker {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SdkCallback
    }

    fn is_active(&self) -> bool {
        self.manager.is_some()
    }

    fn on_activated(&mut self, ctx: &mut AdContext<'_>) {
        if self.manager.is_none() {
            self.manager = ctx.player.ads_manager();
        }
        let Some(manager) = self.manager.clone() else {
            let gap = Error::MissingCapability("ads manager".to_string());
            warn!(error = %gap, code = gap.error_code(), "SDK ad tracker attached before the SDK created one");
            return;
        };

        self.registrations = SdkEventKind::ALL
            .iter()
            .map(|kind| (*kind, manager.add_event_listener(*kind)))
            .collect();

        let sdk_version = introspect("sdk version", || manager.sdk_version())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            tracker = self.tracker_name(),
            listeners = self.registrations.len(),
            sdk_version = %sdk_version,
            "Ad tracker activated"
        );
    }

    fn on_deactivated(&mut self, _ctx: &mut AdContext<'_>) {
        if let Some(manager) = &self.manager {
            for (kind, id) in self.registrations.drain(..) {
                manager.remove_event_listener(kind, id);
            }
        }
        self.current_ad = None;
        self.open_break = None;
        debug!(tracker = self.tracker_name(), "Ad tracker deactivated");
    }

    fn handle_provider_event(&mut self, event: &ProviderEvent, ctx: &mut AdContext<'_>) {
        match event {
            ProviderEvent::Sdk(event) if self.is_registered(event.kind) => {
                self.on_sdk_event(event, ctx)
            }
            _ => {}
        }
    }

    fn cue_points(&self) -> Option<CuePoints> {
        let manager = self.manager.as_ref()?;
        introspect("cue points", || manager.cue_points()).map(CuePoints::new)
    }

    fn current_position(&self, _player: &dyn HostPlayer) -> Option<AdPosition> {
        self.current_ad.as_ref().and_then(|ad| ad.position)
    }

    fn ad_attributes(&self, _player: &dyn HostPlayer) -> AdAttributes {
        let Some(ad) = &self.current_ad else {
            return AdAttributes {
                partner: Some("ima".to_string()),
                ..AdAttributes::default()
            };
        };

        let mut attributes = ad.attributes();
        attributes.playhead_ms = match (&self.manager, ad.duration_ms) {
            (Some(manager), Some(duration_ms)) => {
                introspect("remaining time", || manager.remaining_time())
                    .map(|remaining| (duration_ms - remaining * 1000.0).max(0.0))
            }
            _ => None,
        };
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::events::{Attributes, Emitter, MemorySink};
    use crate::replay::{ScriptedAd, ScriptedAdsManager, ScriptedPlayer};

    struct Harness {
        player: ScriptedPlayer,
        manager: Arc<ScriptedAdsManager>,
        sink: MemorySink,
        emitter: Emitter,
        config: TrackerConfig,
    }

    impl Harness {
        fn new() -> Self {
            let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
            let manager = Arc::new(ScriptedAdsManager::new(vec![0.0, -1.0]));
            player.set_ads_manager(manager.clone());
            let sink = MemorySink::new();
            let emitter = Emitter::new(Arc::new(sink.clone()));
            Self {
                player,
                manager,
                sink,
                emitter,
                config: TrackerConfig::default(),
            }
        }

        fn run(
            &mut self,
            tracker: &mut SdkTracker,
            f: impl FnOnce(&mut SdkTracker, &mut AdContext<'_>),
        ) -> Vec<AdSignal> {
            let mut ctx = AdContext::new(&self.player, &self.config, &mut self.emitter, true);
            f(tracker, &mut ctx);
            ctx.into_signals()
        }

        fn send(&mut self, tracker: &mut SdkTracker, kind: SdkEventKind) -> Vec<AdSignal> {
            let event = ProviderEvent::Sdk(SdkEvent::new(kind));
            self.run(tracker, |t, ctx| t.handle_provider_event(&event, ctx))
        }
    }

    #[test]
    fn test_registers_every_event_type() {
        let mut h = Harness::new();
        let mut tracker = SdkTracker::new();
        h.run(&mut tracker, |t, ctx| t.on_activated(ctx));
        assert!(tracker.is_active());
        assert_eq!(h.manager.listener_count(), SdkEventKind::ALL.len());

        h.run(&mut tracker, |t, ctx| t.on_deactivated(ctx));
        assert_eq!(h.manager.listener_count(), 0);
        assert!(h.manager.unmatched_removals().is_empty());
    }

    #[test]
    fn test_started_snapshots_ad() {
        let mut h = Harness::new();
        h.manager.set_current_ad(Some(ScriptedAd {
            id: "ad-1".to_string(),
            duration: 30.0,
            pod_index: -1,
            click_through_url: Some("https://advertiser.example.com".to_string()),
            ..ScriptedAd::default()
        }));
        let mut tracker = SdkTracker::new();
        h.run(&mut tracker, |t, ctx| t.on_activated(ctx));

        let signals = h.send(&mut tracker, SdkEventKind::Started);
        assert_eq!(
            signals,
            vec![AdSignal::Started {
                position: Some(AdPosition::Post)
            }]
        );

        // SDK moves on; the snapshot still describes the ad
        h.manager.set_current_ad(None);
        h.manager.set_remaining_time(20.0);
        h.send(&mut tracker, SdkEventKind::Click);

        let records = h.sink.records();
        let click = records.last().unwrap();
        assert_eq!(
            click.event,
            CanonicalEvent::AdClick {
                url: Some("https://advertiser.example.com".to_string())
            }
        );
        match &click.attributes {
            Attributes::Ad(ad) => {
                assert_eq!(ad.ad_id.as_deref(), Some("ad-1"));
                assert_eq!(ad.playhead_ms, Some(10000.0));
                assert_eq!(ad.position, Some(AdPosition::Post));
            }
            other => panic!("unexpected attributes: {other:?}"),
        }
    }

    #[test]
    fn test_break_bracketing_and_quartiles() {
        let mut h = Harness::new();
        let mut tracker = SdkTracker::new();
        h.run(&mut tracker, |t, ctx| t.on_activated(ctx));

        for kind in [
            SdkEventKind::Loaded,
            SdkEventKind::ContentPauseRequested,
            SdkEventKind::Started,
            SdkEventKind::FirstQuartile,
            SdkEventKind::FirstQuartile,
            SdkEventKind::Midpoint,
            SdkEventKind::ThirdQuartile,
            SdkEventKind::Complete,
            SdkEventKind::ContentResumeRequested,
            SdkEventKind::AllAdsCompleted,
        ] {
            h.send(&mut tracker, kind);
        }

        assert_eq!(
            h.sink.actions(),
            vec![
                "AD_REQUEST",
                "AD_BREAK_START",
                "AD_START",
                "AD_QUARTILE",
                "AD_QUARTILE",
                "AD_QUARTILE",
                "AD_END",
                "AD_BREAK_END",
            ]
        );
    }

    #[test]
    fn test_ad_error_carries_detail() {
        let mut h = Harness::new();
        let mut tracker = SdkTracker::new();
        h.run(&mut tracker, |t, ctx| t.on_activated(ctx));

        let event = ProviderEvent::Sdk(SdkEvent::ad_error(MediaError::new("1009", "VAST empty")));
        h.run(&mut tracker, |t, ctx| t.handle_provider_event(&event, ctx));

        assert_eq!(
            h.sink.records()[0].event,
            CanonicalEvent::error(Some("1009".to_string()), Some("VAST empty".to_string()))
        );
    }

    #[test]
    fn test_cue_points_from_manager() {
        let mut h = Harness::new();
        let mut tracker = SdkTracker::new();
        h.run(&mut tracker, |t, ctx| t.on_activated(ctx));
        assert!(tracker.cue_points().unwrap().has_post_roll());
    }

    #[test]
    fn test_inactive_without_manager() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        let sink = MemorySink::new();
        let mut emitter = Emitter::new(Arc::new(sink.clone()));
        let config = TrackerConfig::default();
        let mut tracker = SdkTracker::new();

        let mut ctx = AdContext::new(&player, &config, &mut emitter, true);
        tracker.on_activated(&mut ctx);
        assert!(!tracker.is_active());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_all_ads_completed_signals_content() {
        let mut h = Harness::new();
        let mut tracker = SdkTracker::new();
        h.run(&mut tracker, |t, ctx| t.on_activated(ctx));

        let event = ProviderEvent::Sdk(SdkEvent::ad_error(MediaError::new("1009", "VAST empty")));
        let signals = h.run(&mut tracker, |t, ctx| t.handle_provider_event(&event, ctx));
        assert!(signals.is_empty());

        let signals = h.send(&mut tracker, SdkEventKind::AllAdsCompleted);
        assert_eq!(signals, vec![AdSignal::AllCompleted]);
        assert_eq!(h.sink.actions(), vec!["AD_ERROR"]);
    }
}
