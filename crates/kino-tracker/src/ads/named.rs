//! Named-event ad trackers
//!
//! Plugins that announce ad activity as named player events need no state
//! beyond the current ad: each event maps one-to-one onto a fixed list of
//! canonical calls. The flavors differ in which events they listen to and
//! where they read ad metadata from.

use super::progress::Ad;
use super::{AdContext, AdSignal, AdTracker, ProviderKind};
use crate::events::{AdAttributes, CanonicalEvent};
use crate::player::{introspect, HostPlayer, PlayerEventKind, Subscriptions};
use crate::types::{AdPosition, Quartile};
use crate::Error;
use tracing::{debug, info, warn};

/// One canonical call in a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Request,
    Download(&'static str),
    Start,
    End,
    Skip,
    Error,
    Click,
    BreakStart,
    BreakEnd,
    Quartile(Quartile),
    Pause,
    Resume,
}

type Mapping = (PlayerEventKind, &'static [Step]);

const GENERIC_EVENTS: &[Mapping] = &[
    (
        PlayerEventKind::AdsRequest,
        &[Step::Request, Step::Download("ads-request")],
    ),
    (PlayerEventKind::AdsLoad, &[Step::Download("ads-load")]),
    (PlayerEventKind::AdStart, &[Step::Request, Step::Start]),
    (PlayerEventKind::AdEnd, &[Step::End]),
    (PlayerEventKind::AdSkip, &[Step::Skip]),
    (PlayerEventKind::AdsError, &[Step::Error]),
    (PlayerEventKind::AdsClick, &[Step::Click]),
    (PlayerEventKind::AdsPodStarted, &[Step::BreakStart]),
    (PlayerEventKind::AdsPodEnded, &[Step::BreakEnd]),
    (
        PlayerEventKind::AdsFirstQuartile,
        &[Step::Quartile(Quartile::First)],
    ),
    (
        PlayerEventKind::AdsMidpoint,
        &[Step::Quartile(Quartile::Midpoint)],
    ),
    (
        PlayerEventKind::AdsThirdQuartile,
        &[Step::Quartile(Quartile::Third)],
    ),
    (PlayerEventKind::AdsPause, &[Step::Pause]),
    (PlayerEventKind::AdsPlay, &[Step::Resume]),
];

const IMA3_EVENTS: &[Mapping] = &[
    (PlayerEventKind::Ima3Started, &[Step::Request, Step::Start]),
    (PlayerEventKind::Ima3Paused, &[Step::Pause]),
    (PlayerEventKind::Ima3Resumed, &[Step::Resume]),
    (PlayerEventKind::Ima3Complete, &[Step::End]),
    (PlayerEventKind::Ima3Skipped, &[Step::Skip]),
    (PlayerEventKind::AdsError, &[Step::Error]),
    (PlayerEventKind::AdsClick, &[Step::Click]),
];

/// Which plugin family the tracker speaks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedFlavor {
    /// Generic ads plugin
    Generic,
    /// IMA3 plugin
    Brightcove,
    /// FreeWheel plugin over the generic events
    FreeWheel,
}

impl NamedFlavor {
    fn mappings(&self) -> &'static [Mapping] {
        match self {
            NamedFlavor::Generic | NamedFlavor::FreeWheel => GENERIC_EVENTS,
            NamedFlavor::Brightcove => IMA3_EVENTS,
        }
    }

    fn kind(&self) -> ProviderKind {
        match self {
            NamedFlavor::Generic => ProviderKind::Generic,
            NamedFlavor::Brightcove => ProviderKind::Brightcove,
            NamedFlavor::FreeWheel => ProviderKind::FreeWheel,
        }
    }
}

/// Ad tracker driven by named player events
pub struct NamedEventTracker {
    flavor: NamedFlavor,
    subscriptions: Subscriptions,
    current_ad: Option<Ad>,
}

impl NamedEventTracker {
    pub fn new(flavor: NamedFlavor) -> Self {
        Self {
            flavor,
            subscriptions: Subscriptions::default(),
            current_ad: None,
        }
    }

    fn steps_for(&self, kind: PlayerEventKind) -> Option<&'static [Step]> {
        self.flavor
            .mappings()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, steps)| *steps)
    }

    fn apply(&mut self, step: Step, ctx: &mut AdContext<'_>) {
        let event = match step {
            Step::Request => CanonicalEvent::Request,
            Step::Download(state) => CanonicalEvent::download(state),
            Step::Start => {
                let position = self.current_position(ctx.player);
                self.current_ad = Some(Ad {
                    position,
                    ..Ad::default()
                });
                ctx.signal(AdSignal::Started { position });
                CanonicalEvent::Start
            }
            Step::End | Step::Skip => {
                self.current_ad = None;
                ctx.signal(AdSignal::Ended);
                if step == Step::Skip {
                    CanonicalEvent::skipped()
                } else {
                    CanonicalEvent::end()
                }
            }
            Step::Error => {
                let error = ctx.player.error().unwrap_or_default();
                CanonicalEvent::error(error.code, error.message)
            }
            Step::Click => CanonicalEvent::AdClick { url: None },
            Step::BreakStart => CanonicalEvent::AdBreakStart,
            Step::BreakEnd => CanonicalEvent::AdBreakEnd,
            Step::Quartile(quartile) => {
                let ad = self.current_ad.get_or_insert_with(Ad::default);
                if !ad.quartiles.fire(quartile) {
                    debug!(%quartile, "Quartile already fired for this ad");
                    return;
                }
                CanonicalEvent::quartile(quartile)
            }
            Step::Pause => CanonicalEvent::Pause,
            Step::Resume => CanonicalEvent::Resume,
        };

        let attributes = self.ad_attributes(ctx.player);
        ctx.emit(self.tracker_name(), event, attributes);
    }
}

impl AdTracker for NamedEventTracker {
    fn kind(&self) -> ProviderKind {
        self.flavor.kind()
    }

    fn on_activated(&mut self, ctx: &mut AdContext<'_>) {
        if self.flavor == NamedFlavor::Generic && !ctx.player.capabilities().ads_plugin {
            let gap = Error::MissingCapability("ads plugin".to_string());
            warn!(error = %gap, code = gap.error_code(), "Generic ad tracker attached anyway");
        }

        let kinds: Vec<PlayerEventKind> =
            self.flavor.mappings().iter().map(|(kind, _)| *kind).collect();
        self.subscriptions = Subscriptions::subscribe(ctx.player, &kinds);

        let plugin_version = introspect("ads plugin version", || ctx.player.ads_plugin_version())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            tracker = self.tracker_name(),
            listeners = self.subscriptions.len(),
            plugin_version = %plugin_version,
            "Ad tracker activated"
        );
    }

    fn on_deactivated(&mut self, ctx: &mut AdContext<'_>) {
        self.subscriptions.release(ctx.player);
        self.current_ad = None;
        debug!(tracker = self.tracker_name(), "Ad tracker deactivated");
    }

    fn handle_player_event(&mut self, kind: PlayerEventKind, ctx: &mut AdContext<'_>) {
        if !self.subscriptions.contains(kind) {
            return;
        }
        if let Some(steps) = self.steps_for(kind) {
            for step in steps {
                self.apply(*step, ctx);
            }
        }
    }

    fn current_position(&self, player: &dyn HostPlayer) -> Option<AdPosition> {
        match self.flavor {
            NamedFlavor::FreeWheel => introspect("freewheel ad", || player.freewheel_ad())
                .and_then(|ad| ad.slot_type)
                .and_then(|slot| AdPosition::from_slot_type(&slot)),
            _ => self.current_ad.as_ref().and_then(|ad| ad.position),
        }
    }

    fn ad_attributes(&self, player: &dyn HostPlayer) -> AdAttributes {
        let mut attributes = self
            .current_ad
            .as_ref()
            .map(Ad::attributes)
            .unwrap_or_default();

        match self.flavor {
            NamedFlavor::Generic => {}
            NamedFlavor::Brightcove => {
                attributes.partner = Some("ima".to_string());
                attributes.playhead_ms =
                    introspect("ima3 ad time", || player.ima3_ad_time()).map(|t| t * 1000.0);
            }
            NamedFlavor::FreeWheel => {
                attributes.partner = Some("freewheel".to_string());
                if let Some(ad) = introspect("freewheel ad", || player.freewheel_ad()) {
                    attributes.playhead_ms = ad.current_time.map(|t| t * 1000.0);
                    attributes.duration_ms = ad.duration.map(|d| d * 1000.0);
                    attributes.src = ad.src;
                    attributes.title = ad.title;
                    attributes.position = ad
                        .slot_type
                        .as_deref()
                        .and_then(AdPosition::from_slot_type);
                }
            }
        }

        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::events::{Emitter, MemorySink};
    use crate::player::{FreewheelAd, PlayerCapabilities};
    use crate::replay::ScriptedPlayer;
    use std::sync::Arc;

    fn drive(
        player: &ScriptedPlayer,
        tracker: &mut NamedEventTracker,
        kinds: &[PlayerEventKind],
    ) -> (MemorySink, Vec<AdSignal>) {
        let sink = MemorySink::new();
        let mut emitter = Emitter::new(Arc::new(sink.clone()));
        let config = TrackerConfig::default();
        let mut signals = Vec::new();

        let mut ctx = AdContext::new(player, &config, &mut emitter, true);
        tracker.on_activated(&mut ctx);
        signals.extend(ctx.into_signals());

        for kind in kinds {
            let mut ctx = AdContext::new(player, &config, &mut emitter, true);
            tracker.handle_player_event(*kind, &mut ctx);
            signals.extend(ctx.into_signals());
        }
        (sink, signals)
    }

    #[test]
    fn test_generic_mapping() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        player.set_capabilities(PlayerCapabilities {
            ads_plugin: true,
            ..Default::default()
        });
        let mut tracker = NamedEventTracker::new(NamedFlavor::Generic);

        let (sink, signals) = drive(
            &player,
            &mut tracker,
            &[
                PlayerEventKind::AdsRequest,
                PlayerEventKind::AdsPodStarted,
                PlayerEventKind::AdStart,
                PlayerEventKind::AdsFirstQuartile,
                PlayerEventKind::AdsMidpoint,
                PlayerEventKind::AdsThirdQuartile,
                PlayerEventKind::AdEnd,
                PlayerEventKind::AdsPodEnded,
            ],
        );

        assert_eq!(
            sink.actions(),
            vec![
                "AD_REQUEST",
                "AD_DOWNLOAD",
                "AD_BREAK_START",
                "AD_REQUEST",
                "AD_START",
                "AD_QUARTILE",
                "AD_QUARTILE",
                "AD_QUARTILE",
                "AD_END",
                "AD_BREAK_END",
            ]
        );
        assert_eq!(
            signals,
            vec![AdSignal::Started { position: None }, AdSignal::Ended]
        );
        assert!(sink.records().iter().all(|r| r.tracker == "videojs-ads"));
    }

    #[test]
    fn test_repeated_quartile_is_dropped() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        let mut tracker = NamedEventTracker::new(NamedFlavor::Generic);

        let (sink, _) = drive(
            &player,
            &mut tracker,
            &[
                PlayerEventKind::AdStart,
                PlayerEventKind::AdsMidpoint,
                PlayerEventKind::AdsMidpoint,
                PlayerEventKind::AdsFirstQuartile,
            ],
        );

        let quartiles: Vec<u8> = sink
            .records()
            .into_iter()
            .filter_map(|r| match r.event {
                CanonicalEvent::AdQuartile { quartile } => Some(quartile),
                _ => None,
            })
            .collect();
        assert_eq!(quartiles, vec![2]);
    }

    #[test]
    fn test_ima3_ignores_generic_start() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        let mut tracker = NamedEventTracker::new(NamedFlavor::Brightcove);

        let (sink, _) = drive(
            &player,
            &mut tracker,
            &[
                PlayerEventKind::AdStart,
                PlayerEventKind::Ima3Started,
                PlayerEventKind::Ima3Skipped,
            ],
        );

        assert_eq!(sink.actions(), vec!["AD_REQUEST", "AD_START", "AD_END"]);
        let last = sink.records().pop().unwrap();
        assert_eq!(last.event, CanonicalEvent::skipped());
        assert_eq!(last.tracker, "brightcove-ima-ads");
    }

    #[test]
    fn test_freewheel_reads_slot_position() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        player.set_freewheel_ad(FreewheelAd {
            slot_type: Some("POSTROLL".to_string()),
            current_time: Some(1.5),
            duration: Some(30.0),
            src: Some("https://ads.example.com/spot.mp4".to_string()),
            title: Some("spot".to_string()),
        });
        let mut tracker = NamedEventTracker::new(NamedFlavor::FreeWheel);

        let (sink, signals) = drive(&player, &mut tracker, &[PlayerEventKind::AdStart]);

        assert_eq!(
            signals,
            vec![AdSignal::Started {
                position: Some(AdPosition::Post)
            }]
        );
        let record = sink.records().pop().unwrap();
        match record.attributes {
            crate::events::Attributes::Ad(ad) => {
                assert_eq!(ad.position, Some(AdPosition::Post));
                assert_eq!(ad.playhead_ms, Some(1500.0));
                assert_eq!(ad.duration_ms, Some(30000.0));
            }
            other => panic!("unexpected attributes: {other:?}"),
        }
    }

    #[test]
    fn test_deactivation_releases_listeners() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        let mut tracker = NamedEventTracker::new(NamedFlavor::Generic);
        let sink = MemorySink::new();
        let mut emitter = Emitter::new(Arc::new(sink));
        let config = TrackerConfig::default();

        let mut ctx = AdContext::new(&player, &config, &mut emitter, true);
        tracker.on_activated(&mut ctx);
        assert_eq!(player.listener_count(), GENERIC_EVENTS.len());

        tracker.on_deactivated(&mut ctx);
        assert_eq!(player.listener_count(), 0);
        assert!(player.unmatched_removals().is_empty());
    }

    #[test]
    fn test_start_position_matches_emitted_ad() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.mp4");
        player.set_freewheel_ad(FreewheelAd {
            slot_type: Some("MIDROLL".to_string()),
            ..FreewheelAd::default()
        });
        let mut tracker = NamedEventTracker::new(NamedFlavor::FreeWheel);
        let (sink, signals) = drive(
            &player,
            &mut tracker,
            &[PlayerEventKind::AdStart, PlayerEventKind::AdStart],
        );

        let emitted: Vec<Option<AdPosition>> = sink
            .records()
            .into_iter()
            .filter(|r| r.action == "AD_START")
            .map(|r| match r.attributes {
                crate::events::Attributes::Ad(ad) => ad.position,
                crate::events::Attributes::Content(_) => None,
            })
            .collect();
        let signalled: Vec<Option<AdPosition>> = signals
            .into_iter()
            .filter_map(|signal| match signal {
                AdSignal::Started { position } => Some(position),
                _ => None,
            })
            .collect();
        assert_eq!(signalled, vec![Some(AdPosition::Mid); 2]);
        assert_eq!(emitted, signalled);
    }
}
