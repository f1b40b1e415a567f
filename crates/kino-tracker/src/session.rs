//! Content tracker - main orchestrator for one host player
//!
//! Coordinates:
//! - Content lifecycle events from the host player
//! - Ad provider selection and the single attached ad tracker
//! - Content END deferral while a post-roll is still pending
//! - Background outcomes of the schedule provider

use crate::{
    ads::{
        AdContext, AdSignal, AdTracker, AttachmentSlot, HttpScheduleClient, ProviderEvent,
        ProviderKind, ProviderSelector, ScheduleClient, StreamManager, StreamTracker,
    },
    config::TrackerConfig,
    events::{Attributes, CanonicalEvent, ContentAttributes, Emitter, TelemetrySink},
    player::{introspect, HostPlayer, PlayerEventKind, Subscriptions},
    tech, Result,
    types::*,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Player events the content tracker listens to
const CONTENT_EVENTS: &[PlayerEventKind] = &[
    PlayerEventKind::LoadStart,
    PlayerEventKind::LoadedData,
    PlayerEventKind::LoadedMetadata,
    PlayerEventKind::Play,
    PlayerEventKind::Playing,
    PlayerEventKind::Pause,
    PlayerEventKind::Waiting,
    PlayerEventKind::Stalled,
    PlayerEventKind::Seeking,
    PlayerEventKind::Seeked,
    PlayerEventKind::TimeUpdate,
    PlayerEventKind::Ended,
    PlayerEventKind::Dispose,
    PlayerEventKind::Abort,
    PlayerEventKind::Error,
    PlayerEventKind::AdsReady,
    PlayerEventKind::AdStart,
    PlayerEventKind::AdEnd,
];

/// Whether content END has gone out for the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentEnd {
    #[default]
    Running,
    /// Content finished but a post-roll is still to come
    Deferred,
    Emitted,
}

/// Whether the session's post-roll has started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PostRoll {
    #[default]
    NotPlayed,
    Played,
}

/// Per-session state, mutated only by the content tracker's handlers
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: PlaybackState,
    pub playhead_ms: f64,
    pub duration_ms: Option<f64>,
    pub muted: bool,
    pub autoplay: bool,
    pub preload: Preload,
    pub fullscreen: bool,
    pub rendition: RenditionInfo,
    pub buffering: bool,
    pub ad_playing: bool,
    pub content_end: ContentEnd,
    /// Taken from the ad tracker at the first ad start
    pub cue_points: Option<CuePoints>,
    pub post_roll: PostRoll,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: PlaybackState::Idle,
            playhead_ms: 0.0,
            duration_ms: None,
            muted: false,
            autoplay: false,
            preload: Preload::default(),
            fullscreen: false,
            rendition: RenditionInfo::default(),
            buffering: false,
            ad_playing: false,
            content_end: ContentEnd::Running,
            cue_points: None,
            post_roll: PostRoll::NotPlayed,
        }
    }

    /// False once content END went out
    pub fn is_live(&self) -> bool {
        self.content_end != ContentEnd::Emitted
    }
}

/// Tracks content playback on one host player and owns its ad tracker
pub struct ContentTracker {
    player: Arc<dyn HostPlayer>,
    config: TrackerConfig,
    emitter: Emitter,
    schedule_client: Arc<dyn ScheduleClient>,
    subscriptions: Subscriptions,
    session: Session,
    slot: AttachmentSlot,
    /// The stitched-source probe runs on the first load only
    schedule_probed: bool,
    disposed: bool,
}

impl ContentTracker {
    /// Subscribe to `player` and start the first session
    pub fn new(
        player: Arc<dyn HostPlayer>,
        sink: Arc<dyn TelemetrySink>,
        config: TrackerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let schedule_client: Arc<dyn ScheduleClient> =
            Arc::new(HttpScheduleClient::new(config.schedule.request_timeout())?);
        let emitter = Emitter::new(sink);
        let subscriptions = Subscriptions::subscribe(player.as_ref(), CONTENT_EVENTS);

        info!(
            tracker = %config.tracker_name,
            version = crate::VERSION,
            session_id = %emitter.session_id(),
            listeners = subscriptions.len(),
            "Content tracker initialized"
        );

        Ok(Self {
            session: Session::new(emitter.session_id()),
            player,
            config,
            emitter,
            schedule_client,
            subscriptions,
            slot: AttachmentSlot::new(),
            schedule_probed: false,
            disposed: false,
        })
    }

    /// Use another client for the stitching service
    pub fn with_schedule_client(mut self, client: Arc<dyn ScheduleClient>) -> Self {
        self.schedule_client = client;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Provider of the attached ad tracker
    pub fn ad_tracker_kind(&self) -> Option<ProviderKind> {
        self.slot.kind()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Handle one named player event
    pub fn handle_event(&mut self, kind: PlayerEventKind) {
        if self.disposed {
            debug!(event = %kind, "Ignoring event after dispose");
            return;
        }
        self.pump();

        let mut signals = Vec::new();
        if self.subscriptions.contains(kind) {
            self.apply_content_event(kind, &mut signals);
        }
        if self.disposed {
            return;
        }

        signals.extend(self.dispatch(|tracker, ctx| tracker.handle_player_event(kind, ctx)));
        self.apply_signals(signals);
    }

    /// Forward an SDK or stream callback to the attached ad tracker
    pub fn handle_provider_event(&mut self, event: ProviderEvent) {
        if self.disposed {
            return;
        }
        self.pump();
        let signals = self.dispatch(|tracker, ctx| tracker.handle_provider_event(&event, ctx));
        self.apply_signals(signals);
    }

    /// The host obtained a stream handle
    pub fn on_stream_manager(&mut self, manager: Arc<dyn StreamManager>) {
        if self.disposed {
            return;
        }
        if let Some(attached) = self.slot.kind() {
            debug!(%attached, "Stream handle arrived after an ad tracker was attached");
            return;
        }
        self.attach_tracker(Box::new(StreamTracker::new(manager)));
    }

    /// Apply background outcomes that already arrived
    pub fn pump(&mut self) {
        let signals = self.dispatch(|tracker, ctx| tracker.poll_background(ctx));
        self.apply_signals(signals);
    }

    /// Wait for the next background outcome and apply it. Returns false
    /// when nothing is outstanding.
    pub async fn settle(&mut self) -> bool {
        let Some(tracker) = self.slot.get_mut() else {
            return false;
        };
        let received = tracker.wait_background().await;
        if received {
            self.pump();
        }
        received
    }

    /// Finish the session and release every registration
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.emit_end();

        self.dispatch(|tracker, ctx| tracker.on_deactivated(ctx));
        self.slot.take();
        self.subscriptions.release(self.player.as_ref());
        self.disposed = true;

        info!(session_id = %self.session.id, "Content tracker disposed");
    }

    fn apply_content_event(&mut self, kind: PlayerEventKind, signals: &mut Vec<AdSignal>) {
        if kind == PlayerEventKind::LoadStart && self.session.state == PlaybackState::Ended {
            self.start_new_session();
        }
        self.refresh();

        match kind {
            PlayerEventKind::LoadStart
            | PlayerEventKind::LoadedData
            | PlayerEventKind::LoadedMetadata => {
                self.emit(CanonicalEvent::download(kind.as_str()));
                if kind == PlayerEventKind::LoadStart {
                    self.probe_schedule();
                }
            }
            PlayerEventKind::Play => {
                self.emit(CanonicalEvent::Request);
                self.set_state(PlaybackState::Requested);
            }
            PlayerEventKind::Playing => {
                self.session.buffering = false;
                self.emit(CanonicalEvent::Resume);
                self.emit(CanonicalEvent::BufferEnd);
                self.set_state(PlaybackState::Started);
            }
            PlayerEventKind::Pause => {
                self.emit(CanonicalEvent::Pause);
                self.set_state(PlaybackState::Paused);
            }
            PlayerEventKind::Waiting | PlayerEventKind::Stalled => {
                self.session.buffering = true;
                self.emit(CanonicalEvent::BufferStart);
                self.set_state(PlaybackState::Buffering);
            }
            PlayerEventKind::Seeking => {
                self.emit(CanonicalEvent::SeekStart);
                self.set_state(PlaybackState::Seeking);
            }
            PlayerEventKind::Seeked => self.emit(CanonicalEvent::SeekEnd),
            PlayerEventKind::TimeUpdate => {
                if self.session.playhead_ms > self.config.start_threshold_ms && self.session.is_live()
                {
                    self.emit(CanonicalEvent::Start);
                    self.set_state(PlaybackState::Started);
                }
            }
            PlayerEventKind::Ended => self.on_content_ended(),
            PlayerEventKind::Dispose => self.dispose(),
            PlayerEventKind::Abort => self.emit_end(),
            PlayerEventKind::Error => {
                if let Some(error) = self.player.error() {
                    warn!(code = ?error.code, message = ?error.message, "Player error");
                    self.emit(CanonicalEvent::error(error.code, error.message));
                }
            }
            PlayerEventKind::AdsReady => self.attach_on_ads_ready(),
            PlayerEventKind::AdStart => signals.push(AdSignal::Started { position: None }),
            PlayerEventKind::AdEnd => signals.push(AdSignal::Ended),
            _ => {}
        }
    }

    fn on_content_ended(&mut self) {
        if self.session.content_end == ContentEnd::Emitted {
            return;
        }
        if self.post_roll_pending() {
            info!(session_id = %self.session.id, "Content ended before its post-roll; deferring END");
            self.session.content_end = ContentEnd::Deferred;
        } else {
            self.emit_end();
        }
    }

    /// A post-roll is pending when an ad tracker is attached and either the
    /// post-roll is playing right now, or the cue points carry the post-roll
    /// sentinel and no post-roll started yet
    fn post_roll_pending(&self) -> bool {
        let Some(tracker) = self.slot.get() else {
            return false;
        };
        if self.session.post_roll == PostRoll::Played {
            return self.session.ad_playing;
        }
        self.session
            .cue_points
            .clone()
            .or_else(|| tracker.cue_points())
            .is_some_and(|cues| cues.has_post_roll())
    }

    fn emit_end(&mut self) {
        if self.session.content_end == ContentEnd::Emitted {
            return;
        }
        self.emit(CanonicalEvent::end());
        self.session.content_end = ContentEnd::Emitted;
        self.set_state(PlaybackState::Ended);
    }

    fn apply_signals(&mut self, signals: Vec<AdSignal>) {
        for signal in signals {
            self.apply_signal(signal);
        }
    }

    fn apply_signal(&mut self, signal: AdSignal) {
        match signal {
            AdSignal::Started { position } => {
                let position = position.or_else(|| {
                    self.slot
                        .get()
                        .and_then(|tracker| tracker.current_position(self.player.as_ref()))
                });
                self.session.ad_playing = true;
                if self.session.cue_points.is_none() {
                    self.session.cue_points = self.slot.get().and_then(|tracker| tracker.cue_points());
                }
                if position == Some(AdPosition::Post)
                    || self.session.content_end == ContentEnd::Deferred
                {
                    self.session.post_roll = PostRoll::Played;
                }
            }
            AdSignal::Ended => {
                self.session.ad_playing = false;
                if self.session.content_end == ContentEnd::Deferred {
                    info!(session_id = %self.session.id, "Post-roll finished; releasing END");
                    self.emit_end();
                }
            }
            AdSignal::AllCompleted => {
                self.session.ad_playing = false;
                self.session.post_roll = PostRoll::Played;
                if self.session.content_end == ContentEnd::Deferred {
                    info!(session_id = %self.session.id, "No ads left to play; releasing END");
                    self.emit_end();
                }
            }
        }
    }

    fn attach_on_ads_ready(&mut self) {
        if let Some(attached) = self.slot.kind() {
            debug!(%attached, "Ads ready with an ad tracker already attached");
            return;
        }
        let kind = ProviderSelector::select_on_ads_ready(self.player.as_ref(), &self.config);
        self.attach(kind);
    }

    fn probe_schedule(&mut self) {
        if self.schedule_probed {
            return;
        }
        self.schedule_probed = true;

        if self.slot.is_vacant()
            && ProviderSelector::is_applicable(ProviderKind::Schedule, self.player.as_ref(), &self.config)
        {
            self.attach(ProviderKind::Schedule);
        }
    }

    fn attach(&mut self, kind: ProviderKind) {
        match ProviderSelector::build(kind, self.player.as_ref(), &self.schedule_client) {
            Some(tracker) => self.attach_tracker(tracker),
            None => warn!(provider = %kind, "Provider handle missing; no ad tracker attached"),
        }
    }

    fn attach_tracker(&mut self, tracker: Box<dyn AdTracker>) {
        if !self.slot.attach(tracker) {
            return;
        }
        let signals = self.dispatch(|tracker, ctx| tracker.on_activated(ctx));
        self.apply_signals(signals);
    }

    /// Run `f` against the attached ad tracker
    fn dispatch(
        &mut self,
        f: impl FnOnce(&mut (dyn AdTracker + 'static), &mut AdContext<'_>),
    ) -> Vec<AdSignal> {
        let live = self.session.is_live() && !self.disposed;
        let Some(tracker) = self.slot.get_mut() else {
            return Vec::new();
        };
        let mut ctx = AdContext::new(self.player.as_ref(), &self.config, &mut self.emitter, live);
        f(tracker, &mut ctx);
        ctx.into_signals()
    }

    fn start_new_session(&mut self) {
        let id = self.emitter.start_session();
        info!(previous = %self.session.id, session_id = %id, "New content session");
        self.session = Session::new(id);
    }

    fn set_state(&mut self, next: PlaybackState) {
        let current = self.session.state;
        if current.can_transition_to(next) {
            debug!(from = %current, to = %next, "State transition");
            self.session.state = next;
        }
    }

    /// Re-read the player's content properties into the session
    fn refresh(&mut self) {
        let player = self.player.as_ref();
        self.session.playhead_ms = content_playhead(player) * 1000.0;
        self.session.duration_ms = content_duration(player).map(|d| d * 1000.0);
        self.session.muted = player.muted();
        self.session.autoplay = player.autoplay();
        self.session.preload = player.preload();
        self.session.fullscreen = player.fullscreen();
        self.session.rendition = tech::current_rendition(player);
    }

    fn content_attributes(&self) -> ContentAttributes {
        let player = self.player.as_ref();
        ContentAttributes {
            playhead_ms: Some(self.session.playhead_ms),
            duration_ms: self.session.duration_ms,
            src: tech::tech_src(player).or_else(|| player.current_src()),
            title: introspect("media info", || player.media_info()).and_then(|info| info.name),
            muted: self.session.muted,
            autoplay: self.session.autoplay,
            preload: self.session.preload,
            fullscreen: self.session.fullscreen,
            playrate: Some(player.playback_rate()),
            rendition: self.session.rendition.clone(),
        }
    }

    fn emit(&mut self, event: CanonicalEvent) {
        let attributes = Attributes::Content(self.content_attributes());
        self.emitter.emit(&self.config.tracker_name, event, attributes);
    }
}

/// Content playhead in seconds: the ads plugin's saved content time while an
/// ad plays, then the stitched absolute time, then the plain current time
fn content_playhead(player: &dyn HostPlayer) -> f64 {
    introspect("ads snapshot time", || player.ads_snapshot_time())
        .flatten()
        .or_else(|| introspect("absolute time", || player.absolute_time()))
        .unwrap_or_else(|| player.current_time())
}

/// Content duration in seconds, catalog metadata first; `None` for live
fn content_duration(player: &dyn HostPlayer) -> Option<f64> {
    introspect("media info", || player.media_info())
        .and_then(|info| info.duration)
        .or_else(|| player.duration())
        .filter(|d| d.is_finite())
}
