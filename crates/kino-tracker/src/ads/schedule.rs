//! Poll-based ad tracker for server-side stitched streams
//!
//! Ads are stitched into the stream, so the player never announces them.
//! Instead the tracker:
//! - opens an ad session against the stitching service and swaps the player
//!   onto the session manifest (once)
//! - fetches the avail schedule after a settle delay
//! - scans the schedule on every time update and fires break, ad and
//!   quartile events from the playhead alone
//!
//! The two HTTP requests run in a spawned task; their outcomes come back
//! over a channel and are applied on the event loop.

use super::progress::QuartileLatch;
use super::{AdContext, AdSignal, AdTracker, ProviderKind};
use crate::config::ScheduleConfig;
use crate::error::{Error, Result};
use crate::events::{AdAttributes, CanonicalEvent};
use crate::player::{HostPlayer, PlayerEventKind, Subscriptions};
use crate::types::{AdPosition, Quartile};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const HLS_MIME_TYPE: &str = "application/x-mpegURL";

// ============================================================================
// Wire format
// ============================================================================

/// Body of the session request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub ads_params: BTreeMap<String, String>,
    pub reporting_mode: String,
}

impl SessionRequest {
    pub fn new(reporting_mode: impl Into<String>) -> Self {
        Self {
            ads_params: BTreeMap::new(),
            reporting_mode: reporting_mode.into(),
        }
    }
}

/// Session response; both URLs may be relative to the endpoint origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub manifest_url: String,
    pub tracking_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingDocument {
    pub avails: Vec<TrackingAvail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingAvail {
    pub avail_id: String,
    pub duration_in_seconds: f64,
    pub ads: Vec<TrackingAd>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingAd {
    pub ad_id: Option<String>,
    pub start_time_in_seconds: f64,
    pub duration_in_seconds: Option<f64>,
}

// ============================================================================
// Schedule
// ============================================================================

/// Lifecycle of one avail; each step fires once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailPhase {
    #[default]
    Pending,
    Started,
    Ended,
}

/// One ad break on the stitched timeline, seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailEntry {
    pub id: String,
    pub start_time: f64,
    pub duration: f64,
    pub end_time: f64,
    pub phase: AvailPhase,
    #[serde(skip)]
    pub quartiles: QuartileLatch,
}

impl AvailEntry {
    pub fn new(id: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self {
            id: id.into(),
            start_time,
            duration,
            end_time: start_time + duration,
            phase: AvailPhase::Pending,
            quartiles: QuartileLatch::new(),
        }
    }

    /// Half-open: the end instant is already outside the avail
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time
    }
}

/// What a scan found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleTransition {
    BreakStarted(usize),
    Quartile(usize, Quartile),
    BreakEnded(usize),
}

/// Avails in document order plus the one currently open
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdSchedule {
    entries: Vec<AvailEntry>,
    current: Option<usize>,
}

impl AdSchedule {
    pub fn new(entries: Vec<AvailEntry>) -> Self {
        Self {
            entries,
            current: None,
        }
    }

    /// One entry per avail that has at least one ad, starting at its first ad
    pub fn from_document(document: &TrackingDocument) -> Self {
        let entries = document
            .avails
            .iter()
            .filter_map(|avail| {
                let first = avail.ads.first()?;
                Some(AvailEntry::new(
                    avail.avail_id.clone(),
                    first.start_time_in_seconds,
                    avail.duration_in_seconds,
                ))
            })
            .collect();
        Self::new(entries)
    }

    pub fn entries(&self) -> &[AvailEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&AvailEntry> {
        self.entries.get(index)
    }

    /// The avail playback is inside, if its start has fired
    pub fn current(&self) -> Option<&AvailEntry> {
        self.current.and_then(|index| self.entries.get(index))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advance every latch the playhead `time` (s) has reached
    pub fn scan(&mut self, time: f64) -> Vec<ScheduleTransition> {
        let mut transitions = Vec::new();
        let active = self.entries.iter().position(|entry| entry.contains(time));

        if let Some(open) = self.current {
            if active != Some(open) {
                self.current = None;
                let entry = &mut self.entries[open];
                if entry.phase == AvailPhase::Started {
                    entry.phase = AvailPhase::Ended;
                    transitions.push(ScheduleTransition::BreakEnded(open));
                }
            }
        }

        let Some(index) = active else {
            return transitions;
        };
        let entry = &mut self.entries[index];

        if entry.phase == AvailPhase::Pending {
            entry.phase = AvailPhase::Started;
            self.current = Some(index);
            transitions.push(ScheduleTransition::BreakStarted(index));
        }

        if entry.phase == AvailPhase::Started {
            for quartile in entry.quartiles.crossed(time - entry.start_time, entry.duration) {
                transitions.push(ScheduleTransition::Quartile(index, quartile));
            }
        }

        transitions
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Talks to the stitching service
#[async_trait]
pub trait ScheduleClient: Send + Sync {
    async fn open_session(&self, url: &Url, request: &SessionRequest) -> Result<SessionResponse>;

    async fn fetch_tracking(&self, url: &Url) -> Result<TrackingDocument>;
}

/// [`ScheduleClient`] over reqwest
pub struct HttpScheduleClient {
    client: reqwest::Client,
}

impl HttpScheduleClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kino-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScheduleClient for HttpScheduleClient {
    async fn open_session(&self, url: &Url, request: &SessionRequest) -> Result<SessionResponse> {
        let response = self
            .client
            .post(url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| Error::bootstrap(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::bootstrap(format!(
                "session request failed: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::bootstrap(e.to_string()))
    }

    async fn fetch_tracking(&self, url: &Url) -> Result<TrackingDocument> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::ScheduleFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ScheduleFetch(format!(
                "tracking request failed: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::ScheduleFetch(e.to_string()))
    }
}

/// Session URL for a stitched source, plus the origin relative URLs resolve against
pub fn session_endpoint(src: &str, config: &ScheduleConfig) -> Result<(Url, Url)> {
    let session = src.replacen(&config.master_path, &config.session_path, 1);
    let session_url = Url::parse(&session)?;
    let origin = Url::parse(&session_url.origin().ascii_serialization())?;
    Ok((session_url, origin))
}

/// Tracking URL with the cache-busting timestamp
fn cache_busted(tracking_url: &Url) -> Url {
    let mut url = tracking_url.clone();
    url.query_pairs_mut()
        .append_pair("t", &Utc::now().timestamp_millis().to_string());
    url
}

// ============================================================================
// Background bootstrap
// ============================================================================

/// Outcome of background work, applied on the event loop
#[derive(Debug)]
enum Background {
    SessionReady { manifest_url: Url, tracking_url: Url },
    ScheduleLoaded(AdSchedule),
    Failed(Error),
}

#[instrument(skip_all, fields(session_url = %session_url))]
async fn run_bootstrap(
    client: Arc<dyn ScheduleClient>,
    session_url: Url,
    origin: Url,
    request: SessionRequest,
    settle_delay: Duration,
    outcomes: mpsc::UnboundedSender<Background>,
) {
    let opened = client
        .open_session(&session_url, &request)
        .await
        .and_then(|response| {
            Ok((
                origin.join(&response.manifest_url)?,
                origin.join(&response.tracking_url)?,
            ))
        });

    let (manifest_url, tracking_url) = match opened {
        Ok(urls) => urls,
        Err(e) => {
            error!(error = %e, "Ad session bootstrap failed");
            let _ = outcomes.send(Background::Failed(e));
            return;
        }
    };

    debug!(%manifest_url, %tracking_url, "Ad session opened");
    let ready = Background::SessionReady {
        manifest_url,
        tracking_url: tracking_url.clone(),
    };
    if outcomes.send(ready).is_err() {
        return;
    }

    tokio::time::sleep(settle_delay).await;
    if outcomes.is_closed() {
        debug!("Tracker gone before the schedule fetch");
        return;
    }

    let outcome = match client.fetch_tracking(&cache_busted(&tracking_url)).await {
        Ok(document) => Background::ScheduleLoaded(AdSchedule::from_document(&document)),
        Err(e) => {
            error!(error = %e, "Ad schedule fetch failed");
            Background::Failed(e)
        }
    };
    let _ = outcomes.send(outcome);
}

// ============================================================================
// Tracker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the session and schedule
    Bootstrapping,
    /// Schedule loaded, scanning on time updates
    Ready,
    /// Gave up for this session
    Inactive,
}

/// The player source is swapped onto the session manifest only once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitialLoad {
    Pending,
    Consumed,
}

/// Ad tracker driven by a fetched avail schedule
pub struct ScheduleTracker {
    endpoint: String,
    client: Arc<dyn ScheduleClient>,
    phase: Phase,
    initial_load: InitialLoad,
    schedule: AdSchedule,
    outcomes: Option<mpsc::UnboundedReceiver<Background>>,
    inbox: VecDeque<Background>,
    subscriptions: Subscriptions,
    /// Pre-roll and post-roll windows, seconds
    position_windows: (f64, f64),
}

impl ScheduleTracker {
    /// `endpoint` is the stitched source the player was loaded with
    pub fn new(endpoint: impl Into<String>, client: Arc<dyn ScheduleClient>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
            phase: Phase::Bootstrapping,
            initial_load: InitialLoad::Pending,
            schedule: AdSchedule::default(),
            outcomes: None,
            inbox: VecDeque::new(),
            subscriptions: Subscriptions::default(),
            position_windows: (5.0, 10.0),
        }
    }

    pub fn schedule(&self) -> &AdSchedule {
        &self.schedule
    }

    /// True once the avail schedule has been loaded
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    fn bootstrap(&mut self, config: &ScheduleConfig) {
        let (session_url, origin) = match session_endpoint(&self.endpoint, config) {
            Ok(urls) => urls,
            Err(e) => {
                self.inbox.push_back(Background::Failed(e));
                return;
            }
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(error = %Error::NoRuntime, "Schedule tracker stays inactive");
                self.phase = Phase::Inactive;
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes = Some(rx);

        info!(%session_url, "Opening ad session");
        runtime.spawn(run_bootstrap(
            self.client.clone(),
            session_url,
            origin,
            SessionRequest::new(config.reporting_mode.clone()),
            config.settle_delay(),
            tx,
        ));
    }

    fn apply(&mut self, outcome: Background, ctx: &mut AdContext<'_>) {
        if !ctx.is_session_live() || self.phase == Phase::Inactive {
            debug!("Discarding background outcome for a finished session");
            return;
        }

        match outcome {
            Background::SessionReady {
                manifest_url,
                tracking_url,
            } => {
                info!(%manifest_url, %tracking_url, "Ad session ready");
                if self.initial_load == InitialLoad::Pending {
                    self.initial_load = InitialLoad::Consumed;
                    ctx.player.set_source(manifest_url.as_str(), HLS_MIME_TYPE);
                }
            }
            Background::ScheduleLoaded(schedule) => {
                info!(avails = schedule.len(), "Ad schedule loaded");
                self.schedule = schedule;
                self.phase = Phase::Ready;
            }
            Background::Failed(e) => {
                self.phase = Phase::Inactive;
                self.outcomes = None;
                self.inbox.clear();
                let attributes = self.ad_attributes(ctx.player);
                ctx.emit(
                    self.tracker_name(),
                    CanonicalEvent::error(Some(e.error_code().to_string()), Some(e.to_string())),
                    attributes,
                );
            }
        }
    }

    fn entry_attributes(&self, index: usize, player: &dyn HostPlayer) -> AdAttributes {
        let Some(entry) = self.schedule.get(index) else {
            return AdAttributes::default();
        };
        AdAttributes {
            ad_id: Some(entry.id.clone()),
            title: Some(entry.id.clone()),
            duration_ms: Some(entry.duration * 1000.0),
            playhead_ms: Some(((player.current_time() - entry.start_time) * 1000.0).max(0.0)),
            position: Some(self.classify(entry, player)),
            break_id: Some(entry.id.clone()),
            ..AdAttributes::default()
        }
    }

    fn classify(&self, entry: &AvailEntry, player: &dyn HostPlayer) -> AdPosition {
        let (pre_window, post_window) = self.position_windows;
        AdPosition::classify_by_playhead(entry.start_time, player.duration(), pre_window, post_window)
    }

    fn on_transition(&self, transition: ScheduleTransition, ctx: &mut AdContext<'_>) {
        let name = self.tracker_name();
        match transition {
            ScheduleTransition::BreakStarted(index) => {
                let attributes = self.entry_attributes(index, ctx.player);
                let position = attributes.position;
                debug!(avail = ?attributes.ad_id, ?position, "Avail started");
                ctx.emit(name, CanonicalEvent::AdBreakStart, attributes.clone());
                ctx.emit(name, CanonicalEvent::Start, attributes);
                ctx.player.set_seek_enabled(false);
                ctx.signal(AdSignal::Started { position });
            }
            ScheduleTransition::Quartile(index, quartile) => {
                let attributes = self.entry_attributes(index, ctx.player);
                ctx.emit(name, CanonicalEvent::quartile(quartile), attributes);
            }
            ScheduleTransition::BreakEnded(index) => {
                let attributes = self.entry_attributes(index, ctx.player);
                debug!(avail = ?attributes.ad_id, "Avail ended");
                ctx.emit(name, CanonicalEvent::end(), attributes.clone());
                ctx.emit(name, CanonicalEvent::AdBreakEnd, attributes);
                ctx.player.set_seek_enabled(true);
                ctx.signal(AdSignal::Ended);
            }
        }
    }
}

#[async_trait]
impl AdTracker for ScheduleTracker {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Schedule
    }

    fn is_active(&self) -> bool {
        self.phase != Phase::Inactive
    }

    fn on_activated(&mut self, ctx: &mut AdContext<'_>) {
        self.position_windows = (
            ctx.config.stream.pre_roll_window_secs,
            ctx.config.stream.post_roll_window_secs,
        );
        self.subscriptions = Subscriptions::subscribe(ctx.player, &[PlayerEventKind::TimeUpdate]);
        self.bootstrap(&ctx.config.schedule);
        info!(
            tracker = self.tracker_name(),
            endpoint = %self.endpoint,
            "Ad tracker activated"
        );
    }

    fn on_deactivated(&mut self, ctx: &mut AdContext<'_>) {
        self.subscriptions.release(ctx.player);
        // closing the channel stops the background task
        self.outcomes = None;
        self.inbox.clear();
        debug!(tracker = self.tracker_name(), "Ad tracker deactivated");
    }

    fn handle_player_event(&mut self, kind: PlayerEventKind, ctx: &mut AdContext<'_>) {
        if kind != PlayerEventKind::TimeUpdate || !self.subscriptions.contains(kind) {
            return;
        }
        if self.phase != Phase::Ready {
            return;
        }
        for transition in self.schedule.scan(ctx.player.current_time()) {
            self.on_transition(transition, ctx);
        }
    }

    fn poll_background(&mut self, ctx: &mut AdContext<'_>) {
        let mut closed = false;
        if let Some(outcomes) = self.outcomes.as_mut() {
            loop {
                match outcomes.try_recv() {
                    Ok(outcome) => self.inbox.push_back(outcome),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            self.outcomes = None;
        }

        while let Some(outcome) = self.inbox.pop_front() {
            self.apply(outcome, ctx);
        }
    }

    async fn wait_background(&mut self) -> bool {
        if !self.inbox.is_empty() {
            return true;
        }
        let Some(outcomes) = self.outcomes.as_mut() else {
            return false;
        };
        match outcomes.recv().await {
            Some(outcome) => {
                self.inbox.push_back(outcome);
                true
            }
            None => {
                self.outcomes = None;
                false
            }
        }
    }

    fn current_position(&self, player: &dyn HostPlayer) -> Option<AdPosition> {
        let entry = self.schedule.current()?;
        Some(self.classify(entry, player))
    }

    fn ad_attributes(&self, player: &dyn HostPlayer) -> AdAttributes {
        match self.schedule.current_index() {
            Some(index) => self.entry_attributes(index, player),
            None => AdAttributes::default(),
        }
    }
}
