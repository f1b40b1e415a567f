//! Ad provider selection
//!
//! Three paths can attach an ad tracker to a session:
//! - the ads plugin reports ready: first applicable provider in a fixed
//!   priority order, generic as fallback
//! - the first source load points at a stitching service: schedule tracker
//! - the host pushes a stream handle: stream tracker
//!
//! Whichever comes first wins; the slot refuses every later attachment.

use super::named::{NamedEventTracker, NamedFlavor};
use super::schedule::{ScheduleClient, ScheduleTracker};
use super::sdk::SdkTracker;
use super::stream::StreamTracker;
use super::{AdTracker, ProviderKind};
use crate::config::TrackerConfig;
use crate::player::HostPlayer;
use std::sync::Arc;
use tracing::{debug, info};

/// Providers tried when the ads plugin reports ready, in order
pub const ADS_READY_PRIORITY: [ProviderKind; 4] = [
    ProviderKind::SdkCallback,
    ProviderKind::Brightcove,
    ProviderKind::FreeWheel,
    ProviderKind::StreamManifest,
];

/// Pure capability probes over the host player
pub struct ProviderSelector;

impl ProviderSelector {
    /// Whether `kind` can serve this player right now
    pub fn is_applicable(kind: ProviderKind, player: &dyn HostPlayer, config: &TrackerConfig) -> bool {
        let caps = player.capabilities();
        match kind {
            ProviderKind::Generic => caps.ads_plugin,
            ProviderKind::SdkCallback => caps.ima_sdk,
            ProviderKind::Brightcove => caps.ima3_plugin,
            ProviderKind::FreeWheel => caps.freewheel_plugin,
            ProviderKind::StreamManifest => caps.stream_plugin && player.stream_manager().is_some(),
            ProviderKind::Schedule => Self::is_stitched_source(player.current_src().as_deref(), config),
        }
    }

    /// True when `src` points at the stitching service
    pub fn is_stitched_source(src: Option<&str>, config: &TrackerConfig) -> bool {
        src.is_some_and(|src| src.contains(&config.schedule.url_pattern))
    }

    /// Provider to attach when the ads plugin reports ready
    pub fn select_on_ads_ready(player: &dyn HostPlayer, config: &TrackerConfig) -> ProviderKind {
        ADS_READY_PRIORITY
            .into_iter()
            .find(|kind| Self::is_applicable(*kind, player, config))
            .unwrap_or(ProviderKind::Generic)
    }

    /// Build the tracker for `kind`. `None` when the provider's handle is
    /// missing.
    pub fn build(
        kind: ProviderKind,
        player: &dyn HostPlayer,
        schedule_client: &Arc<dyn ScheduleClient>,
    ) -> Option<Box<dyn AdTracker>> {
        let tracker: Box<dyn AdTracker> = match kind {
            ProviderKind::Generic => Box::new(NamedEventTracker::new(NamedFlavor::Generic)),
            ProviderKind::Brightcove => Box::new(NamedEventTracker::new(NamedFlavor::Brightcove)),
            ProviderKind::FreeWheel => Box::new(NamedEventTracker::new(NamedFlavor::FreeWheel)),
            ProviderKind::SdkCallback => Box::new(SdkTracker::new()),
            ProviderKind::StreamManifest => Box::new(StreamTracker::new(player.stream_manager()?)),
            ProviderKind::Schedule => Box::new(ScheduleTracker::new(
                player.current_src()?,
                schedule_client.clone(),
            )),
        };
        Some(tracker)
    }
}

/// Holds the session's ad tracker; the first attachment wins
#[derive(Default)]
pub struct AttachmentSlot {
    tracker: Option<Box<dyn AdTracker>>,
}

impl AttachmentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_vacant(&self) -> bool {
        self.tracker.is_none()
    }

    /// Attach `tracker` unless one is already attached. Returns whether it
    /// was taken.
    pub fn attach(&mut self, tracker: Box<dyn AdTracker>) -> bool {
        if let Some(existing) = &self.tracker {
            debug!(
                attached = %existing.kind(),
                refused = %tracker.kind(),
                "Ad tracker already attached"
            );
            return false;
        }
        info!(tracker = %tracker.kind(), "Ad tracker attached");
        self.tracker = Some(tracker);
        true
    }

    pub fn kind(&self) -> Option<ProviderKind> {
        self.tracker.as_ref().map(|tracker| tracker.kind())
    }

    pub fn get(&self) -> Option<&dyn AdTracker> {
        self.tracker.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut (dyn AdTracker + 'static)> {
        self.tracker.as_deref_mut()
    }

    /// Remove the tracker, leaving the slot vacant
    pub fn take(&mut self) -> Option<Box<dyn AdTracker>> {
        self.tracker.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerCapabilities;
    use crate::replay::{ScriptedPlayer, ScriptedScheduleClient, ScriptedStreamManager};

    fn player_with(caps: PlayerCapabilities) -> ScriptedPlayer {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.m3u8");
        player.set_capabilities(caps);
        player
    }

    #[test]
    fn test_priority_order() {
        let config = TrackerConfig::default();
        let everything = PlayerCapabilities {
            ads_plugin: true,
            ima_sdk: true,
            ima3_plugin: true,
            freewheel_plugin: true,
            stream_plugin: true,
        };
        assert_eq!(
            ProviderSelector::select_on_ads_ready(&player_with(everything), &config),
            ProviderKind::SdkCallback
        );

        let no_sdk = PlayerCapabilities {
            ima_sdk: false,
            ..everything
        };
        assert_eq!(
            ProviderSelector::select_on_ads_ready(&player_with(no_sdk), &config),
            ProviderKind::Brightcove
        );

        let freewheel_only = PlayerCapabilities {
            ads_plugin: true,
            freewheel_plugin: true,
            ..PlayerCapabilities::default()
        };
        assert_eq!(
            ProviderSelector::select_on_ads_ready(&player_with(freewheel_only), &config),
            ProviderKind::FreeWheel
        );
    }

    #[test]
    fn test_generic_fallback() {
        let config = TrackerConfig::default();
        let player = player_with(PlayerCapabilities::default());
        assert_eq!(
            ProviderSelector::select_on_ads_ready(&player, &config),
            ProviderKind::Generic
        );
    }

    #[test]
    fn test_stream_plugin_needs_handle() {
        let config = TrackerConfig::default();
        let player = player_with(PlayerCapabilities {
            ads_plugin: true,
            stream_plugin: true,
            ..PlayerCapabilities::default()
        });
        assert_eq!(
            ProviderSelector::select_on_ads_ready(&player, &config),
            ProviderKind::Generic
        );

        player.set_stream_manager(Arc::new(ScriptedStreamManager::new()));
        assert_eq!(
            ProviderSelector::select_on_ads_ready(&player, &config),
            ProviderKind::StreamManifest
        );
    }

    #[test]
    fn test_stitched_source_probe() {
        let config = TrackerConfig::default();
        assert!(ProviderSelector::is_stitched_source(
            Some("https://x.mediatailor.us-east-1.amazonaws.com/v1/master/a/b/master.m3u8"),
            &config
        ));
        assert!(!ProviderSelector::is_stitched_source(
            Some("https://cdn.example.com/movie.m3u8"),
            &config
        ));
        assert!(!ProviderSelector::is_stitched_source(None, &config));
    }

    #[test]
    fn test_first_attachment_wins() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.m3u8");
        let client: Arc<dyn ScheduleClient> = Arc::new(ScriptedScheduleClient::new(None, None));
        let mut slot = AttachmentSlot::new();

        let generic = ProviderSelector::build(ProviderKind::Generic, &player, &client).unwrap();
        assert!(slot.attach(generic));

        let sdk = ProviderSelector::build(ProviderKind::SdkCallback, &player, &client).unwrap();
        assert!(!slot.attach(sdk));
        assert_eq!(slot.kind(), Some(ProviderKind::Generic));
    }

    #[test]
    fn test_build_without_stream_handle() {
        let player = ScriptedPlayer::new("https://cdn.example.com/movie.m3u8");
        let client: Arc<dyn ScheduleClient> = Arc::new(ScriptedScheduleClient::new(None, None));
        assert!(ProviderSelector::build(ProviderKind::StreamManifest, &player, &client).is_none());
    }
}
