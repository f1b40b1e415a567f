//! Rendition introspection over the streaming technology
//!
//! Answers "what is being decoded right now" (name, bitrate, width, height)
//! whichever technology backs playback:
//! - Segment loader HLS (playlist attributes of the active media playlist)
//! - Embedded HLS decoder (level list plus current level index)
//! - Manifest player (stats and active variant tracks)
//!
//! Nothing here holds state. The adapter is probed fresh on every query,
//! and every accessor answers `None` rather than failing.

use crate::player::{introspect, HostPlayer, ProviderResult};
use crate::types::{RenditionInfo, Resolution};
use serde::{Deserialize, Serialize};

/// Attributes of the active media playlist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistAttributes {
    /// `NAME` attribute
    pub name: Option<String>,
    /// `BANDWIDTH` attribute, bits per second
    pub bandwidth: Option<u64>,
    /// `RESOLUTION` attribute
    pub resolution: Option<Resolution>,
}

/// One quality level of an embedded HLS decoder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HlsLevel {
    pub name: Option<String>,
    /// Bits per second, 0 when unknown
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
}

/// Variant track of a manifest player
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantTrack {
    pub active: bool,
    /// `video`, `audio` or `text`
    pub kind: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bandwidth: Option<u64>,
}

/// HLS through a segment loader
pub trait SegmentLoaderTech {
    /// Media playlist currently selected, if any
    fn active_media(&self) -> ProviderResult<Option<PlaylistAttributes>>;
}

/// HLS through an embedded decoder
pub trait HlsDecoderTech {
    fn levels(&self) -> ProviderResult<Vec<HlsLevel>>;

    /// Index into [`HlsDecoderTech::levels`]; negative while on auto
    fn current_level(&self) -> ProviderResult<i32>;

    fn url(&self) -> ProviderResult<String>;
}

/// Manifest-driven player (DASH/HLS)
pub trait ManifestPlayerTech {
    /// Bandwidth of the active stream from the player's stats
    fn stream_bandwidth(&self) -> ProviderResult<u64>;

    fn variant_tracks(&self) -> ProviderResult<Vec<VariantTrack>>;

    fn manifest_uri(&self) -> ProviderResult<String>;
}

/// Technology handle of the host player.
///
/// Exposes whichever backend is actually in use; the others stay `None`.
pub trait TechHandle: Send + Sync {
    fn segment_loader(&self) -> Option<&dyn SegmentLoaderTech> {
        None
    }

    fn hls_decoder(&self) -> Option<&dyn HlsDecoderTech> {
        None
    }

    fn manifest_player(&self) -> Option<&dyn ManifestPlayerTech> {
        None
    }
}

/// Technology families the adapter understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechKind {
    SegmentLoader,
    HlsDecoder,
    ManifestPlayer,
}

/// Read-only view over whichever technology is active
pub enum RenditionAdapter<'a> {
    SegmentLoader(&'a dyn SegmentLoaderTech),
    HlsDecoder(&'a dyn HlsDecoderTech),
    ManifestPlayer(&'a dyn ManifestPlayerTech),
}

impl<'a> RenditionAdapter<'a> {
    /// First backend the handle exposes, in a fixed order
    pub fn probe(tech: &'a dyn TechHandle) -> Option<Self> {
        if let Some(loader) = tech.segment_loader() {
            Some(RenditionAdapter::SegmentLoader(loader))
        } else if let Some(decoder) = tech.hls_decoder() {
            Some(RenditionAdapter::HlsDecoder(decoder))
        } else {
            tech.manifest_player().map(RenditionAdapter::ManifestPlayer)
        }
    }

    pub fn kind(&self) -> TechKind {
        match self {
            RenditionAdapter::SegmentLoader(_) => TechKind::SegmentLoader,
            RenditionAdapter::HlsDecoder(_) => TechKind::HlsDecoder,
            RenditionAdapter::ManifestPlayer(_) => TechKind::ManifestPlayer,
        }
    }

    pub fn name(&self) -> Option<String> {
        match self {
            RenditionAdapter::SegmentLoader(loader) => Self::active_media(*loader)?.name,
            RenditionAdapter::HlsDecoder(decoder) => {
                Self::current_level(*decoder)?.name.filter(|n| !n.is_empty())
            }
            RenditionAdapter::ManifestPlayer(_) => None,
        }
    }

    pub fn bitrate(&self) -> Option<u64> {
        match self {
            RenditionAdapter::SegmentLoader(loader) => Self::active_media(*loader)?.bandwidth,
            RenditionAdapter::HlsDecoder(decoder) => {
                Some(Self::current_level(*decoder)?.bitrate).filter(|b| *b > 0)
            }
            RenditionAdapter::ManifestPlayer(player) => {
                introspect("stream bandwidth", || player.stream_bandwidth())
            }
        }
    }

    pub fn width(&self) -> Option<u32> {
        match self {
            RenditionAdapter::SegmentLoader(loader) => {
                Self::active_media(*loader)?.resolution.map(|r| r.width)
            }
            RenditionAdapter::HlsDecoder(decoder) => {
                Some(Self::current_level(*decoder)?.width).filter(|w| *w > 0)
            }
            RenditionAdapter::ManifestPlayer(player) => Self::active_video(*player)?.width,
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            RenditionAdapter::SegmentLoader(loader) => {
                Self::active_media(*loader)?.resolution.map(|r| r.height)
            }
            RenditionAdapter::HlsDecoder(decoder) => {
                Some(Self::current_level(*decoder)?.height).filter(|h| *h > 0)
            }
            RenditionAdapter::ManifestPlayer(player) => Self::active_video(*player)?.height,
        }
    }

    /// Source URL according to the tech, when it knows better than the player
    pub fn src(&self) -> Option<String> {
        match self {
            RenditionAdapter::SegmentLoader(_) => None,
            RenditionAdapter::HlsDecoder(decoder) => introspect("decoder url", || decoder.url()),
            RenditionAdapter::ManifestPlayer(player) => {
                introspect("manifest uri", || player.manifest_uri())
            }
        }
    }

    pub fn rendition(&self) -> RenditionInfo {
        RenditionInfo {
            name: self.name(),
            bitrate: self.bitrate(),
            width: self.width(),
            height: self.height(),
        }
    }

    fn active_media(loader: &dyn SegmentLoaderTech) -> Option<PlaylistAttributes> {
        introspect("active media playlist", || loader.active_media()).flatten()
    }

    fn current_level(decoder: &dyn HlsDecoderTech) -> Option<HlsLevel> {
        let index = introspect("current level", || decoder.current_level())?;
        let index = usize::try_from(index).ok()?;
        introspect("levels", || decoder.levels())?.into_iter().nth(index)
    }

    fn active_video(player: &dyn ManifestPlayerTech) -> Option<VariantTrack> {
        introspect("variant tracks", || player.variant_tracks())?
            .into_iter()
            .find(|track| track.active && track.kind == "video")
    }
}

/// Rendition of whatever the player is decoding right now
pub fn current_rendition(player: &dyn HostPlayer) -> RenditionInfo {
    player
        .tech()
        .and_then(|tech| RenditionAdapter::probe(tech.as_ref()).map(|adapter| adapter.rendition()))
        .unwrap_or_default()
}

/// Source URL preferred by the tech, if it reports one
pub fn tech_src(player: &dyn HostPlayer) -> Option<String> {
    let tech = player.tech()?;
    let adapter = RenditionAdapter::probe(tech.as_ref())?;
    adapter.src()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ProviderFault;

    struct Loader(Option<PlaylistAttributes>);

    impl SegmentLoaderTech for Loader {
        fn active_media(&self) -> ProviderResult<Option<PlaylistAttributes>> {
            Ok(self.0.clone())
        }
    }

    struct Decoder {
        levels: Vec<HlsLevel>,
        current: i32,
    }

    impl HlsDecoderTech for Decoder {
        fn levels(&self) -> ProviderResult<Vec<HlsLevel>> {
            Ok(self.levels.clone())
        }

        fn current_level(&self) -> ProviderResult<i32> {
            Ok(self.current)
        }

        fn url(&self) -> ProviderResult<String> {
            Err(ProviderFault::new("detached"))
        }
    }

    struct Shaka;

    impl ManifestPlayerTech for Shaka {
        fn stream_bandwidth(&self) -> ProviderResult<u64> {
            Ok(2_500_000)
        }

        fn variant_tracks(&self) -> ProviderResult<Vec<VariantTrack>> {
            Ok(vec![
                VariantTrack {
                    active: false,
                    kind: "video".into(),
                    width: Some(640),
                    height: Some(360),
                    bandwidth: None,
                },
                VariantTrack {
                    active: true,
                    kind: "video".into(),
                    width: Some(1280),
                    height: Some(720),
                    bandwidth: None,
                },
            ])
        }

        fn manifest_uri(&self) -> ProviderResult<String> {
            Ok("https://cdn.example.com/stream.mpd".into())
        }
    }

    struct Tech {
        loader: Option<Loader>,
        decoder: Option<Decoder>,
        shaka: Option<Shaka>,
    }

    impl TechHandle for Tech {
        fn segment_loader(&self) -> Option<&dyn SegmentLoaderTech> {
            self.loader.as_ref().map(|l| l as &dyn SegmentLoaderTech)
        }

        fn hls_decoder(&self) -> Option<&dyn HlsDecoderTech> {
            self.decoder.as_ref().map(|d| d as &dyn HlsDecoderTech)
        }

        fn manifest_player(&self) -> Option<&dyn ManifestPlayerTech> {
            self.shaka.as_ref().map(|s| s as &dyn ManifestPlayerTech)
        }
    }

    #[test]
    fn test_segment_loader_rendition() {
        let tech = Tech {
            loader: Some(Loader(Some(PlaylistAttributes {
                name: Some("720p".into()),
                bandwidth: Some(3_000_000),
                resolution: Some(Resolution::new(1280, 720)),
            }))),
            decoder: None,
            shaka: None,
        };
        let adapter = RenditionAdapter::probe(&tech).unwrap();
        assert_eq!(adapter.kind(), TechKind::SegmentLoader);
        assert_eq!(
            adapter.rendition(),
            RenditionInfo {
                name: Some("720p".into()),
                bitrate: Some(3_000_000),
                width: Some(1280),
                height: Some(720),
            }
        );
    }

    #[test]
    fn test_decoder_auto_level_is_unknown() {
        let tech = Tech {
            loader: None,
            decoder: Some(Decoder {
                levels: vec![HlsLevel::default()],
                current: -1,
            }),
            shaka: None,
        };
        let adapter = RenditionAdapter::probe(&tech).unwrap();
        assert!(adapter.rendition().is_unknown());
        assert_eq!(adapter.src(), None);
    }

    #[test]
    fn test_decoder_zero_values_are_unknown() {
        let tech = Tech {
            loader: None,
            decoder: Some(Decoder {
                levels: vec![HlsLevel {
                    name: Some(String::new()),
                    bitrate: 800_000,
                    width: 0,
                    height: 0,
                }],
                current: 0,
            }),
            shaka: None,
        };
        let rendition = RenditionAdapter::probe(&tech).unwrap().rendition();
        assert_eq!(rendition.name, None);
        assert_eq!(rendition.bitrate, Some(800_000));
        assert_eq!(rendition.width, None);
    }

    #[test]
    fn test_manifest_player_active_video_track() {
        let tech = Tech {
            loader: None,
            decoder: None,
            shaka: Some(Shaka),
        };
        let adapter = RenditionAdapter::probe(&tech).unwrap();
        assert_eq!(adapter.width(), Some(1280));
        assert_eq!(adapter.height(), Some(720));
        assert_eq!(adapter.bitrate(), Some(2_500_000));
        assert_eq!(adapter.name(), None);
        assert_eq!(adapter.src().as_deref(), Some("https://cdn.example.com/stream.mpd"));
    }

    #[test]
    fn test_loader_takes_priority() {
        let tech = Tech {
            loader: Some(Loader(None)),
            decoder: None,
            shaka: Some(Shaka),
        };
        let adapter = RenditionAdapter::probe(&tech).unwrap();
        assert_eq!(adapter.kind(), TechKind::SegmentLoader);
        assert!(adapter.rendition().is_unknown());
    }

    #[test]
    fn test_no_backend() {
        let tech = Tech {
            loader: None,
            decoder: None,
            shaka: None,
        };
        assert!(RenditionAdapter::probe(&tech).is_none());
    }
}
