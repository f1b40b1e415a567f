//! Ad and ad-break entities
//!
//! Idempotence lives here rather than at the emitter: every milestone of an
//! ad is a one-way latch that can only move forward.

use crate::events::AdAttributes;
use crate::types::{AdPosition, Quartile};
use serde::{Deserialize, Serialize};

/// Highest quartile fired so far for one ad.
///
/// A quartile is accepted only when it is past the last one fired, so each
/// fires at most once and never out of order. Only a new ad resets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuartileLatch {
    last: Option<Quartile>,
}

impl QuartileLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to fire `quartile`; false if it (or a later one) already fired
    pub fn fire(&mut self, quartile: Quartile) -> bool {
        match self.last {
            Some(last) if quartile <= last => false,
            _ => {
                self.last = Some(quartile);
                true
            }
        }
    }

    /// Fire every quartile that `progress` (s) has reached within `duration` (s),
    /// in order
    pub fn crossed(&mut self, progress: f64, duration: f64) -> Vec<Quartile> {
        Quartile::ALL
            .into_iter()
            .filter(|q| progress >= duration * q.fraction())
            .filter(|q| self.fire(*q))
            .collect()
    }

    pub fn last(&self) -> Option<Quartile> {
        self.last
    }
}

/// One ad spot within a break
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ad {
    pub id: Option<String>,
    pub creative_id: Option<String>,
    pub duration_ms: Option<f64>,
    pub media_url: Option<String>,
    pub title: Option<String>,
    pub click_through_url: Option<String>,
    pub partner: Option<String>,
    pub bitrate: Option<u64>,
    pub position: Option<AdPosition>,
    #[serde(skip)]
    pub quartiles: QuartileLatch,
}

impl Ad {
    /// Attributes for canonical events about this ad
    pub fn attributes(&self) -> AdAttributes {
        AdAttributes {
            ad_id: self.id.clone(),
            creative_id: self.creative_id.clone(),
            title: self.title.clone(),
            src: self.media_url.clone(),
            duration_ms: self.duration_ms,
            playhead_ms: None,
            position: self.position,
            partner: self.partner.clone(),
            bitrate: self.bitrate,
            break_id: None,
        }
    }
}

/// A contiguous span of ads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdBreak {
    pub id: Option<String>,
    pub title: Option<String>,
    pub position: Option<AdPosition>,
    /// Seconds into the content
    pub start_offset: Option<f64>,
    /// Seconds
    pub duration: Option<f64>,
    pub ad_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_fires_once() {
        let mut latch = QuartileLatch::new();
        assert!(latch.fire(Quartile::First));
        assert!(!latch.fire(Quartile::First));
        assert!(latch.fire(Quartile::Midpoint));
        assert_eq!(latch.last(), Some(Quartile::Midpoint));
    }

    #[test]
    fn test_latch_rejects_out_of_order() {
        let mut latch = QuartileLatch::new();
        assert!(latch.fire(Quartile::Third));
        assert!(!latch.fire(Quartile::First));
        assert!(!latch.fire(Quartile::Midpoint));
    }

    #[test]
    fn test_crossed_in_order() {
        let mut latch = QuartileLatch::new();
        assert_eq!(latch.crossed(1.0, 15.0), vec![]);
        assert_eq!(latch.crossed(4.0, 15.0), vec![Quartile::First]);
        // jump past two milestones in one tick
        assert_eq!(latch.crossed(12.0, 15.0), vec![Quartile::Midpoint, Quartile::Third]);
        assert_eq!(latch.crossed(14.0, 15.0), vec![]);
    }

    #[test]
    fn test_new_ad_resets_latch() {
        let mut ad = Ad::default();
        assert!(ad.quartiles.fire(Quartile::First));
        ad = Ad::default();
        assert!(ad.quartiles.fire(Quartile::First));
    }
}
