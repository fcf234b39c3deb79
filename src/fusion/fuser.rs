//! Combining filtered per-technology streams into one.

use crate::technology::{RangingTechnology, TechnologySet};
use crate::RangingData;

/// Preference window of the [`PreferentialFuser`]: how long the preferred
/// technology's latest reading dominates other sources, in milliseconds.
pub const PREFERENCE_WINDOW_MS: u64 = 1000;

/// Merges filtered measurements from a peer's active technologies into the
/// single stream surfaced to the listener.
///
/// A fuser emits at most one result per input and always stamps its output
/// with the triggering input's timestamp.
pub trait DataFuser: Send {
    /// Fuses one filtered measurement. `active` is the peer's current set of
    /// data sources.
    fn fuse(&mut self, data: RangingData, active: &TechnologySet) -> Option<RangingData>;
}

/// Passes every filtered measurement straight through.
///
/// The right choice when a peer ranges over a single technology, or when the
/// client wants the raw per-technology streams.
#[derive(Debug, Default)]
pub struct PassthroughFuser;

impl DataFuser for PassthroughFuser {
    fn fuse(&mut self, data: RangingData, _active: &TechnologySet) -> Option<RangingData> {
        Some(data)
    }
}

/// Prefers one technology (UWB by default) while it is alive.
///
/// While the preferred source is active and has reported within
/// [`PREFERENCE_WINDOW_MS`], its latest measurements stand in for every other
/// source's output; the emission keeps the triggering input's timestamp.
/// Once the preferred source goes quiet or is removed, the remaining sources
/// pass through.
#[derive(Debug)]
pub struct PreferentialFuser {
    preferred: RangingTechnology,
    window_ms: u64,
    last_preferred: Option<RangingData>,
}

impl PreferentialFuser {
    /// Creates a fuser preferring `preferred`.
    pub fn new(preferred: RangingTechnology) -> Self {
        PreferentialFuser {
            preferred,
            window_ms: PREFERENCE_WINDOW_MS,
            last_preferred: None,
        }
    }
}

impl Default for PreferentialFuser {
    fn default() -> Self {
        Self::new(RangingTechnology::Uwb)
    }
}

impl DataFuser for PreferentialFuser {
    fn fuse(&mut self, data: RangingData, active: &TechnologySet) -> Option<RangingData> {
        if data.technology == self.preferred {
            self.last_preferred = Some(data.clone());
            return Some(data);
        }
        if !active.contains(self.preferred) {
            self.last_preferred = None;
            return Some(data);
        }
        match &self.last_preferred {
            Some(preferred) if data.timestamp_ms.saturating_sub(preferred.timestamp_ms) <= self.window_ms => {
                // The preferred source dominates: re-emit its measurements at
                // the triggering input's timestamp.
                let mut out = preferred.clone();
                out.timestamp_ms = data.timestamp_ms;
                Some(out)
            }
            _ => Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Confidence, Measurement};

    fn data(technology: RangingTechnology, timestamp_ms: u64, distance: f64) -> RangingData {
        RangingData::distance_only(technology, timestamp_ms, Measurement::new(distance, Confidence::High))
    }

    fn uwb_and_rtt() -> TechnologySet {
        [RangingTechnology::Uwb, RangingTechnology::Rtt].into_iter().collect()
    }

    #[test]
    fn passthrough_forwards_everything() {
        let mut fuser = PassthroughFuser;
        let sample = data(RangingTechnology::Rtt, 5, 1.5);
        assert_eq!(fuser.fuse(sample.clone(), &uwb_and_rtt()), Some(sample));
    }

    #[test]
    fn preferential_uwb_dominates_within_window() {
        let mut fuser = PreferentialFuser::default();
        let active = uwb_and_rtt();

        let out = fuser.fuse(data(RangingTechnology::Uwb, 10, 2.0), &active).unwrap();
        assert_eq!(out.distance.value, 2.0);
        assert_eq!(out.timestamp_ms, 10);

        // An RTT reading two milliseconds later is overridden by the UWB
        // value but keeps its own timestamp.
        let out = fuser.fuse(data(RangingTechnology::Rtt, 12, 1.8), &active).unwrap();
        assert_eq!(out.distance.value, 2.0);
        assert_eq!(out.technology, RangingTechnology::Uwb);
        assert_eq!(out.timestamp_ms, 12);
    }

    #[test]
    fn preferential_falls_back_when_uwb_goes_quiet() {
        let mut fuser = PreferentialFuser::default();
        let active = uwb_and_rtt();
        fuser.fuse(data(RangingTechnology::Uwb, 10, 2.0), &active);
        let out = fuser
            .fuse(data(RangingTechnology::Rtt, 10 + PREFERENCE_WINDOW_MS + 1, 1.8), &active)
            .unwrap();
        assert_eq!(out.distance.value, 1.8);
        assert_eq!(out.technology, RangingTechnology::Rtt);
    }

    #[test]
    fn preferential_passes_through_after_uwb_removed() {
        let mut fuser = PreferentialFuser::default();
        fuser.fuse(data(RangingTechnology::Uwb, 10, 2.0), &uwb_and_rtt());
        let rtt_only: TechnologySet = [RangingTechnology::Rtt].into_iter().collect();
        let out = fuser.fuse(data(RangingTechnology::Rtt, 20, 1.8), &rtt_only).unwrap();
        assert_eq!(out.distance.value, 1.8);
        assert_eq!(out.technology, RangingTechnology::Rtt);
    }
}
