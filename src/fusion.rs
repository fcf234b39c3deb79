//! Per-peer sensor fusion.
//!
//! Every peer in a session owns one fusion engine. Adapters feed raw
//! measurements in; the engine conditions and filters them per technology,
//! merges the streams through a [`DataFuser`], and emits at most one fused
//! result per input. The engine may drop samples but never reorders them:
//! emissions are monotonic in input timestamp.

pub mod filter;
pub mod fuser;
pub mod primer;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::fusion::filter::{
    MedianAveragingLinearFilter, MedianAveragingRotationFilter, ANGLE_WINDOW, DISTANCE_WINDOW,
};
use crate::fusion::fuser::DataFuser;
use crate::fusion::primer::{AoaPrimer, BackAzimuthPrimer, FovPrimer, Primer};
use crate::technology::{RangingTechnology, TechnologySet};
use crate::RangingData;

/// Receives fused measurements from a peer's engine.
pub trait FusionListener: Send + Sync {
    /// Called with each fused measurement, in input-timestamp order.
    fn on_fused_data(&self, data: RangingData);
}

impl<F: Fn(RangingData) + Send + Sync> FusionListener for F {
    fn on_fused_data(&self, data: RangingData) {
        self(data)
    }
}

/// A peer's measurement pipeline.
///
/// Lifecycle: [`start`](FusionEngine::start) arms the engine, data sources
/// come and go with the peer's active technologies, and
/// [`stop`](FusionEngine::stop) disposes every filter; no callbacks fire
/// after `stop`. Feeding a technology that was never added is a no-op.
pub trait FusionEngine: Send {
    /// Arms the engine with the listener fused results go to.
    fn start(&mut self, listener: Arc<dyn FusionListener>);

    /// Registers a technology, allocating its configured filter chain.
    /// Adding a technology twice is a no-op.
    fn add_data_source(&mut self, technology: RangingTechnology);

    /// Deregisters a technology and disposes its filter chain. Removing an
    /// absent technology is a no-op.
    fn remove_data_source(&mut self, technology: RangingTechnology);

    /// Runs one measurement through the pipeline, emitting zero or one fused
    /// result to the listener.
    fn feed(&mut self, data: RangingData);

    /// Disposes all filters. No further callbacks fire.
    fn stop(&mut self);
}

/// The filter stack in front of the fuser for one technology.
struct FilterChain {
    primers: Vec<Box<dyn Primer>>,
    azimuth: Option<MedianAveragingRotationFilter>,
    elevation: Option<MedianAveragingRotationFilter>,
    distance: MedianAveragingLinearFilter,
}

impl FilterChain {
    fn for_technology(technology: RangingTechnology, angle_of_arrival: bool) -> Self {
        if technology == RangingTechnology::Uwb && angle_of_arrival {
            FilterChain {
                primers: vec![
                    Box::new(AoaPrimer),
                    Box::new(FovPrimer::new()),
                    Box::new(BackAzimuthPrimer::default()),
                ],
                azimuth: Some(MedianAveragingRotationFilter::new(ANGLE_WINDOW)),
                elevation: Some(MedianAveragingRotationFilter::new(ANGLE_WINDOW)),
                distance: MedianAveragingLinearFilter::new(DISTANCE_WINDOW),
            }
        } else {
            FilterChain {
                primers: Vec::new(),
                azimuth: None,
                elevation: None,
                distance: MedianAveragingLinearFilter::new(DISTANCE_WINDOW),
            }
        }
    }

    fn apply(&mut self, mut data: RangingData) -> Option<RangingData> {
        for primer in &mut self.primers {
            data = primer.prime(data)?;
        }
        data.distance.value = self.distance.filter(data.distance.value)?;
        match &mut self.azimuth {
            Some(filter) => {
                if let Some(measurement) = &mut data.azimuth {
                    measurement.value = filter.filter(measurement.value)?;
                }
            }
            // Angles are only surfaced when the chain was configured for them.
            None => data.azimuth = None,
        }
        match &mut self.elevation {
            Some(filter) => {
                if let Some(measurement) = &mut data.elevation {
                    measurement.value = filter.filter(measurement.value)?;
                }
            }
            None => data.elevation = None,
        }
        Some(data)
    }
}

/// The full pipeline: per-technology filter chains feeding a [`DataFuser`].
pub struct FilteringFusionEngine {
    angle_of_arrival: bool,
    listener: Option<Arc<dyn FusionListener>>,
    sources: HashMap<RangingTechnology, FilterChain>,
    active: TechnologySet,
    fuser: Box<dyn DataFuser>,
    last_emitted_ms: Option<u64>,
}

impl FilteringFusionEngine {
    /// Creates an engine fusing through `fuser`. When `angle_of_arrival` is
    /// set, UWB sources get the full angle-conditioning chain.
    pub fn new(angle_of_arrival: bool, fuser: Box<dyn DataFuser>) -> Self {
        FilteringFusionEngine {
            angle_of_arrival,
            listener: None,
            sources: HashMap::new(),
            active: TechnologySet::new(),
            fuser,
            last_emitted_ms: None,
        }
    }
}

impl FusionEngine for FilteringFusionEngine {
    fn start(&mut self, listener: Arc<dyn FusionListener>) {
        self.listener = Some(listener);
    }

    fn add_data_source(&mut self, technology: RangingTechnology) {
        if self.active.insert(technology) {
            self.sources
                .insert(technology, FilterChain::for_technology(technology, self.angle_of_arrival));
        }
    }

    fn remove_data_source(&mut self, technology: RangingTechnology) {
        self.active.remove(technology);
        self.sources.remove(&technology);
    }

    fn feed(&mut self, data: RangingData) {
        let Some(listener) = self.listener.clone() else {
            return;
        };
        let Some(chain) = self.sources.get_mut(&data.technology) else {
            debug!("dropping {} data for an unregistered source", data.technology);
            return;
        };
        let Some(filtered) = chain.apply(data) else {
            return;
        };
        let Some(fused) = self.fuser.fuse(filtered, &self.active) else {
            return;
        };
        if self.last_emitted_ms.is_some_and(|last| fused.timestamp_ms < last) {
            return;
        }
        self.last_emitted_ms = Some(fused.timestamp_ms);
        listener.on_fused_data(fused);
    }

    fn stop(&mut self) {
        self.sources.clear();
        self.active = TechnologySet::new();
        self.listener = None;
    }
}

/// A pipeline that forwards measurements unfiltered.
///
/// Selected when the session disables sensor fusion; source bookkeeping and
/// ordering still apply, the data itself is untouched.
#[derive(Default)]
pub struct NoOpFusionEngine {
    listener: Option<Arc<dyn FusionListener>>,
    active: TechnologySet,
    last_emitted_ms: Option<u64>,
}

impl NoOpFusionEngine {
    /// Creates an engine that forwards everything.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FusionEngine for NoOpFusionEngine {
    fn start(&mut self, listener: Arc<dyn FusionListener>) {
        self.listener = Some(listener);
    }

    fn add_data_source(&mut self, technology: RangingTechnology) {
        self.active.insert(technology);
    }

    fn remove_data_source(&mut self, technology: RangingTechnology) {
        self.active.remove(technology);
    }

    fn feed(&mut self, data: RangingData) {
        let Some(listener) = self.listener.clone() else {
            return;
        };
        if !self.active.contains(data.technology) {
            debug!("dropping {} data for an unregistered source", data.technology);
            return;
        }
        if self.last_emitted_ms.is_some_and(|last| data.timestamp_ms < last) {
            return;
        }
        self.last_emitted_ms = Some(data.timestamp_ms);
        listener.on_fused_data(data);
    }

    fn stop(&mut self) {
        self.active = TechnologySet::new();
        self.listener = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::fuser::PreferentialFuser;
    use super::*;
    use crate::{Confidence, Measurement};

    struct Capture(Mutex<Vec<RangingData>>);

    impl FusionListener for Capture {
        fn on_fused_data(&self, data: RangingData) {
            self.0.lock().unwrap().push(data);
        }
    }

    fn data(technology: RangingTechnology, timestamp_ms: u64, distance: f64) -> RangingData {
        RangingData::distance_only(technology, timestamp_ms, Measurement::new(distance, Confidence::High))
    }

    fn started_engine(capture: &Arc<Capture>) -> FilteringFusionEngine {
        let mut engine = FilteringFusionEngine::new(false, Box::new(PreferentialFuser::default()));
        engine.start(capture.clone() as Arc<dyn FusionListener>);
        engine
    }

    #[test]
    fn uwb_preference_scenario() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = started_engine(&capture);
        engine.add_data_source(RangingTechnology::Uwb);
        engine.add_data_source(RangingTechnology::Rtt);

        engine.feed(data(RangingTechnology::Uwb, 10, 2.00));
        engine.feed(data(RangingTechnology::Rtt, 12, 1.80));

        {
            let emitted = capture.0.lock().unwrap();
            assert_eq!(emitted.len(), 2);
            assert_eq!(emitted[0].distance.value, 2.00);
            assert_eq!(emitted[0].timestamp_ms, 10);
            // UWB dominates within the preference window.
            assert_eq!(emitted[1].distance.value, 2.00);
            assert_eq!(emitted[1].timestamp_ms, 12);
        }

        // Once UWB stops, RTT passes through.
        engine.remove_data_source(RangingTechnology::Uwb);
        engine.feed(data(RangingTechnology::Rtt, 20, 1.80));
        let emitted = capture.0.lock().unwrap();
        assert_eq!(emitted[2].distance.value, 1.80);
        assert_eq!(emitted[2].technology, RangingTechnology::Rtt);
    }

    #[test]
    fn unregistered_technology_is_a_no_op() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = started_engine(&capture);
        engine.add_data_source(RangingTechnology::Uwb);
        engine.feed(data(RangingTechnology::Rtt, 5, 1.0));
        assert!(capture.0.lock().unwrap().is_empty());
    }

    #[test]
    fn out_of_order_fused_results_are_dropped() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = started_engine(&capture);
        engine.add_data_source(RangingTechnology::Uwb);
        engine.feed(data(RangingTechnology::Uwb, 100, 2.0));
        engine.feed(data(RangingTechnology::Uwb, 90, 2.1));
        engine.feed(data(RangingTechnology::Uwb, 110, 2.2));
        let emitted = capture.0.lock().unwrap();
        let times: Vec<u64> = emitted.iter().map(|d| d.timestamp_ms).collect();
        assert_eq!(times, [100, 110]);
    }

    #[test]
    fn suppressed_samples_emit_nothing() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = started_engine(&capture);
        engine.add_data_source(RangingTechnology::Uwb);
        engine.feed(data(RangingTechnology::Uwb, 5, f64::NAN));
        assert!(capture.0.lock().unwrap().is_empty());
    }

    #[test]
    fn nothing_emitted_after_stop() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = started_engine(&capture);
        engine.add_data_source(RangingTechnology::Uwb);
        engine.stop();
        engine.feed(data(RangingTechnology::Uwb, 5, 2.0));
        assert!(capture.0.lock().unwrap().is_empty());
    }

    #[test]
    fn angles_stripped_without_aoa_chain() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = started_engine(&capture);
        engine.add_data_source(RangingTechnology::Uwb);
        let mut sample = data(RangingTechnology::Uwb, 5, 2.0);
        sample.azimuth = Some(Measurement::new(10.0, Confidence::Low));
        engine.feed(sample);
        let emitted = capture.0.lock().unwrap();
        assert!(emitted[0].azimuth.is_none());
    }

    #[test]
    fn aoa_chain_filters_angles() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = FilteringFusionEngine::new(true, Box::new(PreferentialFuser::default()));
        engine.start(capture.clone() as Arc<dyn FusionListener>);
        engine.add_data_source(RangingTechnology::Uwb);
        let mut sample = data(RangingTechnology::Uwb, 5, 2.0);
        sample.azimuth = Some(Measurement::new(15.0, Confidence::Medium));
        sample.elevation = Some(Measurement::new(-5.0, Confidence::Medium));
        engine.feed(sample);
        let emitted = capture.0.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].azimuth.unwrap().value, 15.0);
        assert_eq!(emitted[0].elevation.unwrap().value, -5.0);
        assert_eq!(emitted[0].azimuth.unwrap().confidence, Confidence::Medium);
    }

    #[test]
    fn noop_engine_forwards_unfiltered() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut engine = NoOpFusionEngine::new();
        engine.start(capture.clone() as Arc<dyn FusionListener>);
        engine.add_data_source(RangingTechnology::Rssi);
        engine.feed(data(RangingTechnology::Rssi, 7, 3.25));
        engine.feed(data(RangingTechnology::Uwb, 8, 1.0)); // unregistered
        let emitted = capture.0.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].distance.value, 3.25);
    }
}
