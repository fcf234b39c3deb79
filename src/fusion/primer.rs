//! Angle-of-arrival conditioning stages.
//!
//! Primers run ahead of the median-averaging filters on UWB data when the
//! session wants angle of arrival. Each primer may pass a sample through
//! (possibly rewritten) or suppress it; a suppressed sample never reaches the
//! filters or the fuser.

use tracing::trace;

use crate::fusion::filter::{normalize_degrees, wrapped_delta};
use crate::{Measurement, RangingData};

/// Half-angle of the antenna field of view, in degrees.
pub const FIELD_OF_VIEW_DEG: f64 = 60.0;
/// Azimuth angular velocity below which the target is assumed in front, in
/// degrees per second.
pub const FRONT_ANGULAR_VELOCITY_DPS: f64 = 2.0;
/// Azimuth angular velocity above which the reading is assumed a back-lobe
/// mirror, in degrees per second.
pub const BACK_ANGULAR_VELOCITY_DPS: f64 = 10.0;

// Mirror-score bounds: at or above HIGH the azimuth is unmirrored as a back
// reading, at or below LOW it is trusted as-is, in between the sample is
// masked.
const MIRROR_SCORE_HIGH: f64 = 0.75;
const MIRROR_SCORE_LOW: f64 = 0.25;
const MIRROR_SCORE_STEP: f64 = 0.25;

/// A conditioning stage for angle-bearing UWB samples.
pub trait Primer: Send {
    /// Passes, rewrites, or suppresses one sample.
    fn prime(&mut self, data: RangingData) -> Option<RangingData>;
}

/// Normalizes raw angle readings: azimuth wrapped to (−180°, 180°],
/// elevation clamped to [−90°, 90°].
#[derive(Debug, Default)]
pub struct AoaPrimer;

impl Primer for AoaPrimer {
    fn prime(&mut self, mut data: RangingData) -> Option<RangingData> {
        if let Some(azimuth) = &mut data.azimuth {
            if !azimuth.value.is_finite() {
                return None;
            }
            azimuth.value = normalize_degrees(azimuth.value);
        }
        if let Some(elevation) = &mut data.elevation {
            if !elevation.value.is_finite() {
                return None;
            }
            elevation.value = elevation.value.clamp(-90.0, 90.0);
        }
        Some(data)
    }
}

/// Suppresses samples whose azimuth falls outside the antenna field of view,
/// where angle readings degrade sharply.
#[derive(Debug)]
pub struct FovPrimer {
    half_angle_deg: f64,
}

impl FovPrimer {
    /// Creates a gate with the default field of view.
    pub fn new() -> Self {
        FovPrimer {
            half_angle_deg: FIELD_OF_VIEW_DEG,
        }
    }
}

impl Default for FovPrimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Primer for FovPrimer {
    fn prime(&mut self, data: RangingData) -> Option<RangingData> {
        match &data.azimuth {
            Some(azimuth) if azimuth.value.abs() > self.half_angle_deg => {
                trace!("azimuth {:.1}° outside field of view, sample suppressed", azimuth.value);
                None
            }
            _ => Some(data),
        }
    }
}

/// Resolves front/back ambiguity of folded azimuth readings.
///
/// UWB antennas report azimuth folded into the front half-plane; a target
/// behind the device produces a mirrored reading whose apparent angular
/// velocity is characteristically high. The primer integrates velocity
/// evidence into a mirror score: a score at the high bound rewrites the
/// azimuth as a back reading, a score at the low bound passes it through, and
/// the ambiguous middle masks the sample entirely.
#[derive(Debug)]
pub struct BackAzimuthPrimer {
    front_velocity_dps: f64,
    back_velocity_dps: f64,
    mirror_score: f64,
    last: Option<(f64, u64)>,
}

impl BackAzimuthPrimer {
    /// Creates a resolver with the given velocity thresholds.
    pub fn new(front_velocity_dps: f64, back_velocity_dps: f64) -> Self {
        BackAzimuthPrimer {
            front_velocity_dps,
            back_velocity_dps,
            mirror_score: 0.0,
            last: None,
        }
    }

    fn observe(&mut self, azimuth_deg: f64, timestamp_ms: u64) {
        if let Some((last_azimuth, last_ts)) = self.last {
            let dt_s = timestamp_ms.saturating_sub(last_ts) as f64 / 1000.0;
            if dt_s > 0.0 {
                let velocity = (wrapped_delta(azimuth_deg, last_azimuth) / dt_s).abs();
                if velocity >= self.back_velocity_dps {
                    self.mirror_score += MIRROR_SCORE_STEP;
                } else if velocity <= self.front_velocity_dps {
                    self.mirror_score -= MIRROR_SCORE_STEP;
                }
                self.mirror_score = self.mirror_score.clamp(0.0, 1.0);
            }
        }
        self.last = Some((azimuth_deg, timestamp_ms));
    }
}

impl Default for BackAzimuthPrimer {
    fn default() -> Self {
        Self::new(FRONT_ANGULAR_VELOCITY_DPS, BACK_ANGULAR_VELOCITY_DPS)
    }
}

impl Primer for BackAzimuthPrimer {
    fn prime(&mut self, mut data: RangingData) -> Option<RangingData> {
        let Some(Measurement { value: azimuth, .. }) = data.azimuth else {
            return Some(data);
        };
        self.observe(azimuth, data.timestamp_ms);
        if self.mirror_score >= MIRROR_SCORE_HIGH {
            if let Some(measurement) = &mut data.azimuth {
                measurement.value = normalize_degrees(180.0 - azimuth.abs()) * azimuth.signum();
            }
            Some(data)
        } else if self.mirror_score > MIRROR_SCORE_LOW {
            trace!("mirror score {:.2} ambiguous, sample masked", self.mirror_score);
            None
        } else {
            Some(data)
        }
    }
}
