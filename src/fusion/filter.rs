//! Median-averaging sample filters.
//!
//! Both filters keep a short window of recent samples and output the mean of
//! the samples that lie close to the window median, so a single spurious
//! reading moves the output very little. The window warms up immediately: the
//! first sample produces output (a window of one is its own median).

use std::collections::VecDeque;

/// Window length for distance filtering.
pub const DISTANCE_WINDOW: usize = 3;
/// Window length for angle filtering.
pub const ANGLE_WINDOW: usize = 5;
/// Fraction of the reference span a sample may deviate from the window
/// median and still count as an inlier.
pub const INLIER_FACTOR: f64 = 0.50;

// Span against which the angular inlier band is scaled (a quarter turn).
const ANGLE_REFERENCE_SPAN_DEG: f64 = 90.0;

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn mean_of_inliers(samples: &[f64], center: f64, band: f64) -> f64 {
    let inliers: Vec<f64> = samples.iter().copied().filter(|s| (s - center).abs() <= band).collect();
    if inliers.is_empty() {
        // The median itself always lies in the band for odd windows; an even
        // window can leave it empty, in which case the median stands.
        center
    } else {
        inliers.iter().sum::<f64>() / inliers.len() as f64
    }
}

/// Median-averaging filter over a scalar quantity such as distance.
#[derive(Debug)]
pub struct MedianAveragingLinearFilter {
    window: VecDeque<f64>,
    capacity: usize,
}

impl MedianAveragingLinearFilter {
    /// Creates a filter with the given window length.
    pub fn new(capacity: usize) -> Self {
        MedianAveragingLinearFilter {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a sample and returns the filtered value, or `None` to suppress
    /// the sample.
    pub fn filter(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let med = median(&sorted);
        Some(mean_of_inliers(&sorted, med, INLIER_FACTOR * med.abs()))
    }
}

/// Median-averaging filter over an angle in degrees, wrap-around aware.
///
/// Samples are unwrapped relative to the newest reading before the median and
/// average are taken, so a window straddling the ±180° seam behaves the same
/// as one near 0°. Output is normalized to (−180°, 180°].
#[derive(Debug)]
pub struct MedianAveragingRotationFilter {
    window: VecDeque<f64>,
    capacity: usize,
}

impl MedianAveragingRotationFilter {
    /// Creates a filter with the given window length.
    pub fn new(capacity: usize) -> Self {
        MedianAveragingRotationFilter {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a sample in degrees and returns the filtered angle, or `None`
    /// to suppress the sample.
    pub fn filter(&mut self, degrees: f64) -> Option<f64> {
        if !degrees.is_finite() {
            return None;
        }
        let reference = normalize_degrees(degrees);
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(reference);
        let mut unwrapped: Vec<f64> = self
            .window
            .iter()
            .map(|&a| reference + wrapped_delta(a, reference))
            .collect();
        unwrapped.sort_by(|a, b| a.total_cmp(b));
        let med = median(&unwrapped);
        let band = INLIER_FACTOR * ANGLE_REFERENCE_SPAN_DEG;
        Some(normalize_degrees(mean_of_inliers(&unwrapped, med, band)))
    }
}

/// Normalizes an angle to (−180°, 180°].
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Shortest signed rotation taking `from` to `to`, in (−180°, 180°].
pub fn wrapped_delta(to: f64, from: f64) -> f64 {
    normalize_degrees(to - from)
}
