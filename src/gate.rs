//! The per-session data-notification gate.
//!
//! Every fresh measurement passes through a [`NotificationGate`] before it is
//! surfaced to the session listener. The gate applies the session's
//! [`NotificationConfig`], switching to a suppress-everything policy while the
//! app is backgrounded and restoring the client's policy on foreground.

use crate::config::{NotificationConfig, NotificationKind};

/// Which side of the proximity band a distance falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProximityZone {
    /// At or under the near edge
    Near,
    /// Strictly between the edges
    Inside,
    /// At or over the far edge
    Far,
}

/// Decides whether a fresh measurement should be surfaced.
///
/// For the proximity-edge kind the gate is a small hysteresis machine: it
/// remembers which zone of the band the last sample fell in and emits only
/// samples that land outside the strict band in a different zone than before.
/// Foreground/background transitions re-arm the gate, so the first
/// out-of-band sample after a transition always emits.
#[derive(Debug, Clone)]
pub struct NotificationGate {
    initial: NotificationConfig,
    current: NotificationConfig,
    last_zone: Option<ProximityZone>,
}

impl NotificationGate {
    /// Creates a gate applying `config`, armed.
    pub fn new(config: NotificationConfig) -> Self {
        NotificationGate {
            initial: config,
            current: config,
            last_zone: None,
        }
    }

    /// Switches to the suppress-everything background policy and re-arms.
    pub fn app_to_background(&mut self) {
        self.current = NotificationConfig::disable();
        self.last_zone = None;
    }

    /// Restores the client's policy and re-arms.
    pub fn app_to_foreground(&mut self) {
        self.current = self.initial;
        self.last_zone = None;
    }

    /// Whether the gate is armed (no zone observed since the last re-arm).
    pub fn edge_armed(&self) -> bool {
        self.last_zone.is_none()
    }

    /// Decides whether a measurement at `distance_m` meters should be surfaced.
    pub fn should_emit(&mut self, distance_m: f64) -> bool {
        let near_m = f64::from(self.current.near_cm()) / 100.0;
        let far_m = f64::from(self.current.far_cm()) / 100.0;
        match self.current.kind() {
            NotificationKind::Disable => false,
            NotificationKind::Enable => true,
            NotificationKind::ProximityLevel => (near_m..=far_m).contains(&distance_m),
            NotificationKind::ProximityEdge => {
                let zone = if distance_m <= near_m {
                    ProximityZone::Near
                } else if distance_m >= far_m {
                    ProximityZone::Far
                } else {
                    ProximityZone::Inside
                };
                let crossed = self.last_zone != Some(zone);
                self.last_zone = Some(zone);
                crossed && zone != ProximityZone::Inside
            }
        }
    }
}
