//! UWB parameter selection.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

use crate::config::{SecurityLevel, TechnologyConfig, TechnologyParams, UwbConfigId, UwbRangingParams};
use crate::capabilities::UwbCapabilities;
use crate::device::{RangingDevice, UwbAddress};
use crate::oob::message::{CapabilityResponseMessage, UwbOobCapabilities, UwbOobConfig};
use crate::selector::{ConfigSelector, OobConfigBlock, SelectorOutput, UwbUserParams};
use crate::technology::RangingTechnology;
use crate::{DeviceRole, Error, ErrorKind, Result};

/// Ranging interval of the frequent tier, in milliseconds.
pub const FREQUENT_INTERVAL_MS: u16 = 120;
/// Ranging interval of the normal tier, in milliseconds.
pub const NORMAL_INTERVAL_MS: u16 = 240;
/// Ranging interval of the infrequent tier, in milliseconds.
pub const INFREQUENT_INTERVAL_MS: u16 = 600;
/// Frequent-tier interval when the very-fast profile is in effect.
pub const VERY_FAST_INTERVAL_MS: u16 = 96;

// HPRF preamble code indexes, preferred for range and accuracy.
const HPRF_PREAMBLE_RANGE: std::ops::RangeInclusive<u8> = 25..=32;
// Channel preference order.
const CHANNEL_PREFERENCE: [u8; 2] = [9, 5];

/// Session key lengths by security level.
const BASIC_KEY_LEN: usize = 8;
const SECURE_KEY_LEN: usize = 16;

/// Narrows UWB parameters across the local device and every peer.
///
/// Every accepted peer gets its own unicast session in which the local
/// device is the UWB initiator and controller; all sessions share the same
/// negotiated channel, preamble, interval, key, and local address.
pub struct UwbSelector {
    params: UwbUserParams,
    local: UwbCapabilities,
    rng: StdRng,
    peers: HashMap<RangingDevice, UwbOobCapabilities>,
}

impl UwbSelector {
    /// Validates that the local controller can satisfy `params` at all.
    pub fn new(params: UwbUserParams, local: UwbCapabilities, rng: StdRng) -> Result<Self> {
        if params.fastest_interval_ms > params.slowest_interval_ms {
            return Err(Error::new(
                ErrorKind::InvalidParameters,
                "fastest interval is slower than the slowest",
            ));
        }
        if !local.supported_roles.contains(&DeviceRole::Initiator) {
            return Err(Error::new(ErrorKind::Unsupported, "local uwb cannot initiate"));
        }
        if !CHANNEL_PREFERENCE.iter().any(|c| local.supported_channels.contains(c)) {
            return Err(Error::new(ErrorKind::Unsupported, "local uwb supports no usable channel"));
        }
        if local.supported_preamble_indexes.is_empty() {
            return Err(Error::new(ErrorKind::Unsupported, "local uwb reports no preamble indexes"));
        }
        if config_id_preference(params.security_level)
            .iter()
            .all(|id| !local.supported_config_ids.contains(id))
        {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "local uwb supports no config profile for the requested security level",
            ));
        }
        Ok(UwbSelector {
            params,
            local,
            rng,
            peers: HashMap::new(),
        })
    }

    /// Whether `caps` is compatible with the local device on every axis.
    fn check_peer(&self, caps: &UwbOobCapabilities) -> Result<()> {
        if !CHANNEL_PREFERENCE
            .iter()
            .any(|c| self.local.supported_channels.contains(c) && caps.supported_channels.contains(c))
        {
            return Err(mismatch("no common uwb channel"));
        }
        if self
            .local
            .supported_preamble_indexes
            .intersection(&caps.supported_preamble_indexes)
            .next()
            .is_none()
        {
            return Err(mismatch("no common preamble index"));
        }
        if config_id_preference(self.params.security_level)
            .iter()
            .all(|id| !(self.local.supported_config_ids.contains(id) && caps.supported_config_ids.contains(id)))
        {
            return Err(mismatch("no common config profile for the security level"));
        }
        if !caps.supported_roles.contains(&DeviceRole::Responder) {
            return Err(mismatch("peer cannot respond"));
        }
        if self.params.slowest_interval_ms < caps.min_ranging_interval_ms
            && self.params.slowest_interval_ms < INFREQUENT_INTERVAL_MS
        {
            return Err(mismatch("peer cannot range as fast as the user demands"));
        }
        Ok(())
    }
}

impl ConfigSelector for UwbSelector {
    fn technology(&self) -> RangingTechnology {
        RangingTechnology::Uwb
    }

    fn add_peer_capabilities(&mut self, peer: RangingDevice, response: &CapabilityResponseMessage) {
        if let Some(caps) = &response.uwb {
            self.peers.insert(peer, caps.clone());
        }
    }

    fn has_peers_to_configure(&self) -> bool {
        !self.peers.is_empty()
    }

    fn select(&mut self) -> Result<SelectorOutput> {
        let mut output = SelectorOutput::default();

        // Pass 1: drop peers individually incompatible with the local device.
        let mut survivors: Vec<(RangingDevice, UwbOobCapabilities)> = Vec::new();
        let drained: Vec<(RangingDevice, UwbOobCapabilities)> = self.peers.drain().collect();
        for (peer, caps) in drained {
            match self.check_peer(&caps) {
                Ok(()) => survivors.push((peer, caps)),
                Err(e) => output.rejected.push((peer, e)),
            }
        }
        if survivors.is_empty() {
            return Ok(output);
        }
        // Deterministic negotiation order regardless of map iteration.
        survivors.sort_by_key(|(peer, _)| *peer);

        // Pass 2: intersect the survivors. Mutually incompatible survivor
        // sets reject everyone.
        let mut channels = self.local.supported_channels.clone();
        let mut preambles = self.local.supported_preamble_indexes.clone();
        let mut config_ids: BTreeSet<UwbConfigId> = config_id_preference(self.params.security_level)
            .iter()
            .copied()
            .filter(|id| self.local.supported_config_ids.contains(id))
            .collect();
        let mut min_interval = self.local.min_ranging_interval_ms;
        let mut slot_duration = self.local.min_slot_duration_ms.max(1);
        for (_, caps) in &survivors {
            channels = channels.intersection(&caps.supported_channels).copied().collect();
            preambles = preambles.intersection(&caps.supported_preamble_indexes).copied().collect();
            config_ids = config_ids.intersection(&caps.supported_config_ids).copied().collect();
            min_interval = min_interval.max(caps.min_ranging_interval_ms);
            slot_duration = slot_duration.max(caps.min_slot_duration_ms);
        }

        let selection = (|| {
            let channel = CHANNEL_PREFERENCE
                .iter()
                .copied()
                .find(|c| channels.contains(c))
                .ok_or_else(|| mismatch("no channel common to all peers"))?;
            let config_id = config_id_preference(self.params.security_level)
                .iter()
                .copied()
                .find(|id| config_ids.contains(id))
                .ok_or_else(|| mismatch("no config profile common to all peers"))?;
            let preamble_index = self.pick_preamble(&preambles)?;
            let interval = self.pick_interval(config_id, min_interval)?;
            Ok::<_, Error>((channel, config_id, preamble_index, interval))
        })();
        let (channel, config_id, preamble_index, interval) = match selection {
            Ok(selection) => selection,
            Err(e) => {
                output.rejected.extend(survivors.into_iter().map(|(peer, _)| (peer, e.clone())));
                return Ok(output);
            }
        };

        let key_len = match self.params.security_level {
            SecurityLevel::Basic => BASIC_KEY_LEN,
            SecurityLevel::Secure => SECURE_KEY_LEN,
        };
        let mut session_key = vec![0u8; key_len];
        self.rng.fill_bytes(&mut session_key);
        let session_id: u32 = self.rng.gen();
        let local_address = UwbAddress::random(&mut self.rng);

        for (peer, caps) in survivors {
            let params = UwbRangingParams {
                session_id,
                config_id,
                channel,
                preamble_index,
                ranging_interval_ms: interval,
                slot_duration_ms: slot_duration,
                session_key: session_key.clone(),
                local_address,
                peer_address: caps.address,
                country_code: self.local.country_code,
                device_mode: crate::config::UwbDeviceMode::Controller,
            };
            let local_config = TechnologyConfig::Unicast {
                role: DeviceRole::Initiator,
                peer,
                params: TechnologyParams::Uwb(params),
            };
            let oob = UwbOobConfig {
                sender_address: local_address,
                session_id,
                config_id,
                channel,
                preamble_index,
                ranging_interval_ms: interval,
                slot_duration_ms: slot_duration,
                session_key: session_key.clone(),
                country_code: self.local.country_code,
                device_role: DeviceRole::Responder,
                device_mode: crate::config::UwbDeviceMode::Controlee,
            };
            output.configs.push((peer, local_config, OobConfigBlock::Uwb(oob)));
        }
        Ok(output)
    }
}

impl UwbSelector {
    /// Prefers any HPRF index from the intersection, otherwise draws
    /// uniformly from it.
    fn pick_preamble(&mut self, preambles: &BTreeSet<u8>) -> Result<u8> {
        let hprf: Vec<u8> = preambles.iter().copied().filter(|p| HPRF_PREAMBLE_RANGE.contains(p)).collect();
        let candidates: Vec<u8> = if hprf.is_empty() {
            preambles.iter().copied().collect()
        } else {
            hprf
        };
        candidates
            .choose(&mut self.rng)
            .copied()
            .ok_or_else(|| mismatch("no preamble index common to all peers"))
    }

    /// Picks the fastest cadence tier whose interval satisfies the user's
    /// range and every participant's minimum.
    fn pick_interval(&self, config_id: UwbConfigId, participants_min: u16) -> Result<u16> {
        let frequent = if config_id == UwbConfigId::ProvisionedUnicastDsTwrVeryFast {
            VERY_FAST_INTERVAL_MS
        } else {
            FREQUENT_INTERVAL_MS
        };
        let tiers = [frequent, NORMAL_INTERVAL_MS, INFREQUENT_INTERVAL_MS];
        let lower = participants_min.max(frequent);
        let upper = INFREQUENT_INTERVAL_MS;

        // A user who only accepts intervals slower than the hardware offers
        // gets the infrequent tier rather than a failure.
        if self.params.fastest_interval_ms > upper {
            return Ok(INFREQUENT_INTERVAL_MS);
        }
        tiers
            .into_iter()
            .find(|t| {
                (lower..=upper).contains(t)
                    && (self.params.fastest_interval_ms..=self.params.slowest_interval_ms).contains(t)
            })
            .ok_or_else(|| mismatch("no cadence tier fits the interval constraints"))
    }
}

fn config_id_preference(level: SecurityLevel) -> &'static [UwbConfigId] {
    match level {
        SecurityLevel::Basic => &[UwbConfigId::UnicastDsTwr],
        SecurityLevel::Secure => &[
            UwbConfigId::ProvisionedUnicastDsTwrVeryFast,
            UwbConfigId::ProvisionedUnicastDsTwr,
        ],
    }
}

fn mismatch(message: &str) -> Error {
    Error::new(ErrorKind::PeerCapabilitiesMismatch, message)
}
