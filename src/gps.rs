//! The GPS side: where the receiver says we are.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::{
    nmea::{self, Decoded},
    supervisor::LineHandler,
};

/// A position in signed decimal degrees.
/// South and west are negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude, within `[-90, 90]`.
    pub lat: f64,

    /// Longitude, within `[-180, 180]`.
    pub lng: f64,
}

impl LocationFix {
    /// What the cache holds before any fix arrives.
    pub const SENTINEL: Self = Self { lat: 0.0, lng: 0.0 };

    /// A fixed location, for showing something on a map without a receiver.
    pub const DEMO: Self = Self {
        lat: -13.0,
        lng: -72.0,
    };

    /// A fix, if the coordinates are in range.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let lat_ok = (-90.0..=90.0).contains(&lat);
        let lng_ok = (-180.0..=180.0).contains(&lng);

        (lat_ok && lng_ok).then_some(Self { lat, lng })
    }
}

/// Holds the most recent fix.
///
/// Clones share the same slot.
/// There is no history: a new fix replaces the old one.
#[derive(Debug, Clone)]
pub struct LocationCache {
    slot: Arc<watch::Sender<LocationFix>>,
}

impl Default for LocationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationCache {
    /// A cache holding [`LocationFix::SENTINEL`].
    pub fn new() -> Self {
        let (slot, _) = watch::channel(LocationFix::SENTINEL);

        Self {
            slot: Arc::new(slot),
        }
    }

    /// The most recent fix.
    pub fn get(&self) -> LocationFix {
        *self.slot.borrow()
    }

    /// Replace the fix.
    pub fn set(&self, fix: LocationFix) {
        self.slot.send_replace(fix);
    }

    /// Get notified of new fixes.
    pub fn subscribe(&self) -> watch::Receiver<LocationFix> {
        self.slot.subscribe()
    }
}

/// Feeds lines from a bound receiver into a [`LocationCache`].
#[derive(Debug, Clone)]
pub struct NmeaFeed {
    cache: LocationCache,
}

impl NmeaFeed {
    /// A feed updating the given cache.
    pub fn new(cache: LocationCache) -> Self {
        Self { cache }
    }
}

impl LineHandler for NmeaFeed {
    fn on_line(&mut self, line: &str) {
        match nmea::decode(line) {
            Decoded::Fix(fix) => {
                debug!(%fix.lat, %fix.lng, "Fix");
                self.cache.set(fix);
            }
            Decoded::Ignored(reason) => {
                trace!(%reason, %line, "Ignored");
            }
        }
    }
}
