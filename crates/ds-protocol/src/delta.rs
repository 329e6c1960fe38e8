//! Per-subscriber delta computation.
//!
//! A `DeltaTracker` remembers the last document delivered for each
//! (device, facet) pair and turns full shadows into deltas against it.
//! It belongs to one streaming session and is dropped with it.

use std::collections::HashMap;

use crate::document::{self, Document};
use crate::shadow::{Shadow, State, StateKey};

/// What one facet of an incoming shadow turned out to be.
enum Observed {
    Absent,
    /// Older than what was already delivered; carries the delivered state.
    Stale(State),
    Fresh { full: State, delta: Option<Document> },
}

#[derive(Debug, Default)]
pub struct DeltaTracker {
    last: HashMap<(String, StateKey), State>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shadow as already known without delivering it.
    ///
    /// Used when a delta stream starts without a sync: later items diff
    /// against this instead of against nothing.
    pub fn seed(&mut self, shadow: Shadow) {
        for (key, state) in [
            (StateKey::Reported, shadow.reported),
            (StateKey::Desired, shadow.desired),
        ] {
            let Some(state) = state else { continue };
            let slot = (shadow.device.clone(), key);
            let newer_known = self
                .last
                .get(&slot)
                .is_some_and(|prev| prev.timestamp > state.timestamp);
            if !newer_known {
                self.last.insert(slot, state);
            }
        }
    }

    /// Record a full shadow and return what should be delivered.
    ///
    /// With `only_delta` each facet carries just the keys changed since the
    /// last delivery for that device; unchanged or out-of-order facets
    /// become absent and a shadow with nothing left is suppressed. Without
    /// it the full shadow is passed through, an out-of-order facet is
    /// replaced by the state already delivered, and an item with nothing
    /// newer is suppressed.
    pub fn observe(&mut self, shadow: Shadow, only_delta: bool) -> Option<Shadow> {
        let device = shadow.device;
        let reported = self.observe_facet(&device, StateKey::Reported, shadow.reported);
        let desired = self.observe_facet(&device, StateKey::Desired, shadow.desired);

        if only_delta {
            let reported = delta_of(reported);
            let desired = delta_of(desired);
            if reported.is_none() && desired.is_none() {
                return None;
            }
            return Some(Shadow {
                device,
                reported,
                desired,
            });
        }

        let fresh = |o: &Observed| matches!(o, Observed::Fresh { .. });
        if !fresh(&reported) && !fresh(&desired) {
            let stale = |o: &Observed| matches!(o, Observed::Stale(_));
            // Full mode still reports devices that have no state at all.
            if stale(&reported) || stale(&desired) || self.knows(&device) {
                return None;
            }
        }

        Some(Shadow {
            device,
            reported: full_of(reported),
            desired: full_of(desired),
        })
    }

    fn observe_facet(&mut self, device: &str, key: StateKey, incoming: Option<State>) -> Observed {
        let Some(state) = incoming else {
            return Observed::Absent;
        };
        let slot = (device.to_string(), key);
        let previous = self.last.get(&slot);

        if let Some(prev) = previous
            && state.timestamp < prev.timestamp
        {
            tracing::debug!(
                device_id = device,
                state_key = %key,
                "dropping out-of-order state"
            );
            return Observed::Stale(prev.clone());
        }

        let delta = document::diff(previous.map(|p| &p.data), &state.data);
        self.last.insert(slot, state.clone());
        Observed::Fresh { full: state, delta }
    }

    fn knows(&self, device: &str) -> bool {
        self.last.keys().any(|(d, _)| d == device)
    }
}

fn delta_of(observed: Observed) -> Option<State> {
    match observed {
        Observed::Fresh {
            full,
            delta: Some(data),
        } => Some(State {
            data,
            timestamp: full.timestamp,
        }),
        _ => None,
    }
}

fn full_of(observed: Observed) -> Option<State> {
    match observed {
        Observed::Fresh { full, .. } => Some(full),
        Observed::Stale(delivered) => Some(delivered),
        Observed::Absent => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    fn shadow_at(device: &str, desired: Document, ts: DateTime<Utc>) -> Shadow {
        Shadow {
            device: device.into(),
            reported: None,
            desired: Some(State {
                data: desired,
                timestamp: ts,
            }),
        }
    }

    #[test]
    fn first_delivery_is_full_document() {
        let mut tracker = DeltaTracker::new();
        let now = Utc::now();
        let out = tracker
            .observe(shadow_at("a", json!({"temp": 20}), now), true)
            .unwrap();
        assert_eq!(out.desired.unwrap().data, json!({"temp": 20}));
    }

    #[test]
    fn later_deliveries_carry_only_changes() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        tracker.observe(shadow_at("a", json!({"temp": 20, "fan": "off"}), t0), true);

        let t1 = t0 + Duration::seconds(1);
        let out = tracker
            .observe(shadow_at("a", json!({"temp": 20, "fan": "on"}), t1), true)
            .unwrap();
        assert_eq!(out.desired.unwrap().data, json!({"fan": "on"}));
    }

    #[test]
    fn removed_keys_are_null() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        tracker.observe(shadow_at("a", json!({"temp": 20, "fan": "on"}), t0), true);
        let t1 = t0 + Duration::seconds(1);
        let out = tracker
            .observe(shadow_at("a", json!({"fan": "on"}), t1), true)
            .unwrap();
        assert_eq!(out.desired.unwrap().data, json!({"temp": null}));
    }

    #[test]
    fn unchanged_shadow_is_suppressed() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        tracker.observe(shadow_at("a", json!({"temp": 20}), t0), true);
        let t1 = t0 + Duration::seconds(1);
        let out = tracker.observe(shadow_at("a", json!({"temp": 20}), t1), true);
        assert!(out.is_none());
    }

    #[test]
    fn devices_are_tracked_independently() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        tracker.observe(shadow_at("a", json!({"temp": 20}), t0), true);
        let out = tracker
            .observe(shadow_at("b", json!({"temp": 20}), t0), true)
            .unwrap();
        assert_eq!(out.device, "b");
        assert_eq!(out.desired.unwrap().data, json!({"temp": 20}));
    }

    #[test]
    fn stale_state_is_dropped() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        tracker.observe(shadow_at("a", json!({"temp": 21}), t0), false);
        let stale = t0 - Duration::seconds(5);
        let out = tracker.observe(shadow_at("a", json!({"temp": 20}), stale), false);
        assert!(out.is_none());
    }

    #[test]
    fn full_mode_passes_documents_through() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        tracker.observe(shadow_at("a", json!({"temp": 20, "fan": "off"}), t0), false);
        let t1 = t0 + Duration::seconds(1);
        let out = tracker
            .observe(shadow_at("a", json!({"temp": 20, "fan": "on"}), t1), false)
            .unwrap();
        assert_eq!(out.desired.unwrap().data, json!({"temp": 20, "fan": "on"}));
    }

    #[test]
    fn absent_device_only_surfaces_in_full_mode() {
        let mut tracker = DeltaTracker::new();
        let out = tracker.observe(Shadow::absent("ghost"), false).unwrap();
        assert!(out.is_absent());
        assert!(tracker.observe(Shadow::absent("ghost"), true).is_none());
    }

    #[test]
    fn seeded_state_is_not_redelivered_in_delta_mode() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        let mut known = shadow_at("a", json!({"temp": 20}), t0);
        known.reported = Some(State {
            data: json!({"up": true}),
            timestamp: t0,
        });
        tracker.seed(known.clone());

        // A desired-only change arrives with the unchanged reported facet.
        let t1 = t0 + Duration::seconds(1);
        let mut next = shadow_at("a", json!({"temp": 20, "fan": "on"}), t1);
        next.reported = known.reported.clone();
        let out = tracker.observe(next, true).unwrap();
        assert_eq!(out.desired.unwrap().data, json!({"fan": "on"}));
        assert!(out.reported.is_none());
    }

    #[test]
    fn seed_keeps_newer_delivered_state() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        tracker.observe(shadow_at("a", json!({"temp": 21}), t0), true);
        tracker.seed(shadow_at("a", json!({"temp": 5}), t0 - Duration::seconds(5)));

        let t1 = t0 + Duration::seconds(1);
        let out = tracker
            .observe(shadow_at("a", json!({"temp": 21, "fan": "on"}), t1), true)
            .unwrap();
        assert_eq!(out.desired.unwrap().data, json!({"fan": "on"}));
    }

    #[test]
    fn full_mode_keeps_delivered_state_for_stale_facet() {
        let mut tracker = DeltaTracker::new();
        let t0 = Utc::now();
        let delivered = shadow_at("a", json!({"temp": 21}), t0);
        tracker.observe(delivered.clone(), false);

        // Reported is new, desired is older than what was delivered.
        let mut mixed = shadow_at("a", json!({"temp": 20}), t0 - Duration::seconds(5));
        mixed.reported = Some(State {
            data: json!({"up": true}),
            timestamp: t0 + Duration::seconds(1),
        });
        let out = tracker.observe(mixed, false).unwrap();
        assert_eq!(out.reported.unwrap().data, json!({"up": true}));
        assert_eq!(out.desired, delivered.desired);
    }
}
