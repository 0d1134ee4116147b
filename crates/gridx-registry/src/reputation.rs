use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use gridx_core::constants::{REPUTATION_CEILING, REPUTATION_FLOOR};
use gridx_core::reputation::ReputationEventKind;

/// Applies typed reputation events to scores.
///
/// Score application is a pure function of `(current, delta)`; the only
/// mutable state is the rule table, guarded by its own lock. Application
/// reads a single rule under the lock and computes outside it.
pub struct ReputationEngine {
    rules: Mutex<HashMap<ReputationEventKind, f64>>,
}

impl ReputationEngine {
    pub fn new() -> Self {
        let rules = ReputationEventKind::ALL
            .iter()
            .map(|k| (*k, k.default_delta()))
            .collect();
        Self { rules: Mutex::new(rules) }
    }

    /// Apply `event` to `current`, clamping to [0, 100].
    ///
    /// `override_delta` bypasses the rule table for this application only.
    /// Returns the new score and whether clamping changed the result.
    pub fn apply(
        &self,
        current: f64,
        event: ReputationEventKind,
        override_delta: Option<f64>,
    ) -> (f64, bool) {
        let delta = override_delta.unwrap_or_else(|| self.delta_for(event));
        let raw = current + delta;
        let clamped = raw.clamp(REPUTATION_FLOOR, REPUTATION_CEILING);
        (clamped, clamped != raw)
    }

    fn delta_for(&self, event: ReputationEventKind) -> f64 {
        let rules = self.rules.lock().expect("reputation rules lock poisoned");
        rules.get(&event).copied().unwrap_or(0.0)
    }

    /// Snapshot of the current rule table, keyed by event name.
    pub fn rules_snapshot(&self) -> BTreeMap<String, f64> {
        let rules = self.rules.lock().expect("reputation rules lock poisoned");
        rules
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect()
    }

    /// Replace the delta for `event`.
    pub fn set_rule(&self, event: ReputationEventKind, delta: f64) {
        let mut rules = self.rules.lock().expect("reputation rules lock poisoned");
        rules.insert(event, delta);
    }

    /// Remove a rule: the event keeps existing but its delta becomes 0.
    pub fn remove_rule(&self, event: ReputationEventKind) {
        self.set_rule(event, 0.0);
    }
}

impl Default for ReputationEngine {
    fn default() -> Self {
        Self::new()
    }
}
