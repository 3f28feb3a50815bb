use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Per-key debounce for alert emission.
///
/// A key that emitted within the cooldown window is suppressed; there is no
/// burst allowance.
#[derive(Debug, Clone)]
pub struct AlertThrottle {
    cooldown: Duration,
    last_emitted: HashMap<String, DateTime<Utc>>,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_emitted: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn should_emit(&mut self, key: &str) -> bool {
        self.should_emit_at(key, Utc::now())
    }

    /// Returns true and records `now` unless `key` emitted less than one
    /// cooldown before `now`. Suppressed calls leave the state untouched.
    pub fn should_emit_at(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_emitted.get(key) {
            if now.signed_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        self.last_emitted.insert(key.to_string(), now);
        true
    }

    /// Drop keys whose cooldown has long expired
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        self.last_emitted
            .retain(|_, last| now.signed_duration_since(*last) < cooldown);
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }
}

impl Default for AlertThrottle {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}
