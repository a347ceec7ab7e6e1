/*!
 * Per-function attribute cache.
 *
 * A cache holds the decoded values from the last bulk load of one function
 * and a single expiration instant shared by all its timed attributes.
 * Expiration uses tokio's monotonic clock so it can be driven by paused time.
 */
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use hublink_core::types::Value;

use crate::schema::{AttributeSpec, CachePolicy};

/// Decoded attribute values plus their shared expiration
#[derive(Debug, Clone)]
pub struct AttributeCache {
    values: HashMap<&'static str, Value>,
    expiration: Option<Instant>,
    validity: Duration,
}

impl AttributeCache {
    /// Create an empty cache that keeps loads for `validity`
    pub fn new(validity: Duration) -> Self {
        Self {
            values: HashMap::new(),
            expiration: None,
            validity,
        }
    }

    /// The validity window applied to the next load
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Change the validity window; takes effect at the next load
    pub fn set_validity(&mut self, validity: Duration) {
        self.validity = validity;
    }

    /// When timed attributes expire, if they were ever loaded
    pub fn expiration(&self) -> Option<Instant> {
        self.expiration
    }

    /// Whether timed attributes must be reloaded at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expiration {
            Some(expiration) => now >= expiration,
            None => true,
        }
    }

    /// Whether reading `spec` at `now` requires a load first
    pub fn needs_load(&self, spec: &AttributeSpec, now: Instant) -> bool {
        match spec.policy {
            CachePolicy::Timed => self.is_expired(now),
            CachePolicy::Lazy => !self.values.contains_key(spec.name),
            CachePolicy::Immediate => true,
        }
    }

    /// The cached value of an attribute
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Store the result of a bulk load and restart the expiration window
    ///
    /// Returns the previous value of every attribute that changed.
    pub fn update<I>(&mut self, values: I, now: Instant) -> Vec<(&'static str, Option<Value>)>
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let mut changed = Vec::new();
        for (name, value) in values {
            let previous = self.values.insert(name, value.clone());
            if previous.as_ref() != Some(&value) {
                changed.push((name, previous));
            }
        }
        self.expiration = Some(now + self.validity);
        changed
    }

    /// Force the next timed read to reload; lazy values are kept
    pub fn expire(&mut self) {
        self.expiration = None;
    }

    /// Drop the cached value of one attribute
    pub fn forget(&mut self, name: &str) {
        self.values.remove(name);
    }

    /// Drop every cached value, lazy ones included
    pub fn clear(&mut self) {
        self.values.clear();
        self.expiration = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Encoding;

    const TIMED: AttributeSpec = AttributeSpec::new("current", Encoding::Fixed);
    const LAZY: AttributeSpec = AttributeSpec::new("logicalName", Encoding::Name).lazy();
    const IMMEDIATE: AttributeSpec = AttributeSpec::new("currentTransition", Encoding::Text).immediate();

    #[tokio::test(start_paused = true)]
    async fn test_timed_expiration() {
        let mut cache = AttributeCache::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        assert!(cache.needs_load(&TIMED, t0));

        cache.update([("current", Value::Float(4.0))], t0);
        assert_eq!(cache.get("current"), Some(&Value::Float(4.0)));
        assert!(!cache.needs_load(&TIMED, t0 + Duration::from_millis(500)));
        assert!(!cache.needs_load(&TIMED, t0 + Duration::from_millis(999)));
        assert!(cache.needs_load(&TIMED, t0 + Duration::from_millis(1000)));
        assert_eq!(cache.expiration(), Some(t0 + Duration::from_millis(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_and_immediate_policies() {
        let mut cache = AttributeCache::new(Duration::from_millis(5));
        let t0 = Instant::now();
        cache.update([("logicalName", Value::from("TX1"))], t0);

        let later = t0 + Duration::from_secs(3600);
        assert!(!cache.needs_load(&LAZY, later));
        assert!(cache.needs_load(&IMMEDIATE, t0));

        cache.expire();
        assert!(!cache.needs_load(&LAZY, later));
        cache.clear();
        assert!(cache.needs_load(&LAZY, later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_reports_changes() {
        let mut cache = AttributeCache::new(Duration::from_millis(5));
        let now = Instant::now();
        let changed = cache.update(
            [("current", Value::Float(4.0)), ("advertisedValue", Value::from("4.000"))],
            now,
        );
        assert_eq!(changed.len(), 2);

        let changed = cache.update(
            [("current", Value::Float(4.0)), ("advertisedValue", Value::from("5.000"))],
            now,
        );
        assert_eq!(changed, vec![("advertisedValue", Some(Value::from("4.000")))]);

        cache.forget("current");
        assert!(cache.get("current").is_none());
    }

    #[test]
    fn test_validity_change() {
        let mut cache = AttributeCache::new(Duration::from_millis(5));
        cache.set_validity(Duration::from_millis(1000));
        assert_eq!(cache.validity(), Duration::from_millis(1000));
    }
}
