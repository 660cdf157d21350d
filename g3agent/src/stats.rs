/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use g3_metric::{FieldMap, FieldValue, Metric, MetricKind, TagMap};

#[derive(Debug, Default)]
pub struct Stat {
    value: AtomicI64,
}

impl Stat {
    #[inline]
    pub fn incr(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct StatKey {
    measurement: String,
    tags: TagMap,
}

/// Named counters of the running agent.
///
/// Any component may register a stat, registering the same key twice
/// returns the same handle.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    inner: Mutex<BTreeMap<StatKey, BTreeMap<String, Arc<Stat>>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        StatsRegistry::default()
    }

    pub fn register(&self, measurement: &str, field: &str, tags: &TagMap) -> Arc<Stat> {
        let key = StatKey {
            measurement: measurement.to_string(),
            tags: tags.clone(),
        };
        let mut ht = self.inner.lock().unwrap();
        ht.entry(key)
            .or_default()
            .entry(field.to_string())
            .or_default()
            .clone()
    }

    /// One `internal_<measurement>` metric per registered tag set.
    pub fn snapshot(&self) -> Vec<Metric> {
        let now = Utc::now();
        let ht = self.inner.lock().unwrap();
        ht.iter()
            .filter_map(|(key, stats)| {
                let fields: FieldMap = stats
                    .iter()
                    .map(|(k, s)| (k.clone(), FieldValue::Int(s.get())))
                    .collect();
                Metric::new(
                    format!("internal_{}", key.measurement),
                    key.tags.clone(),
                    fields,
                    now,
                    MetricKind::Untyped,
                )
            })
            .collect()
    }
}

pub(crate) fn plugin_tags(kind: &str, name: &str, alias: Option<&str>) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert(kind.to_string(), name.to_string());
    if let Some(alias) = alias {
        tags.insert("alias".to_string(), alias.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_stat() {
        let registry = StatsRegistry::new();
        let tags = plugin_tags("output", "file", None);
        let a = registry.register("write", "errors", &tags);
        let b = registry.register("write", "errors", &tags);
        a.incr(2);
        b.incr(3);
        assert_eq!(a.get(), 5);

        let other = registry.register("write", "errors", &plugin_tags("output", "discard", None));
        assert_eq!(other.get(), 0);
    }

    #[test]
    fn snapshot_groups_fields() {
        let registry = StatsRegistry::new();
        let tags = plugin_tags("input", "cpu", Some("main"));
        registry.register("gather", "errors", &tags).incr(1);
        registry.register("gather", "metrics_gathered", &tags).set(7);
        registry.register("agent", "metrics_written", &TagMap::new());

        let metrics = registry.snapshot();
        assert_eq!(metrics.len(), 2);
        let gather = metrics
            .iter()
            .find(|m| m.name() == "internal_gather")
            .unwrap();
        assert_eq!(gather.tag("alias"), Some("main"));
        assert_eq!(gather.field("metrics_gathered"), Some(&FieldValue::Int(7)));
        assert_eq!(gather.field("errors"), Some(&FieldValue::Int(1)));
    }
}
