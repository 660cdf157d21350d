/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{DeliveryTracker, FieldValue, TrackingId};

pub type TagMap = BTreeMap<String, String>;
pub type FieldMap = BTreeMap<String, FieldValue>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MetricKind {
    #[default]
    Untyped,
    Gauge,
    Counter,
    Summary,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Untyped => "untyped",
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Summary => "summary",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, tagged, timestamped set of typed field values.
///
/// A metric always has a non-empty name and at least one field, and never
/// carries a non-finite float. Accepting or rejecting a metric consumes it.
#[derive(Clone, Debug)]
pub struct Metric {
    name: String,
    tags: TagMap,
    fields: FieldMap,
    time: DateTime<Utc>,
    kind: MetricKind,
    tracker: Option<Arc<DeliveryTracker>>,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        tags: TagMap,
        mut fields: FieldMap,
        time: DateTime<Utc>,
        kind: MetricKind,
    ) -> Option<Self> {
        let name = name.into();
        if name.is_empty() {
            return None;
        }
        fields.retain(|_, v| v.is_finite());
        if fields.is_empty() {
            return None;
        }
        Some(Metric {
            name,
            tags,
            fields,
            time,
            kind,
            tracker: None,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    #[inline]
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    #[inline]
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    #[inline]
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn set_name(&mut self, name: &str) {
        if !name.is_empty() {
            self.name = name.to_string();
        }
    }

    pub fn add_prefix(&mut self, prefix: &str) {
        self.name.insert_str(0, prefix);
    }

    pub fn add_suffix(&mut self, suffix: &str) {
        self.name.push_str(suffix);
    }

    pub fn add_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    pub fn add_tag_if_absent(&mut self, key: &str, value: &str) {
        if !self.tags.contains_key(key) {
            self.tags.insert(key.to_string(), value.to_string());
        }
    }

    pub fn remove_tag(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }

    pub fn add_field(&mut self, key: &str, value: FieldValue) {
        if value.is_finite() {
            self.fields.insert(key.to_string(), value);
        }
    }

    /// Removing the last field is refused, use the filter path to drop a metric.
    pub fn remove_field(&mut self, key: &str) -> Option<FieldValue> {
        if self.fields.len() == 1 && self.fields.contains_key(key) {
            return None;
        }
        self.fields.remove(key)
    }

    pub fn set_time(&mut self, time: DateTime<Utc>) {
        self.time = time;
    }

    pub(crate) fn parts_mut(&mut self) -> (&str, &mut FieldMap, &mut TagMap) {
        (&self.name, &mut self.fields, &mut self.tags)
    }

    /// Attach a delivery tracker, all later clones share it.
    pub fn track(&mut self, tracker: Arc<DeliveryTracker>) -> TrackingId {
        let id = tracker.id();
        self.tracker = Some(tracker);
        id
    }

    pub fn tracking_id(&self) -> Option<TrackingId> {
        self.tracker.as_ref().map(|t| t.id())
    }

    /// Mark this copy as handed to an output writer.
    pub fn accept(self) {}

    /// Mark this copy as undeliverable. The tracking group will report failure.
    pub fn reject(self) {
        if let Some(tracker) = &self.tracker {
            tracker.mark_rejected();
        }
    }

    /// Same series: name and tag set match.
    pub fn same_series(&self, other: &Metric) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tags == other.tags
            && self.fields == other.fields
            && self.time == other.time
            && self.kind == other.kind
    }
}
