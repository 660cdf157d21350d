/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

use async_trait::async_trait;
use yaml_rust::yaml;

use g3_metric::{FieldMap, FieldValue, Metric, TagMap};

use crate::accumulator::Accumulator;
use crate::plugins::{Aggregator, PluginContext};

struct Series {
    name: String,
    tags: TagMap,
    fields: BTreeMap<String, (f64, f64)>,
}

/// Per series min and max of every numeric field.
#[derive(Default)]
pub(super) struct MinMaxAggregator {
    cache: BTreeMap<(String, TagMap), Series>,
}

impl MinMaxAggregator {
    pub(super) fn build(
        options: &yaml::Hash,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Box<dyn Aggregator>> {
        crate::plugins::no_options("minmax", options)?;
        Ok(Box::<MinMaxAggregator>::default())
    }
}

#[async_trait]
impl Aggregator for MinMaxAggregator {
    fn add(&mut self, m: &Metric) {
        let series = self
            .cache
            .entry((m.name().to_string(), m.tags().clone()))
            .or_insert_with(|| Series {
                name: m.name().to_string(),
                tags: m.tags().clone(),
                fields: BTreeMap::new(),
            });
        for (k, v) in m.fields() {
            let Some(v) = v.as_f64() else {
                continue;
            };
            series
                .fields
                .entry(k.clone())
                .and_modify(|(min, max)| {
                    *min = min.min(v);
                    *max = max.max(v);
                })
                .or_insert((v, v));
        }
    }

    async fn push(&mut self, acc: &dyn Accumulator) {
        for series in self.cache.values() {
            let mut fields = FieldMap::new();
            for (k, (min, max)) in &series.fields {
                fields.insert(format!("{k}_min"), FieldValue::Float(*min));
                fields.insert(format!("{k}_max"), FieldValue::Float(*max));
            }
            acc.add_fields(&series.name, fields, series.tags.clone(), None)
                .await;
        }
    }

    fn reset(&mut self) {
        self.cache.clear();
    }
}
