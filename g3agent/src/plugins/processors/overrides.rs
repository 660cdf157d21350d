/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use yaml_rust::yaml;

use g3_metric::{Metric, TagMap};

use crate::config::MetricNaming;
use crate::config::value as y;
use crate::plugins::{PluginContext, Processor};

/// Rename metrics and force tag values.
pub(super) struct OverrideProcessor {
    naming: MetricNaming,
    tags: TagMap,
}

impl OverrideProcessor {
    pub(super) fn build(
        options: &yaml::Hash,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Box<dyn Processor>> {
        let mut naming = MetricNaming::default();
        let mut tags = TagMap::new();
        y::foreach_kv(options, |k, v| {
            let key = y::normalize_key(k);
            if key == "tags" {
                tags = y::as_tag_map(v)?;
                Ok(())
            } else if naming.set(&key, v)? {
                Ok(())
            } else {
                Err(anyhow!("invalid key {k}"))
            }
        })?;
        Ok(Box::new(OverrideProcessor { naming, tags }))
    }
}

impl Processor for OverrideProcessor {
    fn apply(&mut self, mut metrics: Vec<Metric>) -> Vec<Metric> {
        for m in &mut metrics {
            self.naming.apply(m);
            for (k, v) in &self.tags {
                m.add_tag(k, v);
            }
        }
        metrics
    }
}
