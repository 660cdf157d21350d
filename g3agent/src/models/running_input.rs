/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::error;

use g3_metric::{Metric, TagMap};

use crate::accumulator::{Accumulator, MetricMaker};
use crate::config::InputConfig;
use crate::plugins::{Input, ServiceInput};
use crate::stats::{Stat, StatsRegistry, plugin_tags};

pub struct RunningInput {
    config: InputConfig,
    log_name: String,
    input: Box<dyn Input>,
    global_tags: TagMap,

    metrics_gathered: Arc<Stat>,
    gather_time_ns: Arc<Stat>,
    errors: Arc<Stat>,
}

impl RunningInput {
    pub fn new(config: InputConfig, input: Box<dyn Input>, registry: &StatsRegistry) -> Self {
        let tags = plugin_tags("input", &config.plugin, config.alias.as_deref());
        RunningInput {
            log_name: config.log_name(),
            input,
            global_tags: TagMap::new(),
            metrics_gathered: registry.register("gather", "metrics_gathered", &tags),
            gather_time_ns: registry.register("gather", "gather_time_ns", &tags),
            errors: registry.register("gather", "errors", &tags),
            config,
        }
    }

    pub fn set_default_tags(&mut self, tags: &TagMap) {
        self.global_tags = tags.clone();
    }

    #[inline]
    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    #[inline]
    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    pub fn interval(&self) -> Option<Duration> {
        self.config.interval
    }

    pub fn service(&self) -> Option<&dyn ServiceInput> {
        self.input.as_service()
    }

    pub async fn gather(&self, acc: &dyn Accumulator) -> anyhow::Result<()> {
        let start = Instant::now();
        let r = self.input.gather(acc).await;
        self.gather_time_ns
            .set(start.elapsed().as_nanos().min(i64::MAX as u128) as i64);
        r
    }
}

impl MetricMaker for RunningInput {
    fn log_name(&self) -> &str {
        &self.log_name
    }

    fn make_metric(&self, mut m: Metric) -> Option<Metric> {
        self.config.naming.apply(&mut m);
        for (k, v) in &self.config.tags {
            m.add_tag_if_absent(k, v);
        }
        for (k, v) in &self.global_tags {
            m.add_tag_if_absent(k, v);
        }

        let filter = &self.config.filter;
        if !filter.select(&m) || !filter.modify(&mut m) {
            return None;
        }
        self.metrics_gathered.incr(1);
        Some(m)
    }

    fn on_error(&self, e: &anyhow::Error) {
        self.errors.incr(1);
        error!("Error in plugin [{}]: {e:?}", self.log_name);
    }
}
