/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error};

use g3_metric::{Metric, TagMap};

use crate::accumulator::{Accumulator, MetricCollector, MetricMaker};
use crate::config::AggregatorConfig;
use crate::plugins::Aggregator;
use crate::stats::{Stat, StatsRegistry, plugin_tags};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Window {
    since: DateTime<Utc>,
    until: DateTime<Utc>,
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Truncate to a multiple of `period` since the unix epoch.
fn align_time(t: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let p = period.as_nanos();
    let (Some(ts), Ok(p)) = (t.timestamp_nanos_opt(), i64::try_from(p)) else {
        return t;
    };
    if p <= 0 {
        return t;
    }
    DateTime::from_timestamp_nanos(ts - ts.rem_euclid(p))
}

/// An aggregator plugin fed over fixed length periods.
///
/// Metrics older than the period start minus `grace`, or newer than the
/// period end plus `delay`, are dropped.
pub struct RunningAggregator {
    config: AggregatorConfig,
    log_name: String,
    aggregator: tokio::sync::Mutex<Box<dyn Aggregator>>,
    window: Mutex<Window>,
    global_tags: TagMap,

    metrics_pushed: Arc<Stat>,
    metrics_filtered: Arc<Stat>,
    metrics_dropped: Arc<Stat>,
    push_time_ns: Arc<Stat>,
    errors: Arc<Stat>,
}

impl RunningAggregator {
    pub fn new(
        config: AggregatorConfig,
        aggregator: Box<dyn Aggregator>,
        registry: &StatsRegistry,
    ) -> Self {
        let tags = plugin_tags("aggregator", &config.plugin, config.alias.as_deref());
        let now = Utc::now();
        RunningAggregator {
            log_name: config.log_name(),
            aggregator: tokio::sync::Mutex::new(aggregator),
            window: Mutex::new(Window {
                since: now,
                until: now + to_delta(config.period),
            }),
            global_tags: TagMap::new(),
            metrics_pushed: registry.register("aggregate", "metrics_pushed", &tags),
            metrics_filtered: registry.register("aggregate", "metrics_filtered", &tags),
            metrics_dropped: registry.register("aggregate", "metrics_dropped", &tags),
            push_time_ns: registry.register("aggregate", "push_time_ns", &tags),
            errors: registry.register("aggregate", "errors", &tags),
            config,
        }
    }

    pub fn set_default_tags(&mut self, tags: &TagMap) {
        self.global_tags = tags.clone();
    }

    #[inline]
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }

    pub fn end_period(&self) -> DateTime<Utc> {
        self.window.lock().unwrap().until
    }

    /// Reset the window to start at `start`, aligned to the period if `round`.
    pub fn update_window(&self, start: DateTime<Utc>, round: bool) {
        let since = if round {
            align_time(start, self.config.period)
        } else {
            start
        };
        let mut window = self.window.lock().unwrap();
        window.since = since;
        window.until = since + to_delta(self.config.period);
        debug!(
            "[{}] updated aggregation range [{}, {}]",
            self.log_name, window.since, window.until
        );
    }

    /// Returns true if the original metric should be dropped.
    pub async fn add(&self, m: &Metric) -> bool {
        let filter = &self.config.filter;
        if !filter.select(m) {
            return false;
        }
        let mut m = m.clone();
        if !filter.modify(&mut m) {
            self.metrics_filtered.incr(1);
            return self.config.drop_original;
        }

        let window = *self.window.lock().unwrap();
        let time = m.time();
        if time < window.since - to_delta(self.config.grace)
            || time > window.until + to_delta(self.config.delay)
        {
            debug!(
                "[{}] metric is outside aggregation window; discarding. {}: m: {} since: {} until: {}",
                self.log_name, m.name(), time, window.since, window.until
            );
            self.metrics_dropped.incr(1);
            return self.config.drop_original;
        }

        self.aggregator.lock().await.add(&m);
        self.config.drop_original
    }

    /// Emit the aggregates of the current period and move to the next one.
    ///
    /// The plugin lock is released before anything is sent to `acc`, so
    /// `add` keeps going while the receiver is slow.
    pub async fn push(&self, acc: &dyn Accumulator) {
        let collector = MetricCollector::default();
        let start = Instant::now();
        {
            let mut aggregator = self.aggregator.lock().await;
            {
                let mut window = self.window.lock().unwrap();
                window.since = window.until;
                window.until = window.since + to_delta(self.config.period);
            }
            aggregator.push(&collector).await;
            aggregator.reset();
        }
        self.push_time_ns
            .set(start.elapsed().as_nanos().min(i64::MAX as u128) as i64);

        collector.forward(acc).await;
    }
}

impl MetricMaker for RunningAggregator {
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
        self.metrics_pushed.incr(1);
        Some(m)
    }

    fn on_error(&self, e: &anyhow::Error) {
        self.errors.incr(1);
        error!("Error in plugin [{}]: {e:?}", self.log_name);
    }
}
