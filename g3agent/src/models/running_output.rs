/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::{Mutex, Notify};

use g3_metric::Metric;

use crate::buffer::Buffer;
use crate::config::{OutputConfig, StartupErrorBehavior};
use crate::plugins::{Output, PartialWriteError, StartupError};
use crate::stats::{Stat, StatsRegistry, plugin_tags};

/// Result of [`RunningOutput::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Startup {
    Connected,
    /// Not connected yet, every write tries again first.
    Retrying,
    /// Not connected and left out of the pipeline.
    Ignored,
}

/// An output plugin with its buffer and batching policy.
///
/// Metrics come in through [`RunningOutput::add_metric`] from the single
/// output stage. Writes for the same output never overlap, the plugin lock
/// is held from taking a batch until it is settled.
pub struct RunningOutput {
    config: OutputConfig,
    log_name: String,
    output: Mutex<Box<dyn Output>>,
    aggregating: bool,
    buffer: Buffer,
    connected: AtomicBool,

    new_metrics: AtomicUsize,
    batch_ready: Notify,

    metrics_filtered: Arc<Stat>,
    write_time_ns: Arc<Stat>,
    errors: Arc<Stat>,
    startup_errors: Arc<Stat>,
}

impl RunningOutput {
    pub fn new(
        mut config: OutputConfig,
        mut output: Box<dyn Output>,
        registry: &StatsRegistry,
    ) -> Self {
        config.metric_batch_size = config.metric_batch_size.max(1);
        config.metric_buffer_limit = config.metric_buffer_limit.max(config.metric_batch_size);
        let log_name = config.log_name();
        let tags = plugin_tags("output", &config.plugin, config.alias.as_deref());
        let aggregating = output.aggregating().is_some();
        let buffer = Buffer::new(&log_name, config.metric_buffer_limit, &tags, registry);
        RunningOutput {
            log_name,
            output: Mutex::new(output),
            aggregating,
            buffer,
            connected: AtomicBool::new(false),
            new_metrics: AtomicUsize::new(0),
            batch_ready: Notify::new(),
            metrics_filtered: registry.register("write", "metrics_filtered", &tags),
            write_time_ns: registry.register("write", "write_time_ns", &tags),
            errors: registry.register("write", "errors", &tags),
            startup_errors: registry.register("write", "startup_errors", &tags),
            config,
        }
    }

    #[inline]
    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    #[inline]
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Connect the plugin, applying the startup error behavior to
    /// retryable [`StartupError`]s.
    pub async fn start(&self) -> anyhow::Result<Startup> {
        let e = match self.output.lock().await.connect().await {
            Ok(_) => {
                self.connected.store(true, Ordering::Release);
                return Ok(Startup::Connected);
            }
            Err(e) => e,
        };
        self.startup_errors.incr(1);

        let retry = e
            .downcast_ref::<StartupError>()
            .map(|s| s.retry)
            .unwrap_or(false);
        if !retry {
            return Err(e);
        }
        match self.config.startup_error_behavior {
            StartupErrorBehavior::Error => Err(e),
            StartupErrorBehavior::Retry => {
                warn!(
                    "[{}] connect failed: {e:?}, retrying on next write",
                    self.log_name
                );
                Ok(Startup::Retrying)
            }
            StartupErrorBehavior::Ignore => {
                warn!("[{}] connect failed: {e:?}, ignoring output", self.log_name);
                Ok(Startup::Ignored)
            }
        }
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.output.lock().await.close().await
    }

    pub async fn add_metric(&self, mut m: Metric) {
        let filter = &self.config.filter;
        if !filter.select(&m) || !filter.modify(&mut m) {
            self.metrics_filtered.incr(1);
            return;
        }
        self.config.naming.apply(&mut m);

        if self.aggregating {
            let mut output = self.output.lock().await;
            if let Some(agg) = output.aggregating() {
                agg.add(m);
            }
            return;
        }

        let dropped = self.buffer.add([m]);
        if dropped > 0 {
            warn!(
                "[{}] metric buffer overflow; {dropped} metrics have been dropped",
                self.log_name
            );
        }

        let count = self.new_metrics.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.config.metric_batch_size {
            self.new_metrics.store(0, Ordering::Release);
            self.batch_ready.notify_one();
        }
    }

    /// Completes once a full batch has been collected since the last call.
    pub async fn batch_ready(&self) {
        self.batch_ready.notified().await
    }

    /// Write everything buffered, one batch at a time.
    ///
    /// Stops at the first failed batch, it stays at the head of the buffer
    /// for the next attempt. Batches written before the failure are kept.
    pub async fn write(&self) -> anyhow::Result<()> {
        if self.aggregating {
            let metrics = {
                let mut output = self.output.lock().await;
                match output.aggregating() {
                    Some(agg) => {
                        let metrics = agg.push();
                        agg.reset();
                        metrics
                    }
                    None => Vec::new(),
                }
            };
            self.buffer.add(metrics);
        }

        let batches = self.buffer.len().div_ceil(self.config.metric_batch_size);
        for _ in 0..batches {
            if !self.write_one_batch().await? {
                break;
            }
        }
        Ok(())
    }

    /// Write a single batch.
    pub async fn write_batch(&self) -> anyhow::Result<()> {
        self.write_one_batch().await.map(|_| ())
    }

    async fn write_one_batch(&self) -> anyhow::Result<bool> {
        let mut output = self.output.lock().await;
        if !self.connected.load(Ordering::Acquire) {
            if let Err(e) = output.connect().await {
                self.errors.incr(1);
                return Err(e.context("not connected"));
            }
            info!("[{}] connected", self.log_name);
            self.connected.store(true, Ordering::Release);
        }

        let batch = self.buffer.batch(self.config.metric_batch_size);
        if batch.is_empty() {
            return Ok(false);
        }
        self.new_metrics.store(0, Ordering::Release);

        let start = Instant::now();
        let r = output.write(&batch).await;
        let elapsed = start.elapsed();
        self.write_time_ns
            .set(elapsed.as_nanos().min(i64::MAX as u128) as i64);

        match r {
            Ok(_) => {
                debug!(
                    "[{}] wrote batch of {} metrics in {elapsed:?}",
                    self.log_name,
                    batch.len()
                );
                self.buffer.accept(batch);
                Ok(true)
            }
            Err(e) => {
                self.errors.incr(1);
                match e.downcast_ref::<PartialWriteError>() {
                    Some(p) => {
                        debug!(
                            "[{}] wrote {} of {} metrics before failing",
                            self.log_name,
                            p.handled,
                            batch.len()
                        );
                        self.buffer.accept_partial(batch, p.handled, &p.rejected);
                    }
                    None => self.buffer.reject(batch),
                }
                Err(e)
            }
        }
    }

    pub fn log_buffer_status(&self) {
        debug!(
            "[{}] buffer fullness: {} / {} metrics",
            self.log_name,
            self.buffer.len(),
            self.buffer.capacity()
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::FutureExt;
    use g3_metric::{FieldMap, FieldValue, MetricKind, TagMap};

    use crate::plugins::AggregatingOutput;

    /// Records every written batch, fails while `fail` is set.
    #[derive(Clone, Default)]
    pub(crate) struct MockOutput {
        pub(crate) batches: Arc<StdMutex<Vec<Vec<Metric>>>>,
        pub(crate) fail: Arc<AtomicBool>,
    }

    impl MockOutput {
        pub(crate) fn written(&self) -> Vec<i64> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .flatten()
                .map(value_of)
                .collect()
        }
    }

    #[async_trait]
    impl Output for MockOutput {
        async fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(anyhow!("failed write"));
            }
            self.batches.lock().unwrap().push(metrics.to_vec());
            Ok(())
        }
    }

    pub(crate) fn value_of(m: &Metric) -> i64 {
        match m.field("value") {
            Some(FieldValue::Int(v)) => *v,
            _ => -1,
        }
    }

    pub(crate) fn metric(v: i64) -> Metric {
        let mut fields = FieldMap::new();
        fields.insert("value".to_string(), FieldValue::Int(v));
        Metric::new("cpu", TagMap::new(), fields, Utc::now(), MetricKind::Untyped).unwrap()
    }

    fn running(batch: usize, limit: usize) -> (RunningOutput, MockOutput) {
        let mut config = OutputConfig::new("mock");
        config.metric_batch_size = batch;
        config.metric_buffer_limit = limit;
        let mock = MockOutput::default();
        let registry = StatsRegistry::new();
        let output = RunningOutput::new(config, Box::new(mock.clone()), &registry);
        (output, mock)
    }

    #[tokio::test]
    async fn write_all_in_batches() {
        let (output, mock) = running(4, 12);
        for i in 0..10 {
            output.add_metric(metric(i)).await;
        }
        output.write().await.unwrap();
        let batches = mock.batches.lock().unwrap().len();
        assert_eq!(batches, 3);
        assert_eq!(mock.written(), (0..10).collect::<Vec<_>>());
        assert_eq!(output.buffer_len(), 0);
    }

    #[tokio::test]
    async fn batch_ready_signal() {
        let (output, _mock) = running(2, 10);
        output.add_metric(metric(0)).await;
        assert!(output.batch_ready().now_or_never().is_none());
        output.add_metric(metric(1)).await;
        assert!(output.batch_ready().now_or_never().is_some());
        assert!(output.batch_ready().now_or_never().is_none());
        output.add_metric(metric(2)).await;
        assert!(output.batch_ready().now_or_never().is_none());
    }

    #[tokio::test]
    async fn zero_batch_size_is_clamped() {
        let (output, mock) = running(0, 0);
        assert_eq!(output.config().metric_batch_size, 1);
        output.add_metric(metric(0)).await;
        output.add_metric(metric(1)).await;
        output.write().await.unwrap();
        assert_eq!(mock.written(), vec![1]);
    }

    #[tokio::test]
    async fn buffer_stats_use_plugin_tags() {
        let mut config = OutputConfig::new("mock");
        config.alias = Some("main".to_string());
        let registry = StatsRegistry::new();
        let output = RunningOutput::new(config, Box::new(MockOutput::default()), &registry);
        for i in 0..3 {
            output.add_metric(metric(i)).await;
        }
        output.write().await.unwrap();

        let tags = plugin_tags("output", "mock", Some("main"));
        assert_eq!(registry.register("write", "metrics_added", &tags).get(), 3);
        assert_eq!(registry.register("write", "metrics_written", &tags).get(), 3);
        assert_eq!(registry.register("write", "buffer_size", &tags).get(), 0);
    }

    #[tokio::test]
    async fn write_fail_keeps_order() {
        let (output, mock) = running(4, 12);
        for i in 0..10 {
            output.add_metric(metric(i)).await;
        }
        mock.fail.store(true, Ordering::Relaxed);
        assert!(output.write().await.is_err());
        assert_eq!(output.buffer_len(), 10);

        mock.fail.store(false, Ordering::Relaxed);
        output.write().await.unwrap();
        assert_eq!(mock.written(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn write_fail_with_overflow() {
        let (output, mock) = running(4, 6);
        for i in 0..6 {
            output.add_metric(metric(i)).await;
        }
        mock.fail.store(true, Ordering::Relaxed);
        assert!(output.write_batch().await.is_err());

        for i in 6..9 {
            output.add_metric(metric(i)).await;
        }
        mock.fail.store(false, Ordering::Relaxed);
        output.write().await.unwrap();
        assert_eq!(mock.written(), vec![3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn partial_progress_kept() {
        let (output, mock) = running(2, 10);
        for i in 0..6 {
            output.add_metric(metric(i)).await;
        }
        output.write_batch().await.unwrap();
        mock.fail.store(true, Ordering::Relaxed);
        assert!(output.write().await.is_err());
        assert_eq!(output.buffer_len(), 4);
        assert_eq!(mock.written(), vec![0, 1]);
    }

    #[tokio::test]
    async fn filter_and_naming() {
        let mut config = OutputConfig::new("mock");
        config.filter.name_drop = vec!["mem".to_string()];
        config.filter.compile().unwrap();
        config.naming.name_prefix = Some("agent_".to_string());
        let mock = MockOutput::default();
        let registry = StatsRegistry::new();
        let output = RunningOutput::new(config, Box::new(mock.clone()), &registry);

        output.add_metric(metric(1)).await;
        let mut mem = metric(2);
        mem.set_name("mem");
        output.add_metric(mem).await;
        output.write().await.unwrap();

        let batches = mock.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].name(), "agent_cpu");
    }

    #[derive(Default)]
    struct SumOutput {
        sum: i64,
        written: Arc<StdMutex<Vec<Metric>>>,
    }

    impl AggregatingOutput for SumOutput {
        fn add(&mut self, m: Metric) {
            self.sum += value_of(&m);
        }

        fn push(&mut self) -> Vec<Metric> {
            vec![metric(self.sum)]
        }

        fn reset(&mut self) {
            self.sum = 0;
        }
    }

    #[async_trait]
    impl Output for SumOutput {
        async fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
            self.written.lock().unwrap().extend_from_slice(metrics);
            Ok(())
        }

        fn aggregating(&mut self) -> Option<&mut dyn AggregatingOutput> {
            Some(self)
        }
    }

    #[tokio::test]
    async fn aggregating_output() {
        let sum = SumOutput::default();
        let written = sum.written.clone();
        let output = RunningOutput::new(
            OutputConfig::new("sum"),
            Box::new(sum),
            &StatsRegistry::new(),
        );
        for i in 1..=4 {
            output.add_metric(metric(i)).await;
        }
        assert_eq!(output.buffer_len(), 0);
        output.write().await.unwrap();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(value_of(&written[0]), 10);
    }

    /// Fails to connect until `failures` runs out.
    struct FlakyOutput {
        failures: Arc<AtomicUsize>,
        retry: bool,
        inner: MockOutput,
    }

    #[async_trait]
    impl Output for FlakyOutput {
        async fn connect(&mut self) -> anyhow::Result<()> {
            let left = self.failures.load(Ordering::Relaxed);
            if left == 0 {
                return Ok(());
            }
            self.failures.store(left - 1, Ordering::Relaxed);
            Err(StartupError {
                retry: self.retry,
                source: anyhow!("connection refused"),
            }
            .into())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
            self.inner.write(metrics).await
        }
    }

    fn flaky(
        behavior: StartupErrorBehavior,
        failures: usize,
        retry: bool,
    ) -> (RunningOutput, MockOutput) {
        let mut config = OutputConfig::new("flaky");
        config.startup_error_behavior = behavior;
        let mock = MockOutput::default();
        let plugin = FlakyOutput {
            failures: Arc::new(AtomicUsize::new(failures)),
            retry,
            inner: mock.clone(),
        };
        let output = RunningOutput::new(config, Box::new(plugin), &StatsRegistry::new());
        (output, mock)
    }

    #[tokio::test]
    async fn startup_error_behaviors() {
        let (output, _) = flaky(StartupErrorBehavior::Error, 1, true);
        assert!(output.start().await.is_err());

        let (output, _) = flaky(StartupErrorBehavior::Ignore, 1, true);
        assert_eq!(output.start().await.unwrap(), Startup::Ignored);

        // only retryable errors are subject to the behavior
        let (output, _) = flaky(StartupErrorBehavior::Ignore, 1, false);
        assert!(output.start().await.is_err());

        let (output, _) = flaky(StartupErrorBehavior::Retry, 0, true);
        assert_eq!(output.start().await.unwrap(), Startup::Connected);
    }

    #[tokio::test]
    async fn retry_connects_before_write() {
        let (output, mock) = flaky(StartupErrorBehavior::Retry, 2, true);
        assert_eq!(output.start().await.unwrap(), Startup::Retrying);
        for i in 0..3 {
            output.add_metric(metric(i)).await;
        }

        let e = output.write().await.unwrap_err();
        assert!(e.to_string().contains("not connected"));
        assert_eq!(output.buffer_len(), 3);

        output.write().await.unwrap();
        assert_eq!(mock.written(), vec![0, 1, 2]);
    }

    /// Takes the first `handled` metrics of each batch, then fails.
    struct PartialOutput {
        handled: usize,
        rejected: Vec<usize>,
        inner: MockOutput,
    }

    #[async_trait]
    impl Output for PartialOutput {
        async fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
            if metrics.len() <= self.handled {
                return self.inner.write(metrics).await;
            }
            let kept = metrics[..self.handled]
                .iter()
                .enumerate()
                .filter(|(i, _)| !self.rejected.contains(i))
                .map(|(_, m)| m.clone())
                .collect::<Vec<_>>();
            self.inner.write(&kept).await?;
            Err(PartialWriteError {
                handled: self.handled,
                rejected: self.rejected.clone(),
                source: anyhow!("too large"),
            }
            .into())
        }
    }

    fn partial(rejected: Vec<usize>) -> (RunningOutput, MockOutput) {
        let mut config = OutputConfig::new("partial");
        config.metric_batch_size = 5;
        config.metric_buffer_limit = 10;
        let mock = MockOutput::default();
        let plugin = PartialOutput {
            handled: 4,
            rejected,
            inner: mock.clone(),
        };
        let output = RunningOutput::new(config, Box::new(plugin), &StatsRegistry::new());
        (output, mock)
    }

    #[tokio::test]
    async fn partial_write_keeps_remainder() {
        let (output, mock) = partial(Vec::new());
        for i in 0..5 {
            output.add_metric(metric(i)).await;
        }
        assert!(output.write_batch().await.is_err());
        assert_eq!(mock.written(), vec![0, 1, 2, 3]);
        assert_eq!(output.buffer_len(), 1);

        output.write().await.unwrap();
        assert_eq!(mock.written(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn partial_write_drops_rejected() {
        let (output, mock) = partial(vec![0]);
        for i in 0..5 {
            output.add_metric(metric(i)).await;
        }
        assert!(output.write_batch().await.is_err());
        assert_eq!(mock.written(), vec![1, 2, 3]);
        assert_eq!(output.buffer_len(), 1);
    }
}
