/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use g3_metric::{
    DeliveryInfo, DeliveryTracker, FieldMap, Metric, MetricKind, TagMap, TrackingId,
};

/// What a plugin sees while it is gathering or pushing.
#[async_trait]
pub trait Accumulator: Send + Sync {
    async fn add_typed(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
        kind: MetricKind,
    );

    async fn add_metric(&self, m: Metric);

    /// Log the error with the owning plugin name. Never fails.
    fn add_error(&self, e: anyhow::Error);

    async fn add_fields(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, time, MetricKind::Untyped)
            .await
    }

    async fn add_gauge(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, time, MetricKind::Gauge)
            .await
    }

    async fn add_counter(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, time, MetricKind::Counter)
            .await
    }

    async fn add_summary(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, time, MetricKind::Summary)
            .await
    }

    async fn add_histogram(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, time, MetricKind::Histogram)
            .await
    }
}

/// Naming, tagging and filtering policy of the plugin owning an accumulator.
pub trait MetricMaker: Send + Sync {
    fn log_name(&self) -> &str;

    /// None if the metric should be dropped.
    fn make_metric(&self, m: Metric) -> Option<Metric>;

    fn on_error(&self, e: &anyhow::Error);
}

/// Effective timestamp precision of an input.
pub fn get_precision(precision: Duration, interval: Duration) -> Duration {
    if !precision.is_zero() {
        return precision;
    }
    if interval >= Duration::from_secs(1) {
        Duration::from_secs(1)
    } else if interval >= Duration::from_millis(1) {
        Duration::from_millis(1)
    } else if interval >= Duration::from_micros(1) {
        Duration::from_micros(1)
    } else {
        Duration::from_nanos(1)
    }
}

/// Round to the nearest multiple of `precision`, halfway rounds up.
pub fn round_time(time: DateTime<Utc>, precision: Duration) -> DateTime<Utc> {
    let p = precision.as_nanos();
    if p <= 1 {
        return time;
    }
    let Some(ts) = time.timestamp_nanos_opt() else {
        return time;
    };
    let Ok(p) = i64::try_from(p) else {
        return time;
    };
    let rem = ts.rem_euclid(p);
    let down = ts - rem;
    let rounded = if rem >= p - rem {
        down.saturating_add(p)
    } else {
        down
    };
    DateTime::from_timestamp_nanos(rounded)
}

pub struct MetricAccumulator {
    maker: Arc<dyn MetricMaker>,
    sender: mpsc::Sender<Metric>,
    precision: Duration,
}

impl MetricAccumulator {
    pub fn new(maker: Arc<dyn MetricMaker>, sender: mpsc::Sender<Metric>) -> Self {
        MetricAccumulator {
            maker,
            sender,
            precision: Duration::from_nanos(1),
        }
    }

    /// Must be called before the accumulator is shared.
    pub fn set_precision(&mut self, precision: Duration) {
        self.precision = precision;
    }

    pub fn with_tracking(self, max_tracked: usize) -> TrackingAccumulator {
        TrackingAccumulator::new(self, max_tracked)
    }

    async fn publish(&self, m: Metric) {
        if let Some(m) = self.maker.make_metric(m) {
            // the receiver only goes away at shutdown
            let _ = self.sender.send(m).await;
        }
    }
}

#[async_trait]
impl Accumulator for MetricAccumulator {
    async fn add_typed(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
        kind: MetricKind,
    ) {
        let time = round_time(time.unwrap_or_else(Utc::now), self.precision);
        if let Some(m) = Metric::new(measurement, tags, fields, time, kind) {
            self.publish(m).await;
        }
    }

    async fn add_metric(&self, mut m: Metric) {
        m.set_time(round_time(m.time(), self.precision));
        self.publish(m).await;
    }

    fn add_error(&self, e: anyhow::Error) {
        self.maker.on_error(&e);
    }
}

/// Keeps what a plugin emits until it can be forwarded.
///
/// Used where the plugin runs under a lock that must not be held while
/// waiting on a channel.
#[derive(Default)]
pub struct MetricCollector {
    metrics: Mutex<Vec<Metric>>,
    errors: Mutex<Vec<anyhow::Error>>,
}

impl MetricCollector {
    pub fn take_metrics(&self) -> Vec<Metric> {
        std::mem::take(&mut *self.metrics.lock().unwrap())
    }

    pub fn take_errors(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut *self.errors.lock().unwrap())
    }

    /// Hand everything collected so far to `acc`.
    pub async fn forward(&self, acc: &dyn Accumulator) {
        for e in self.take_errors() {
            acc.add_error(e);
        }
        for m in self.take_metrics() {
            acc.add_metric(m).await;
        }
    }
}

#[async_trait]
impl Accumulator for MetricCollector {
    async fn add_typed(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
        kind: MetricKind,
    ) {
        let time = time.unwrap_or_else(Utc::now);
        if let Some(m) = Metric::new(measurement, tags, fields, time, kind) {
            self.metrics.lock().unwrap().push(m);
        }
    }

    async fn add_metric(&self, m: Metric) {
        self.metrics.lock().unwrap().push(m);
    }

    fn add_error(&self, e: anyhow::Error) {
        self.errors.lock().unwrap().push(e);
    }
}

/// More tracked metrics were delivered than the input reserved room for.
///
/// The input would wait forever on notices it never reads, there is no
/// way to recover.
fn tracking_overflow(name: &str) -> ! {
    error!("FATAL: [{name}] delivery channel is full, more tracked metrics than reserved");
    if cfg!(test) {
        panic!("channel is full");
    }
    std::process::abort()
}

/// Accumulator that reports when tracked metrics leave every output.
pub struct TrackingAccumulator {
    base: MetricAccumulator,
    delivered_sender: mpsc::Sender<DeliveryInfo>,
    delivered_receiver: Mutex<Option<mpsc::Receiver<DeliveryInfo>>>,
}

impl TrackingAccumulator {
    fn new(base: MetricAccumulator, max_tracked: usize) -> Self {
        let (delivered_sender, delivered_receiver) = mpsc::channel(max_tracked.max(1));
        TrackingAccumulator {
            base,
            delivered_sender,
            delivered_receiver: Mutex::new(Some(delivered_receiver)),
        }
    }

    /// Take the delivery receiver, only the first call gets it.
    pub fn delivered(&self) -> Option<mpsc::Receiver<DeliveryInfo>> {
        self.delivered_receiver.lock().unwrap().take()
    }

    pub async fn add_tracking_metric(&self, mut m: Metric) -> TrackingId {
        let sender = self.delivered_sender.clone();
        let name = self.base.maker.log_name().to_string();
        let tracker = DeliveryTracker::new(Box::new(move |info: DeliveryInfo| {
            match sender.try_send(info) {
                Ok(_) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => tracking_overflow(&name),
            }
        }));
        let id = m.track(Arc::new(tracker));
        self.base.add_metric(m).await;
        id
    }
}

#[async_trait]
impl Accumulator for TrackingAccumulator {
    async fn add_typed(
        &self,
        measurement: &str,
        fields: FieldMap,
        tags: TagMap,
        time: Option<DateTime<Utc>>,
        kind: MetricKind,
    ) {
        self.base
            .add_typed(measurement, fields, tags, time, kind)
            .await
    }

    async fn add_metric(&self, m: Metric) {
        self.base.add_metric(m).await
    }

    fn add_error(&self, e: anyhow::Error) {
        self.base.add_error(e)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use chrono::{NaiveDate, TimeZone};
    use g3_metric::FieldValue;

    #[derive(Default)]
    pub(crate) struct PassMaker {
        pub(crate) errors: AtomicUsize,
    }

    impl MetricMaker for PassMaker {
        fn log_name(&self) -> &str {
            "inputs.test"
        }

        fn make_metric(&self, m: Metric) -> Option<Metric> {
            Some(m)
        }

        fn on_error(&self, _e: &anyhow::Error) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn fields(kv: &[(&str, f64)]) -> FieldMap {
        kv.iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Float(*v)))
            .collect()
    }

    fn new_acc() -> (MetricAccumulator, mpsc::Receiver<Metric>, Arc<PassMaker>) {
        let maker = Arc::new(PassMaker::default());
        let (sender, receiver) = mpsc::channel(16);
        let acc = MetricAccumulator::new(maker.clone(), sender);
        (acc, receiver, maker)
    }

    fn noon_plus(nanos: u32) -> DateTime<Utc> {
        let t = NaiveDate::from_ymd_opt(2009, 11, 10)
            .unwrap()
            .and_hms_nano_opt(12, 0, 0, nanos)
            .unwrap();
        Utc.from_utc_datetime(&t)
    }

    #[tokio::test]
    async fn drop_non_finite_fields() {
        let (acc, mut receiver, _) = new_acc();
        acc.add_fields(
            "m",
            fields(&[("a", f64::INFINITY), ("b", 1.0)]),
            TagMap::new(),
            None,
        )
        .await;
        acc.add_fields("m", fields(&[("a", f64::NAN)]), TagMap::new(), None)
            .await;
        drop(acc);

        let m = receiver.recv().await.unwrap();
        assert_eq!(m.fields().len(), 1);
        assert!(m.field("b").is_some());
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn empty_is_no_metric() {
        let (acc, mut receiver, _) = new_acc();
        acc.add_gauge("", fields(&[("a", 1.0)]), TagMap::new(), None)
            .await;
        acc.add_gauge("m", FieldMap::new(), TagMap::new(), None)
            .await;
        drop(acc);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn value_kind() {
        let (acc, mut receiver, _) = new_acc();
        acc.add_counter("c", fields(&[("v", 1.0)]), TagMap::new(), None)
            .await;
        acc.add_histogram("h", fields(&[("v", 1.0)]), TagMap::new(), None)
            .await;
        assert_eq!(receiver.recv().await.unwrap().kind(), MetricKind::Counter);
        assert_eq!(receiver.recv().await.unwrap().kind(), MetricKind::Histogram);
    }

    #[tokio::test]
    async fn precision_rounding() {
        let (mut acc, mut receiver, _) = new_acc();
        let t = noon_plus(82_912_748);

        acc.set_precision(Duration::from_secs(1));
        acc.add_fields("m", fields(&[("v", 1.0)]), TagMap::new(), Some(t))
            .await;
        assert_eq!(receiver.recv().await.unwrap().time(), noon_plus(0));

        acc.set_precision(Duration::from_millis(1));
        acc.add_fields("m", fields(&[("v", 1.0)]), TagMap::new(), Some(t))
            .await;
        assert_eq!(receiver.recv().await.unwrap().time(), noon_plus(83_000_000));
    }

    #[tokio::test]
    async fn add_metric_rounds_time() {
        let (mut acc, mut receiver, _) = new_acc();
        acc.set_precision(Duration::from_secs(1));
        let m = Metric::new(
            "m",
            TagMap::new(),
            fields(&[("v", 1.0)]),
            noon_plus(600_000_000),
            MetricKind::Untyped,
        )
        .unwrap();
        acc.add_metric(m).await;
        let m = receiver.recv().await.unwrap();
        assert_eq!(m.time(), noon_plus(0) + chrono::TimeDelta::seconds(1));
    }

    #[test]
    fn precision_from_interval() {
        assert_eq!(
            get_precision(Duration::ZERO, Duration::from_secs(10)),
            Duration::from_secs(1)
        );
        assert_eq!(
            get_precision(Duration::ZERO, Duration::from_millis(250)),
            Duration::from_millis(1)
        );
        assert_eq!(
            get_precision(Duration::ZERO, Duration::from_nanos(10)),
            Duration::from_nanos(1)
        );
        assert_eq!(
            get_precision(Duration::from_micros(1), Duration::from_secs(10)),
            Duration::from_micros(1)
        );
    }

    #[test]
    fn add_error_is_counted() {
        let (acc, _receiver, maker) = new_acc();
        acc.add_error(anyhow!("boom"));
        assert_eq!(maker.errors.load(Ordering::Relaxed), 1);
    }

    fn tracked_metric() -> Metric {
        Metric::new(
            "m",
            TagMap::new(),
            fields(&[("v", 1.0)]),
            Utc::now(),
            MetricKind::Untyped,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn tracking_delivery() {
        let (acc, mut receiver, _) = new_acc();
        let acc = acc.with_tracking(2);
        let mut delivered = acc.delivered().unwrap();
        assert!(acc.delivered().is_none());

        let id1 = acc.add_tracking_metric(tracked_metric()).await;
        let id2 = acc.add_tracking_metric(tracked_metric()).await;

        receiver.recv().await.unwrap().accept();
        receiver.recv().await.unwrap().reject();

        let info = delivered.recv().await.unwrap();
        assert_eq!(info.id, id1);
        assert!(info.delivered);
        let info = delivered.recv().await.unwrap();
        assert_eq!(info.id, id2);
        assert!(!info.delivered);
    }

    #[tokio::test]
    #[should_panic(expected = "channel is full")]
    async fn tracking_overflow() {
        let (acc, mut receiver, _) = new_acc();
        let acc = acc.with_tracking(1);
        let _delivered = acc.delivered();

        acc.add_tracking_metric(tracked_metric()).await;
        acc.add_tracking_metric(tracked_metric()).await;

        receiver.recv().await.unwrap().accept();
        receiver.recv().await.unwrap().accept();
    }

    #[tokio::test]
    async fn collector_forwards_later() {
        let collector = MetricCollector::default();
        collector
            .add_gauge("g", fields(&[("v", 1.0)]), TagMap::new(), Some(noon_plus(600_000_000)))
            .await;
        collector.add_error(anyhow!("late"));

        let (mut acc, mut receiver, maker) = new_acc();
        acc.set_precision(Duration::from_secs(1));
        collector.forward(&acc).await;
        assert_eq!(maker.errors.load(Ordering::Relaxed), 1);
        let m = receiver.recv().await.unwrap();
        assert_eq!(m.kind(), MetricKind::Gauge);
        assert_eq!(m.time(), noon_plus(0) + chrono::TimeDelta::seconds(1));
        assert!(collector.take_metrics().is_empty());
    }
}
