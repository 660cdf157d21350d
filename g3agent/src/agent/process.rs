/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures_util::future::join_all;
use log::{debug, error};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use g3_metric::Metric;

use crate::accumulator::MetricAccumulator;
use crate::models::{RunningAggregator, RunningProcessor};

pub(super) const RECV_BATCH_SIZE: usize = 128;

/// Run the processor chain over everything received, until the channel
/// is closed and drained.
pub(super) async fn run_processors(
    processors: Vec<Arc<RunningProcessor>>,
    mut receiver: mpsc::Receiver<Metric>,
    sender: mpsc::Sender<Metric>,
) {
    let mut metrics = Vec::with_capacity(RECV_BATCH_SIZE);
    while receiver.recv_many(&mut metrics, RECV_BATCH_SIZE).await > 0 {
        let mut batch = std::mem::take(&mut metrics);
        for p in &processors {
            batch = p.apply(batch);
        }
        for m in batch {
            // the receiver only goes away at shutdown
            let _ = sender.send(m).await;
        }
    }
}

/// Feed every metric to the aggregators and pass on the ones not dropped.
///
/// Once the channel is closed and drained, `push_quit` is cancelled and the
/// push tasks are joined, each of them pushes one last time.
pub(super) async fn run_aggregators(
    aggregators: Vec<Arc<RunningAggregator>>,
    mut receiver: mpsc::Receiver<Metric>,
    sender: mpsc::Sender<Metric>,
    pushers: Vec<JoinHandle<()>>,
    push_quit: CancellationToken,
) {
    let mut metrics = Vec::with_capacity(RECV_BATCH_SIZE);
    while receiver.recv_many(&mut metrics, RECV_BATCH_SIZE).await > 0 {
        for m in metrics.drain(..) {
            let mut drop_original = false;
            for agg in &aggregators {
                if agg.add(&m).await {
                    drop_original = true;
                }
            }
            if drop_original {
                m.accept();
            } else {
                let _ = sender.send(m).await;
            }
        }
    }

    debug!("input closed, pushing aggregators");
    push_quit.cancel();
    for r in join_all(pushers).await {
        if let Err(e) = r {
            error!("aggregator push task failed: {e}");
        }
    }
}

/// Push the aggregator at the end of each period, and once more on quit.
pub(super) async fn push_aggregator(
    agg: Arc<RunningAggregator>,
    acc: MetricAccumulator,
    quit: CancellationToken,
) {
    loop {
        let delay = TimeDelta::from_std(agg.config().delay).unwrap_or(TimeDelta::zero());
        let push_at = agg.end_period() + delay;
        let wait = (push_at - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            biased;

            _ = quit.cancelled() => break,
            _ = tokio::time::sleep(wait) => agg.push(&acc).await,
        }
    }
    agg.push(&acc).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use g3_metric::{FieldMap, FieldValue, TagMap};

    use crate::accumulator::Accumulator;
    use crate::config::{AggregatorConfig, ProcessorConfig};
    use crate::models::output_tests::{metric, value_of};
    use crate::plugins::{Aggregator, Processor};
    use crate::stats::StatsRegistry;

    struct DropOdd;

    impl Processor for DropOdd {
        fn apply(&mut self, metrics: Vec<Metric>) -> Vec<Metric> {
            metrics
                .into_iter()
                .filter(|m| value_of(m) % 2 == 0)
                .collect()
        }
    }

    /// Records the values it sees, pushes `series` metrics.
    struct Record {
        seen: Arc<Mutex<Vec<i64>>>,
        series: usize,
    }

    #[async_trait]
    impl Aggregator for Record {
        fn add(&mut self, m: &Metric) {
            self.seen.lock().unwrap().push(value_of(m));
        }

        async fn push(&mut self, acc: &dyn Accumulator) {
            for i in 0..self.series {
                let mut fields = FieldMap::new();
                fields.insert("value".to_string(), FieldValue::Int(i as i64));
                let mut tags = TagMap::new();
                tags.insert("series".to_string(), i.to_string());
                acc.add_fields("record", fields, tags, None).await;
            }
        }

        fn reset(&mut self) {}
    }

    fn record(series: usize) -> (Arc<RunningAggregator>, Arc<Mutex<Vec<i64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut config = AggregatorConfig::new("record");
        config.drop_original = true;
        config.period = Duration::from_secs(3600);
        let agg = RunningAggregator::new(
            config,
            Box::new(Record {
                seen: seen.clone(),
                series,
            }),
            &StatsRegistry::new(),
        );
        agg.update_window(Utc::now() - TimeDelta::seconds(60), false);
        (Arc::new(agg), seen)
    }

    #[tokio::test]
    async fn processors_in_order() {
        let (in_sender, in_receiver) = mpsc::channel(16);
        let (out_sender, mut out_receiver) = mpsc::channel(16);
        let processors = vec![Arc::new(RunningProcessor::new(
            ProcessorConfig::new("drop_odd"),
            Box::new(DropOdd),
        ))];
        let task = tokio::spawn(run_processors(processors, in_receiver, out_sender));
        for i in 1..=4 {
            in_sender.send(metric(i)).await.unwrap();
        }
        drop(in_sender);
        task.await.unwrap();

        let mut values = Vec::new();
        while let Some(m) = out_receiver.recv().await {
            values.push(value_of(&m));
        }
        assert_eq!(values, [2, 4]);
    }

    #[tokio::test]
    async fn final_push_after_drain() {
        let (agg, seen) = record(1);
        let (in_sender, in_receiver) = mpsc::channel(16);
        let (out_sender, mut out_receiver) = mpsc::channel(16);
        let (agg_sender, mut agg_receiver) = mpsc::channel(16);

        let push_quit = CancellationToken::new();
        let acc = MetricAccumulator::new(agg.clone(), agg_sender);
        let pusher = tokio::spawn(push_aggregator(agg.clone(), acc, push_quit.clone()));
        let task = tokio::spawn(run_aggregators(
            vec![agg],
            in_receiver,
            out_sender,
            vec![pusher],
            push_quit,
        ));

        for i in 0..3 {
            in_sender.send(metric(i)).await.unwrap();
        }
        drop(in_sender);
        task.await.unwrap();

        // everything was added before the last push
        assert_eq!(*seen.lock().unwrap(), [0, 1, 2]);
        assert!(out_receiver.recv().await.is_none());
        assert!(agg_receiver.recv().await.is_some());
        assert!(agg_receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn push_beyond_channel_capacity() {
        let (agg, seen) = record(64);
        let (in_sender, in_receiver) = mpsc::channel(4);
        let (out_sender, _out_receiver) = mpsc::channel(4);
        let (agg_sender, mut agg_receiver) = mpsc::channel(4);

        // nobody reads the aggregate channel yet, this push gets stuck
        let stuck = {
            let agg = agg.clone();
            let acc = MetricAccumulator::new(agg.clone(), agg_sender.clone());
            tokio::spawn(async move { agg.push(&acc).await })
        };
        let push_quit = CancellationToken::new();
        let acc = MetricAccumulator::new(agg.clone(), agg_sender);
        let pusher = tokio::spawn(push_aggregator(agg.clone(), acc, push_quit.clone()));
        let task = tokio::spawn(run_aggregators(
            vec![agg],
            in_receiver,
            out_sender,
            vec![pusher],
            push_quit,
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            for i in 0..32 {
                in_sender.send(metric(i)).await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(!stuck.is_finished());

        let reader = tokio::spawn(async move {
            let mut pushed = 0;
            while agg_receiver.recv().await.is_some() {
                pushed += 1;
            }
            pushed
        });
        drop(in_sender);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        stuck.await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 32);
        assert_eq!(reader.await.unwrap(), 128);
    }
}
