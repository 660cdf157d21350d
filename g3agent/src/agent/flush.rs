/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use g3_metric::Metric;

use super::process::RECV_BATCH_SIZE;
use crate::models::RunningOutput;
use crate::ticker::Ticker;

const FLUSH_START_DELAY: Duration = Duration::from_millis(200);

/// Agent wide flush schedule, outputs may override either part.
#[derive(Clone, Copy, Debug)]
pub(super) struct FlushSchedule {
    pub(super) interval: Duration,
    pub(super) jitter: Duration,
}

/// Fan out to every output, the last one takes the original.
async fn deliver(outputs: &[Arc<RunningOutput>], m: Metric) {
    let Some((last, others)) = outputs.split_last() else {
        return;
    };
    for output in others {
        output.add_metric(m.clone()).await;
    }
    last.add_metric(m).await;
}

/// Move metrics into the outputs until the channel is closed and drained,
/// then stop the flush loops. Each of them flushes one last time.
pub(super) async fn run_outputs(
    outputs: Vec<Arc<RunningOutput>>,
    mut receiver: mpsc::Receiver<Metric>,
    schedule: FlushSchedule,
) {
    let quit = CancellationToken::new();
    let flushers: Vec<_> = outputs
        .iter()
        .map(|output| {
            let config = output.config();
            let schedule = FlushSchedule {
                interval: config.flush_interval.unwrap_or(schedule.interval),
                jitter: config.flush_jitter.unwrap_or(schedule.jitter),
            };
            tokio::spawn(flush_loop(output.clone(), schedule, quit.clone()))
        })
        .collect();

    let mut metrics = Vec::with_capacity(RECV_BATCH_SIZE);
    while receiver.recv_many(&mut metrics, RECV_BATCH_SIZE).await > 0 {
        for m in metrics.drain(..) {
            deliver(&outputs, m).await;
        }
    }

    debug!("output channel closed, final flush of all outputs");
    quit.cancel();
    for r in join_all(flushers).await {
        if let Err(e) = r {
            error!("flush task failed: {e}");
        }
    }
}

/// Print line protocol to stdout instead of using the outputs.
pub(super) async fn print_metrics(mut receiver: mpsc::Receiver<Metric>) {
    while let Some(m) = receiver.recv().await {
        println!("> {m}");
        m.accept();
    }
}

/// Write one output on its own rolling ticker, and whenever a full batch
/// is ready in between.
async fn flush_loop(output: Arc<RunningOutput>, schedule: FlushSchedule, quit: CancellationToken) {
    // let the first gather wave fill the buffer
    tokio::select! {
        _ = quit.cancelled() => {}
        _ = tokio::time::sleep(FLUSH_START_DELAY) => {}
    }

    let mut ticker = Ticker::rolling(schedule.interval, schedule.jitter);
    loop {
        tokio::select! {
            biased;

            _ = quit.cancelled() => {
                debug!("[{}] final flush", output.log_name());
                flush_once(&output, &mut ticker, output.write()).await;
                break;
            }
            t = ticker.elapsed() => {
                if t.is_none() {
                    break;
                }
                flush_once(&output, &mut ticker, output.write()).await;
            }
            _ = output.batch_ready() => {
                if ticker.try_elapsed().is_some() {
                    // the interval is up anyway
                    flush_once(&output, &mut ticker, output.write()).await;
                } else {
                    debug!("[{}] batch ready, writing", output.log_name());
                    flush_once(&output, &mut ticker, output.write_batch()).await;
                }
            }
        }
    }
    ticker.stop().await;
}

/// Wait for `write`, warning on each tick it is still pending.
async fn flush_once<F>(output: &RunningOutput, ticker: &mut Ticker, write: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::pin!(write);
    loop {
        tokio::select! {
            r = &mut write => {
                if let Err(e) = r {
                    error!("Error writing to [{}]: {e:?}", output.log_name());
                }
                output.log_buffer_status();
                return;
            }
            Some(_) = ticker.elapsed() => {
                warn!(
                    "[{}] did not complete within its flush interval",
                    output.log_name()
                );
                output.log_buffer_status();
            }
        }
    }
}
