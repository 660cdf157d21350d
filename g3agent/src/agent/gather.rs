/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use log::{debug, error, warn};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::accumulator::{Accumulator, MetricAccumulator};
use crate::models::RunningInput;
use crate::ticker::Ticker;

/// An input with the accumulator it gathers into.
#[derive(Clone)]
pub(super) struct GatherUnit {
    pub(super) input: Arc<RunningInput>,
    pub(super) acc: Arc<MetricAccumulator>,
    pub(super) jitter: Duration,
}

fn panic_message(p: &(dyn Any + Send)) -> &str {
    if let Some(s) = p.downcast_ref::<&str>() {
        s
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

pub(super) fn random_delay(max: Duration) -> Duration {
    let max = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
    if max == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(fastrand::u64(0..max))
    }
}

/// Run one gather call, containing any panic inside the plugin.
pub(super) async fn gather_once(unit: &GatherUnit, interval: Duration) {
    let name = unit.input.log_name();
    let gather = AssertUnwindSafe(unit.input.gather(unit.acc.as_ref())).catch_unwind();
    tokio::pin!(gather);

    let mut slow = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            r = &mut gather => {
                match r {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => unit.acc.add_error(e),
                    Err(p) => error!(
                        "FATAL: [{name}] panicked: {}, please report this panic",
                        panic_message(p.as_ref())
                    ),
                }
                return;
            }
            _ = slow.tick() => {
                warn!("[{name}] did not complete within its interval");
            }
        }
    }
}

/// Gather all inputs on a shared tick, one wave at a time.
pub(super) async fn gather_parallel(
    units: Vec<GatherUnit>,
    interval: Duration,
    round: bool,
    quit: CancellationToken,
) {
    if units.is_empty() {
        return;
    }
    let mut ticker = Ticker::new(round, interval, Duration::ZERO);
    loop {
        tokio::select! {
            biased;

            _ = quit.cancelled() => break,
            t = ticker.elapsed() => {
                if t.is_none() {
                    break;
                }
            }
        }

        let mut wave = JoinSet::new();
        for unit in &units {
            let unit = unit.clone();
            let quit = quit.clone();
            wave.spawn(async move {
                if !unit.jitter.is_zero() {
                    tokio::select! {
                        _ = quit.cancelled() => return,
                        _ = tokio::time::sleep(random_delay(unit.jitter)) => {}
                    }
                }
                gather_once(&unit, interval).await;
            });
        }
        while let Some(r) = wave.join_next().await {
            if let Err(e) = r {
                error!("gather task failed: {e}");
            }
        }
    }
    ticker.stop().await;
}

/// Gather a single input on its own ticker.
pub(super) async fn gather_separate(
    unit: GatherUnit,
    interval: Duration,
    round: bool,
    quit: CancellationToken,
) {
    let mut ticker = Ticker::new(round, interval, unit.jitter);
    loop {
        tokio::select! {
            biased;

            _ = quit.cancelled() => break,
            t = ticker.elapsed() => {
                if t.is_none() {
                    break;
                }
                gather_once(&unit, interval).await;
            }
        }
    }
    ticker.stop().await;
    debug!("[{}] gather loop stopped", unit.input.log_name());
}
