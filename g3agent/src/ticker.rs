/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

fn random_jitter(jitter: Duration) -> Duration {
    let max = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
    if max == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(fastrand::u64(0..max))
    }
}

/// The first boundary after `now`, by multiples of `interval` since the unix epoch.
fn align_offset(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ns = i64::try_from(interval.as_nanos()).unwrap_or(i64::MAX);
    let Some(now_ns) = now.timestamp_nanos_opt() else {
        return interval;
    };
    let rem = now_ns.rem_euclid(interval_ns) as u64;
    interval - Duration::from_nanos(rem)
}

/// Skip to the first scheduled time after `now`.
fn next_after(mut next: Instant, now: Instant, interval: Duration) -> Instant {
    if next > now {
        return next;
    }
    let behind = now.duration_since(next).as_nanos();
    let steps = behind / interval.as_nanos() + 1;
    match u32::try_from(steps) {
        Ok(steps) => next += interval * steps,
        Err(_) => next = now + interval,
    }
    next
}

/// A background clock delivering ticks over a single slot channel.
///
/// Ticks the consumer did not pick up in time collapse into the pending one.
pub struct Ticker {
    receiver: mpsc::Receiver<Instant>,
    quit: CancellationToken,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Ticks on multiples of `interval` in wall clock time, each delayed by jitter.
    pub fn aligned(interval: Duration, jitter: Duration) -> Self {
        Ticker::aligned_at(Utc::now(), interval, jitter)
    }

    fn aligned_at(now: DateTime<Utc>, interval: Duration, jitter: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let first = Instant::now() + align_offset(now, interval);
        Ticker::spawn(|sender, quit| run_scheduled(sender, quit, first, interval, jitter))
    }

    /// First tick one interval from now, then keep the schedule phase.
    pub fn unaligned(interval: Duration, jitter: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let first = Instant::now() + interval;
        Ticker::spawn(|sender, quit| run_scheduled(sender, quit, first, interval, jitter))
    }

    /// Each tick one interval plus jitter after the previous emission.
    pub fn rolling(interval: Duration, jitter: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        Ticker::spawn(|sender, quit| run_rolling(sender, quit, interval, jitter))
    }

    pub fn new(round: bool, interval: Duration, jitter: Duration) -> Self {
        if round {
            Ticker::aligned(interval, jitter)
        } else {
            Ticker::unaligned(interval, jitter)
        }
    }

    fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(mpsc::Sender<Instant>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(1);
        let quit = CancellationToken::new();
        let handle = tokio::spawn(f(sender, quit.clone()));
        Ticker {
            receiver,
            quit,
            handle,
        }
    }

    /// Wait for the next tick. None once the ticker has stopped.
    pub async fn elapsed(&mut self) -> Option<Instant> {
        self.receiver.recv().await
    }

    /// Take a tick that is already pending, without waiting.
    pub fn try_elapsed(&mut self) -> Option<Instant> {
        self.receiver.try_recv().ok()
    }

    /// Stop the background task and wait for it to exit.
    pub async fn stop(self) {
        self.quit.cancel();
        let _ = self.handle.await;
    }
}

fn emit(sender: &mpsc::Sender<Instant>, now: Instant) -> bool {
    match sender.try_send(now) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(_)) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn run_scheduled(
    sender: mpsc::Sender<Instant>,
    quit: CancellationToken,
    first: Instant,
    interval: Duration,
    jitter: Duration,
) {
    let mut next = first;
    loop {
        tokio::select! {
            biased;

            _ = quit.cancelled() => break,
            _ = tokio::time::sleep_until(next + random_jitter(jitter)) => {
                let now = Instant::now();
                if !emit(&sender, now) {
                    break;
                }
                next = next_after(next, now, interval);
            }
        }
    }
}

async fn run_rolling(
    sender: mpsc::Sender<Instant>,
    quit: CancellationToken,
    interval: Duration,
    jitter: Duration,
) {
    let mut next = Instant::now() + interval + random_jitter(jitter);
    loop {
        tokio::select! {
            biased;

            _ = quit.cancelled() => break,
            _ = tokio::time::sleep_until(next) => {
                let now = Instant::now();
                if !emit(&sender, now) {
                    break;
                }
                next = now + interval + random_jitter(jitter);
            }
        }
    }
}
