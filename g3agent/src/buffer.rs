/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex};

use log::warn;

use g3_metric::{Metric, TagMap};

use crate::stats::{Stat, StatsRegistry};

struct Ring {
    slots: Vec<Option<Metric>>,
    first: usize,
    last: usize,
    size: usize,
    // the outstanding batch always covers the oldest slots
    batch_size: usize,
    // ring copies of batch metrics overwritten while the batch is out
    batch_evicted: Vec<Metric>,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ring {
            slots,
            first: 0,
            last: 0,
            size: 0,
            batch_size: 0,
            batch_evicted: Vec::new(),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn pop_front(&mut self) -> Option<Metric> {
        if self.size == 0 {
            return None;
        }
        let m = self.slots[self.first].take();
        self.first = self.next(self.first);
        self.size -= 1;
        m
    }

    /// Returns the evicted metric if it was not part of the outstanding batch.
    fn push(&mut self, m: Metric) -> Option<Metric> {
        let mut dropped = None;
        if self.size == self.capacity() {
            let evicted = self.pop_front();
            if self.batch_evicted.len() < self.batch_size {
                // the writer still holds its copy, it is settled with the batch
                self.batch_evicted.extend(evicted);
            } else {
                dropped = evicted;
            }
        }
        self.slots[self.last] = Some(m);
        self.last = self.next(self.last);
        self.size += 1;
        dropped
    }

    fn peek(&self, count: usize) -> Vec<Metric> {
        let mut batch = Vec::with_capacity(count);
        let mut index = self.first;
        for _ in 0..count {
            if let Some(m) = &self.slots[index] {
                batch.push(m.clone());
            }
            index = self.next(index);
        }
        batch
    }

    fn reset_batch(&mut self) -> Vec<Metric> {
        self.batch_size = 0;
        std::mem::take(&mut self.batch_evicted)
    }
}

struct BufferStats {
    metrics_added: Arc<Stat>,
    metrics_written: Arc<Stat>,
    metrics_dropped: Arc<Stat>,
    buffer_size: Arc<Stat>,
    agent_written: Arc<Stat>,
    agent_dropped: Arc<Stat>,
}

impl BufferStats {
    fn new(tags: &TagMap, registry: &StatsRegistry) -> Self {
        let agent_tags = TagMap::new();
        BufferStats {
            metrics_added: registry.register("write", "metrics_added", tags),
            metrics_written: registry.register("write", "metrics_written", tags),
            metrics_dropped: registry.register("write", "metrics_dropped", tags),
            buffer_size: registry.register("write", "buffer_size", tags),
            agent_written: registry.register("agent", "metrics_written", &agent_tags),
            agent_dropped: registry.register("agent", "metrics_dropped", &agent_tags),
        }
    }

    fn written(&self, n: usize) {
        self.metrics_written.incr(n as i64);
        self.agent_written.incr(n as i64);
    }

    fn dropped(&self, n: usize) {
        self.metrics_dropped.incr(n as i64);
        self.agent_dropped.incr(n as i64);
    }
}

/// Fixed capacity FIFO of metrics for one output.
///
/// When full, the oldest metric is overwritten. A batch handed out by
/// [`Buffer::batch`] stays in the ring until it is settled; slots of the
/// batch that are overwritten in the meantime are rejected as dropped once
/// the batch is settled.
///
/// Metrics are only accepted or rejected after the ring lock is released,
/// delivery callbacks never run under it.
pub struct Buffer {
    name: String,
    ring: Mutex<Ring>,
    stats: BufferStats,
}

impl Buffer {
    /// `stats_tags` identify the owning output in the write statistics.
    pub fn new(name: &str, capacity: usize, stats_tags: &TagMap, registry: &StatsRegistry) -> Self {
        Buffer {
            name: name.to_string(),
            ring: Mutex::new(Ring::new(capacity.max(1))),
            stats: BufferStats::new(stats_tags, registry),
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().unwrap().capacity()
    }

    /// Returns the number of metrics dropped to make room.
    pub fn add<I>(&self, metrics: I) -> usize
    where
        I: IntoIterator<Item = Metric>,
    {
        let mut added = 0;
        let mut dropped = Vec::new();

        let mut ring = self.ring.lock().unwrap();
        for m in metrics {
            added += 1;
            if let Some(old) = ring.push(m) {
                dropped.push(old);
            }
        }
        let size = ring.size;
        drop(ring);

        self.stats.metrics_added.incr(added as i64);
        self.stats.buffer_size.set(size as i64);
        let count = dropped.len();
        if count > 0 {
            self.stats.dropped(count);
            dropped.into_iter().for_each(Metric::reject);
        }
        count
    }

    /// Copy out up to `n` of the oldest metrics as the outstanding batch.
    pub fn batch(&self, n: usize) -> Vec<Metric> {
        let mut ring = self.ring.lock().unwrap();
        let mut stale = Vec::new();
        if ring.batch_size > 0 {
            stale = ring.reset_batch();
            warn!("[{}] previous batch was not settled, rolling it back", self.name);
        }

        let count = ring.size.min(n);
        let batch = if count > 0 {
            ring.batch_size = count;
            ring.peek(count)
        } else {
            Vec::new()
        };
        drop(ring);

        if !stale.is_empty() {
            self.stats.dropped(stale.len());
            stale.into_iter().for_each(Metric::reject);
        }
        batch
    }

    /// Commit the outstanding batch, it leaves the buffer.
    pub fn accept(&self, batch: Vec<Metric>) {
        self.settle(batch, usize::MAX, &[]);
    }

    /// Roll back the outstanding batch, it stays at the head of the buffer.
    pub fn reject(&self, batch: Vec<Metric>) {
        self.settle(batch, 0, &[]);
    }

    /// Commit the first `handled` metrics of the outstanding batch and roll
    /// back the rest. Handled metrics at a `rejected` index are dropped
    /// instead of written.
    pub fn accept_partial(&self, batch: Vec<Metric>, handled: usize, rejected: &[usize]) {
        self.settle(batch, handled, rejected);
    }

    fn settle(&self, batch: Vec<Metric>, handled: usize, rejected: &[usize]) {
        let mut ring = self.ring.lock().unwrap();
        let handled = handled.min(ring.batch_size);
        let evicted = ring.reset_batch();
        // the overwritten part is always the head of the batch
        let overwritten = evicted.len();
        let mut removed = Vec::with_capacity(handled.saturating_sub(overwritten));
        for _ in overwritten..handled {
            if let Some(m) = ring.pop_front() {
                removed.push(m);
            }
        }
        let size = ring.size;
        drop(ring);

        let is_dropped = |i: usize| i < overwritten || (i < handled && rejected.contains(&i));
        let mut written = 0;
        let mut dropped = overwritten;
        evicted.into_iter().for_each(Metric::reject);
        for (i, m) in removed.into_iter().enumerate() {
            if is_dropped(overwritten + i) {
                dropped += 1;
                m.reject();
            } else {
                written += 1;
                m.accept();
            }
        }
        for (i, m) in batch.into_iter().enumerate() {
            if is_dropped(i) {
                m.reject();
            } else {
                m.accept();
            }
        }

        if written > 0 {
            self.stats.written(written);
        }
        if dropped > 0 {
            self.stats.dropped(dropped);
        }
        self.stats.buffer_size.set(size as i64);
    }
}
