/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_TRACKING_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingId(u64);

impl TrackingId {
    fn next() -> Self {
        TrackingId(NEXT_TRACKING_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub id: TrackingId,
    pub delivered: bool,
}

pub type DeliveryNotify = Box<dyn Fn(DeliveryInfo) + Send + Sync>;

/// Shared by every copy of a tracked metric.
///
/// The notify callback runs exactly once, when the last copy goes away.
/// The group counts as delivered unless at least one copy was rejected.
pub struct DeliveryTracker {
    id: TrackingId,
    rejected: AtomicBool,
    notify: DeliveryNotify,
}

impl DeliveryTracker {
    pub fn new(notify: DeliveryNotify) -> Self {
        DeliveryTracker {
            id: TrackingId::next(),
            rejected: AtomicBool::new(false),
            notify,
        }
    }

    #[inline]
    pub fn id(&self) -> TrackingId {
        self.id
    }

    pub(crate) fn mark_rejected(&self) {
        self.rejected.store(true, Ordering::Relaxed);
    }
}

impl fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryTracker")
            .field("id", &self.id)
            .field("rejected", &self.rejected.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for DeliveryTracker {
    fn drop(&mut self) {
        let info = DeliveryInfo {
            id: self.id,
            delivered: !self.rejected.load(Ordering::Relaxed),
        };
        (self.notify)(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<DeliveryInfo>>>, DeliveryNotify) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let notify: DeliveryNotify =
            Box::new(move |info: DeliveryInfo| seen2.lock().unwrap().push(info));
        (seen, notify)
    }

    #[test]
    fn notify_once_on_last_drop() {
        let (seen, notify) = recorder();
        let tracker = Arc::new(DeliveryTracker::new(notify));
        let id = tracker.id();
        let copy = tracker.clone();
        drop(tracker);
        assert!(seen.lock().unwrap().is_empty());
        drop(copy);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], DeliveryInfo { id, delivered: true });
    }

    #[test]
    fn any_reject_fails_delivery() {
        let (seen, notify) = recorder();
        let tracker = Arc::new(DeliveryTracker::new(notify));
        let copy = tracker.clone();
        copy.mark_rejected();
        drop(copy);
        drop(tracker);
        assert!(!seen.lock().unwrap()[0].delivered);
    }

    #[test]
    fn unique_ids() {
        let a = DeliveryTracker::new(Box::new(|_: DeliveryInfo| {}));
        let b = DeliveryTracker::new(Box::new(|_: DeliveryInfo| {}));
        assert_ne!(a.id(), b.id());
    }
}
