/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod filter;
mod line_protocol;
mod metric;
mod tracking;
mod value;

pub use filter::{Filter, FilterError, TagFilter};
pub use metric::{FieldMap, Metric, MetricKind, TagMap};
pub use tracking::{DeliveryInfo, DeliveryNotify, DeliveryTracker, TrackingId};
pub use value::{DisplayLineProtocolValue, FieldValue};
