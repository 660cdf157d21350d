/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::PluginRegistry;

mod minmax;

pub(super) fn register(registry: &mut PluginRegistry) {
    registry.add_aggregator("minmax", minmax::MinMaxAggregator::build);
}
