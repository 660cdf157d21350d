/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::PluginRegistry;

mod overrides;

pub(super) fn register(registry: &mut PluginRegistry) {
    registry.add_processor("override", overrides::OverrideProcessor::build);
}
