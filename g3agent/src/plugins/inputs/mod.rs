/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::PluginRegistry;

mod internal;
mod loadavg;

pub(super) fn register(registry: &mut PluginRegistry) {
    registry.add_input("internal", internal::InternalInput::build);
    registry.add_input("loadavg", loadavg::LoadAvgInput::build);
}
