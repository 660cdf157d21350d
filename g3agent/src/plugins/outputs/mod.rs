/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::PluginRegistry;

mod discard;
mod file;

pub(super) fn register(registry: &mut PluginRegistry) {
    registry.add_output("discard", discard::DiscardOutput::build);
    registry.add_output("file", file::FileOutput::build);
}
