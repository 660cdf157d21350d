/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;
use yaml_rust::yaml;

use crate::accumulator::Accumulator;
use crate::plugins::{Input, PluginContext};
use crate::stats::StatsRegistry;

/// Emits the agent's own stats.
pub(super) struct InternalInput {
    stats: Arc<StatsRegistry>,
}

impl InternalInput {
    pub(super) fn build(
        options: &yaml::Hash,
        ctx: &PluginContext,
    ) -> anyhow::Result<Box<dyn Input>> {
        crate::plugins::no_options("internal", options)?;
        Ok(Box::new(InternalInput {
            stats: ctx.stats.clone(),
        }))
    }
}

#[async_trait]
impl Input for InternalInput {
    async fn gather(&self, acc: &dyn Accumulator) -> anyhow::Result<()> {
        for m in self.stats.snapshot() {
            acc.add_metric(m).await;
        }
        Ok(())
    }
}
