/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;
use yaml_rust::yaml;

use g3_metric::Metric;

use crate::plugins::{Output, PluginContext};

pub(super) struct DiscardOutput;

impl DiscardOutput {
    pub(super) fn build(
        options: &yaml::Hash,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Box<dyn Output>> {
        crate::plugins::no_options("discard", options)?;
        Ok(Box::new(DiscardOutput))
    }
}

#[async_trait]
impl Output for DiscardOutput {
    async fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn write(&mut self, _metrics: &[Metric]) -> anyhow::Result<()> {
        Ok(())
    }
}
