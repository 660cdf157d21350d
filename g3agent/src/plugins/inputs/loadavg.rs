/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use yaml_rust::yaml;

use g3_metric::{FieldMap, FieldValue, TagMap};

use crate::accumulator::Accumulator;
use crate::config::value as y;
use crate::plugins::{Input, PluginContext};

const DEFAULT_LOADAVG_PATH: &str = "/proc/loadavg";

pub(super) struct LoadAvgInput {
    path: PathBuf,
}

impl LoadAvgInput {
    pub(super) fn build(
        options: &yaml::Hash,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Box<dyn Input>> {
        let mut path = PathBuf::from(DEFAULT_LOADAVG_PATH);
        y::foreach_kv(options, |k, v| match y::normalize_key(k).as_str() {
            "path" => {
                path = PathBuf::from(y::as_string(v)?);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        })?;
        Ok(Box::new(LoadAvgInput { path }))
    }
}

/// `0.20 0.18 0.12 1/80 11206`
fn parse_loadavg(content: &str) -> anyhow::Result<FieldMap> {
    let mut parts = content.split_ascii_whitespace();
    let mut fields = FieldMap::new();
    for name in ["load1", "load5", "load15"] {
        let s = parts.next().ok_or_else(|| anyhow!("no {name} value"))?;
        let v = f64::from_str(s).map_err(|e| anyhow!("invalid {name} value {s}: {e}"))?;
        fields.insert(name.to_string(), FieldValue::Float(v));
    }
    if let Some((running, total)) = parts.next().and_then(|s| s.split_once('/')) {
        if let Ok(running) = u64::from_str(running) {
            fields.insert("procs_running".to_string(), FieldValue::Uint(running));
        }
        if let Ok(total) = u64::from_str(total) {
            fields.insert("procs_total".to_string(), FieldValue::Uint(total));
        }
    }
    Ok(fields)
}

#[async_trait]
impl Input for LoadAvgInput {
    async fn gather(&self, acc: &dyn Accumulator) -> anyhow::Result<()> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .context(format!("failed to read {}", self.path.display()))?;
        let fields = parse_loadavg(&content)?;
        acc.add_gauge("system", fields, TagMap::new(), None).await;
        Ok(())
    }
}
