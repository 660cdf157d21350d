/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::Context;
use yaml_rust::{Yaml, yaml};

use g3_metric::{Filter, TagMap};

use super::{MetricNaming, filter, value as y};

#[derive(Clone, Debug, Default)]
pub struct InputConfig {
    pub plugin: String,
    pub alias: Option<String>,
    pub naming: MetricNaming,
    pub tags: TagMap,
    pub filter: Filter,
    /// Gathered on the shared agent tick if not set.
    pub interval: Option<Duration>,
    pub precision: Duration,
    pub collection_jitter: Option<Duration>,
}

impl InputConfig {
    pub fn new(plugin: &str) -> Self {
        InputConfig {
            plugin: plugin.to_string(),
            ..Default::default()
        }
    }

    /// Returns the config and the plugin specific keys.
    pub(crate) fn parse(plugin: &str, map: &yaml::Hash) -> anyhow::Result<(Self, yaml::Hash)> {
        let mut config = InputConfig::new(plugin);
        let mut options = yaml::Hash::new();
        y::foreach_kv(map, |k, v| {
            if !config.set(&y::normalize_key(k), v)? {
                options.insert(Yaml::String(k.to_string()), v.clone());
            }
            Ok(())
        })?;
        config.check()?;
        Ok((config, options))
    }

    fn set(&mut self, key: &str, v: &Yaml) -> anyhow::Result<bool> {
        match key {
            super::CONFIG_KEY_PLUGIN_TYPE => {}
            "alias" => self.alias = Some(y::as_string(v)?),
            "tags" => self.tags = y::as_tag_map(v)?,
            "interval" => self.interval = Some(y::as_duration(v)?),
            "precision" => self.precision = y::as_duration(v)?,
            "collection_jitter" => self.collection_jitter = Some(y::as_duration(v)?),
            _ => {
                return Ok(self.naming.set(key, v)?
                    || filter::set_filter_key(&mut self.filter, key, v)?);
            }
        }
        Ok(true)
    }

    fn check(&mut self) -> anyhow::Result<()> {
        if self.interval.is_some_and(|d| d.is_zero()) {
            self.interval = None;
        }
        self.filter
            .compile()
            .context(format!("invalid filter for input {}", self.plugin))
    }

    pub fn log_name(&self) -> String {
        match &self.alias {
            Some(alias) => format!("inputs.{}::{alias}", self.plugin),
            None => format!("inputs.{}", self.plugin),
        }
    }
}
