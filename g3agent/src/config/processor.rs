/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use yaml_rust::{Yaml, yaml};

use g3_metric::Filter;

use super::{filter, value as y};

#[derive(Clone, Debug, Default)]
pub struct ProcessorConfig {
    pub plugin: String,
    pub alias: Option<String>,
    pub order: i64,
    pub filter: Filter,
}

impl ProcessorConfig {
    pub fn new(plugin: &str) -> Self {
        ProcessorConfig {
            plugin: plugin.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn parse(plugin: &str, map: &yaml::Hash) -> anyhow::Result<(Self, yaml::Hash)> {
        let mut config = ProcessorConfig::new(plugin);
        let mut options = yaml::Hash::new();
        y::foreach_kv(map, |k, v| {
            if !config.set(&y::normalize_key(k), v)? {
                options.insert(Yaml::String(k.to_string()), v.clone());
            }
            Ok(())
        })?;
        config
            .filter
            .compile()
            .context(format!("invalid filter for processor {plugin}"))?;
        Ok((config, options))
    }

    fn set(&mut self, key: &str, v: &Yaml) -> anyhow::Result<bool> {
        match key {
            super::CONFIG_KEY_PLUGIN_TYPE => {}
            "alias" => self.alias = Some(y::as_string(v)?),
            "order" => self.order = y::as_i64(v)?,
            _ => return filter::set_filter_key(&mut self.filter, key, v),
        }
        Ok(true)
    }

    pub fn log_name(&self) -> String {
        match &self.alias {
            Some(alias) => format!("processors.{}::{alias}", self.plugin),
            None => format!("processors.{}", self.plugin),
        }
    }
}
