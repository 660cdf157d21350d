/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

use g3_metric::{Filter, TagMap};

use super::{MetricNaming, filter, value as y};

#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    pub plugin: String,
    pub alias: Option<String>,
    pub naming: MetricNaming,
    pub tags: TagMap,
    pub filter: Filter,
    pub period: Duration,
    pub delay: Duration,
    pub grace: Duration,
    pub drop_original: bool,
}

impl AggregatorConfig {
    pub fn new(plugin: &str) -> Self {
        AggregatorConfig {
            plugin: plugin.to_string(),
            alias: None,
            naming: MetricNaming::default(),
            tags: TagMap::new(),
            filter: Filter::default(),
            period: Duration::from_secs(30),
            delay: Duration::from_millis(100),
            grace: Duration::ZERO,
            drop_original: false,
        }
    }

    pub(crate) fn parse(plugin: &str, map: &yaml::Hash) -> anyhow::Result<(Self, yaml::Hash)> {
        let mut config = AggregatorConfig::new(plugin);
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
            "period" => self.period = y::as_duration(v)?,
            "delay" => self.delay = y::as_duration(v)?,
            "grace" => self.grace = y::as_duration(v)?,
            "drop_original" => self.drop_original = y::as_bool(v)?,
            _ => {
                return Ok(self.naming.set(key, v)?
                    || filter::set_filter_key(&mut self.filter, key, v)?);
            }
        }
        Ok(true)
    }

    fn check(&mut self) -> anyhow::Result<()> {
        if self.period.is_zero() {
            return Err(anyhow!("period should not be zero"));
        }
        self.filter
            .compile()
            .context(format!("invalid filter for aggregator {}", self.plugin))
    }

    pub fn log_name(&self) -> String {
        match &self.alias {
            Some(alias) => format!("aggregators.{}::{alias}", self.plugin),
            None => format!("aggregators.{}", self.plugin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_parse() {
        let doc = y::load_str("period: 1m\ndrop_original: true\nfieldpass: [value]");
        let (config, options) =
            AggregatorConfig::parse("minmax", doc.as_hash().unwrap()).unwrap();
        assert_eq!(config.period, Duration::from_secs(60));
        assert_eq!(config.delay, Duration::from_millis(100));
        assert!(config.drop_original);
        assert!(config.filter.is_active());
        assert!(options.is_empty());
    }
}
