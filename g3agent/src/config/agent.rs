/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::anyhow;
use yaml_rust::{Yaml, yaml};

use g3_metric::TagMap;

use super::value as y;

pub const DEFAULT_METRIC_BATCH_SIZE: usize = 1000;
pub const DEFAULT_METRIC_BUFFER_LIMIT: usize = 10000;

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub interval: Duration,
    pub round_interval: bool,
    /// Zero means derived from the gather interval.
    pub precision: Duration,
    pub collection_jitter: Duration,
    pub flush_interval: Duration,
    pub flush_jitter: Duration,
    pub metric_batch_size: usize,
    pub metric_buffer_limit: usize,
    pub hostname: String,
    pub omit_hostname: bool,
    pub global_tags: TagMap,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            interval: Duration::from_secs(10),
            round_interval: true,
            precision: Duration::ZERO,
            collection_jitter: Duration::ZERO,
            flush_interval: Duration::from_secs(10),
            flush_jitter: Duration::ZERO,
            metric_batch_size: DEFAULT_METRIC_BATCH_SIZE,
            metric_buffer_limit: DEFAULT_METRIC_BUFFER_LIMIT,
            hostname: String::new(),
            omit_hostname: false,
            global_tags: TagMap::new(),
        }
    }
}

impl AgentConfig {
    pub(crate) fn parse(&mut self, map: &yaml::Hash) -> anyhow::Result<()> {
        y::foreach_kv(map, |k, v| self.set(k, v))?;
        self.check()
    }

    fn set(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match y::normalize_key(k).as_str() {
            "interval" => self.interval = y::as_duration(v)?,
            "round_interval" => self.round_interval = y::as_bool(v)?,
            "precision" => self.precision = y::as_duration(v)?,
            "collection_jitter" => self.collection_jitter = y::as_duration(v)?,
            "flush_interval" => self.flush_interval = y::as_duration(v)?,
            "flush_jitter" => self.flush_jitter = y::as_duration(v)?,
            "metric_batch_size" => self.metric_batch_size = y::as_usize(v)?,
            "metric_buffer_limit" => self.metric_buffer_limit = y::as_usize(v)?,
            "hostname" => self.hostname = y::as_string(v)?,
            "omit_hostname" => self.omit_hostname = y::as_bool(v)?,
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    }

    fn check(&mut self) -> anyhow::Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("interval should not be zero"));
        }
        if self.flush_interval.is_zero() {
            return Err(anyhow!("flush_interval should not be zero"));
        }
        if self.metric_batch_size == 0 {
            return Err(anyhow!("metric_batch_size should not be zero"));
        }
        if self.metric_buffer_limit < self.metric_batch_size {
            return Err(anyhow!(
                "metric_buffer_limit should not be less than metric_batch_size"
            ));
        }
        Ok(())
    }

    /// Fill the `host` global tag unless told not to.
    pub fn resolve_hostname(&mut self) {
        if self.omit_hostname {
            return;
        }
        if self.hostname.is_empty() {
            let uname = rustix::system::uname();
            self.hostname = uname.nodename().to_string_lossy().into_owned();
        }
        self.global_tags
            .entry("host".to_string())
            .or_insert_with(|| self.hostname.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let doc = y::load_str(
            r#"
interval: 5s
round-interval: false
flush_interval: 1m
metric_batch_size: 100
metric_buffer_limit: 1000
hostname: node1
"#,
        );
        let mut config = AgentConfig::default();
        config.parse(doc.as_hash().unwrap()).unwrap();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert!(!config.round_interval);
        assert_eq!(config.flush_interval, Duration::from_secs(60));
        assert_eq!(config.metric_batch_size, 100);

        config.resolve_hostname();
        assert_eq!(
            config.global_tags.get("host").map(|s| s.as_str()),
            Some("node1")
        );
    }

    #[test]
    fn invalid() {
        let doc = y::load_str("metric_batch_size: 100\nmetric_buffer_limit: 10");
        let mut config = AgentConfig::default();
        assert!(config.parse(doc.as_hash().unwrap()).is_err());

        let doc = y::load_str("no_such_key: 1");
        let mut config = AgentConfig::default();
        assert!(config.parse(doc.as_hash().unwrap()).is_err());
    }

    #[test]
    fn omit_hostname() {
        let mut config = AgentConfig {
            omit_hostname: true,
            ..Default::default()
        };
        config.resolve_hostname();
        assert!(config.global_tags.is_empty());
    }
}
