/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

use g3_metric::Filter;

use super::{MetricNaming, filter, value as y};

/// What to do when an output fails to connect with a retryable error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartupErrorBehavior {
    /// Stop the agent.
    #[default]
    Error,
    /// Keep the output and connect again before each write.
    Retry,
    /// Leave the output out of the pipeline.
    Ignore,
}

impl FromStr for StartupErrorBehavior {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(StartupErrorBehavior::Error),
            "retry" => Ok(StartupErrorBehavior::Retry),
            "ignore" => Ok(StartupErrorBehavior::Ignore),
            _ => Err(anyhow!("invalid startup error behavior {s}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OutputConfig {
    pub plugin: String,
    pub alias: Option<String>,
    pub naming: MetricNaming,
    pub filter: Filter,
    pub metric_batch_size: usize,
    pub metric_buffer_limit: usize,
    /// Overrides of the agent wide flush schedule.
    pub flush_interval: Option<Duration>,
    pub flush_jitter: Option<Duration>,
    pub startup_error_behavior: StartupErrorBehavior,
}

impl OutputConfig {
    pub fn new(plugin: &str) -> Self {
        OutputConfig {
            plugin: plugin.to_string(),
            alias: None,
            naming: MetricNaming::default(),
            filter: Filter::default(),
            metric_batch_size: super::DEFAULT_METRIC_BATCH_SIZE,
            metric_buffer_limit: super::DEFAULT_METRIC_BUFFER_LIMIT,
            flush_interval: None,
            flush_jitter: None,
            startup_error_behavior: StartupErrorBehavior::default(),
        }
    }

    /// Batch and buffer sizes default to the agent wide ones.
    pub(crate) fn parse(
        plugin: &str,
        map: &yaml::Hash,
        batch_size: usize,
        buffer_limit: usize,
    ) -> anyhow::Result<(Self, yaml::Hash)> {
        let mut config = OutputConfig::new(plugin);
        config.metric_batch_size = batch_size;
        config.metric_buffer_limit = buffer_limit;
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
            "metric_batch_size" => self.metric_batch_size = y::as_usize(v)?,
            "metric_buffer_limit" => self.metric_buffer_limit = y::as_usize(v)?,
            "flush_interval" => self.flush_interval = Some(y::as_duration(v)?),
            "flush_jitter" => self.flush_jitter = Some(y::as_duration(v)?),
            "startup_error_behavior" => {
                self.startup_error_behavior = y::as_string(v)?.parse()?;
            }
            _ => {
                return Ok(self.naming.set(key, v)?
                    || filter::set_filter_key(&mut self.filter, key, v)?);
            }
        }
        Ok(true)
    }

    fn check(&mut self) -> anyhow::Result<()> {
        if self.metric_batch_size == 0 {
            return Err(anyhow!("metric_batch_size should not be zero"));
        }
        if self.metric_buffer_limit < self.metric_batch_size {
            return Err(anyhow!(
                "metric_buffer_limit should not be less than metric_batch_size"
            ));
        }
        if self.flush_interval.is_some_and(|d| d.is_zero()) {
            return Err(anyhow!("flush_interval should not be zero"));
        }
        self.filter
            .compile()
            .context(format!("invalid filter for output {}", self.plugin))
    }

    pub fn log_name(&self) -> String {
        match &self.alias {
            Some(alias) => format!("outputs.{}::{alias}", self.plugin),
            None => format!("outputs.{}", self.plugin),
        }
    }
}
