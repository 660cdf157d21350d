/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader, yaml};

mod aggregator;
mod agent;
mod filter;
mod input;
mod naming;
mod output;
mod processor;
pub(crate) mod value;

pub use agent::{AgentConfig, DEFAULT_METRIC_BATCH_SIZE, DEFAULT_METRIC_BUFFER_LIMIT};
pub use aggregator::AggregatorConfig;
pub use input::InputConfig;
pub use naming::MetricNaming;
pub use output::{OutputConfig, StartupErrorBehavior};
pub use processor::ProcessorConfig;

const CONFIG_KEY_PLUGIN_TYPE: &str = "type";

/// A plugin section: the common settings plus the keys left to the plugin.
pub struct PluginEntry<T> {
    pub config: T,
    pub options: yaml::Hash,
}

#[derive(Default)]
pub struct Config {
    pub agent: AgentConfig,
    pub inputs: Vec<PluginEntry<InputConfig>>,
    pub outputs: Vec<PluginEntry<OutputConfig>>,
    pub processors: Vec<PluginEntry<ProcessorConfig>>,
    pub aggregators: Vec<PluginEntry<AggregatorConfig>>,
}

pub fn load_file(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    load_str(&content).context(format!("invalid config file {}", path.display()))
}

pub fn load_str(content: &str) -> anyhow::Result<Config> {
    let docs = YamlLoader::load_from_str(content).map_err(|e| anyhow!("invalid yaml: {e}"))?;

    let mut config = Config::default();
    // allow multiple docs, and treat them as the same
    for doc in &docs {
        match doc {
            Yaml::Hash(map) => load_doc(&mut config, map)?,
            _ => return Err(anyhow!("yaml doc root should be hash")),
        }
    }
    if config.outputs.is_empty() {
        return Err(anyhow!("no output configured"));
    }
    config.agent.resolve_hostname();
    Ok(config)
}

fn load_doc(config: &mut Config, map: &yaml::Hash) -> anyhow::Result<()> {
    // agent level batch settings are the default of every output
    if let Some(Yaml::Hash(agent)) = map.get(&Yaml::String("agent".to_string())) {
        config.agent.parse(agent)?;
    }

    value::foreach_kv(map, |k, v| match value::normalize_key(k).as_str() {
        "agent" => Ok(()),
        "global_tags" => {
            let tags = value::as_tag_map(v)?;
            config.agent.global_tags.extend(tags);
            Ok(())
        }
        "inputs" => foreach_plugin(v, |plugin, map| {
            let (parsed, options) = InputConfig::parse(plugin, map)?;
            config.inputs.push(PluginEntry {
                config: parsed,
                options,
            });
            Ok(())
        }),
        "outputs" => {
            let batch_size = config.agent.metric_batch_size;
            let buffer_limit = config.agent.metric_buffer_limit;
            foreach_plugin(v, |plugin, map| {
                let (parsed, options) =
                    OutputConfig::parse(plugin, map, batch_size, buffer_limit)?;
                config.outputs.push(PluginEntry {
                    config: parsed,
                    options,
                });
                Ok(())
            })
        }
        "processors" => foreach_plugin(v, |plugin, map| {
            let (parsed, options) = ProcessorConfig::parse(plugin, map)?;
            config.processors.push(PluginEntry {
                config: parsed,
                options,
            });
            Ok(())
        }),
        "aggregators" => foreach_plugin(v, |plugin, map| {
            let (parsed, options) = AggregatorConfig::parse(plugin, map)?;
            config.aggregators.push(PluginEntry {
                config: parsed,
                options,
            });
            Ok(())
        }),
        _ => Err(anyhow!("invalid key {k} in main conf")),
    })
}

fn foreach_plugin<F>(v: &Yaml, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &yaml::Hash) -> anyhow::Result<()>,
{
    let Yaml::Array(seq) = v else {
        return Err(anyhow!("plugin section should be a list of maps"));
    };
    for (i, v) in seq.iter().enumerate() {
        let Yaml::Hash(map) = v else {
            return Err(anyhow!("plugin entry #{i} should be a map"));
        };
        let plugin = value::get_required_str(map, CONFIG_KEY_PLUGIN_TYPE)
            .context(format!("invalid plugin entry #{i}"))?;
        let plugin = value::normalize_key(plugin);
        f(&plugin, map).context(format!("failed to load plugin entry #{i} ({plugin})"))?;
    }
    Ok(())
}
