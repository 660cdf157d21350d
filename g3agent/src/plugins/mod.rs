/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use thiserror::Error;
use yaml_rust::{Yaml, yaml};

use g3_metric::Metric;

use crate::accumulator::Accumulator;
use crate::stats::StatsRegistry;

pub mod aggregators;
pub mod inputs;
pub mod outputs;
pub mod processors;

#[async_trait]
pub trait Input: Send + Sync {
    async fn gather(&self, acc: &dyn Accumulator) -> anyhow::Result<()>;

    /// Inputs that push on their own also expose start and stop hooks.
    fn as_service(&self) -> Option<&dyn ServiceInput> {
        None
    }
}

#[async_trait]
pub trait ServiceInput: Send + Sync {
    async fn start(&self, acc: Arc<dyn Accumulator>) -> anyhow::Result<()>;
    /// The accumulator given to `start` must be dropped before this returns,
    /// the pipeline drains only after every accumulator is gone.
    async fn stop(&self);
}

#[async_trait]
pub trait Output: Send {
    /// May fail with a [`StartupError`] to let the output's
    /// startup error behavior decide what happens next.
    async fn connect(&mut self) -> anyhow::Result<()>;
    async fn close(&mut self) -> anyhow::Result<()>;
    /// May fail with a [`PartialWriteError`] if only the head of the batch
    /// went through.
    async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()>;

    fn aggregating(&mut self) -> Option<&mut dyn AggregatingOutput> {
        None
    }
}

/// Connect failure of an output.
///
/// Only a retryable error is subject to the startup error behavior, any
/// other connect error stops the agent.
#[derive(Debug, Error)]
#[error("startup failed: {source}")]
pub struct StartupError {
    pub retry: bool,
    #[source]
    pub source: anyhow::Error,
}

/// A write that only got the first `handled` metrics of the batch through.
#[derive(Debug, Error)]
#[error("partial write, {handled} metrics handled: {source}")]
pub struct PartialWriteError {
    pub handled: usize,
    /// Indexes below `handled` that can never be written.
    pub rejected: Vec<usize>,
    #[source]
    pub source: anyhow::Error,
}

/// Outputs that reduce metrics themselves and bypass the raw buffer.
pub trait AggregatingOutput: Send {
    fn add(&mut self, m: Metric);
    fn push(&mut self) -> Vec<Metric>;
    fn reset(&mut self);
}

pub trait Processor: Send {
    fn apply(&mut self, metrics: Vec<Metric>) -> Vec<Metric>;
}

#[async_trait]
pub trait Aggregator: Send {
    fn add(&mut self, m: &Metric);
    async fn push(&mut self, acc: &dyn Accumulator);
    fn reset(&mut self);
}

pub struct PluginContext {
    pub stats: Arc<StatsRegistry>,
}

pub type InputFactory = fn(&yaml::Hash, &PluginContext) -> anyhow::Result<Box<dyn Input>>;
pub type OutputFactory = fn(&yaml::Hash, &PluginContext) -> anyhow::Result<Box<dyn Output>>;
pub type ProcessorFactory =
    fn(&yaml::Hash, &PluginContext) -> anyhow::Result<Box<dyn Processor>>;
pub type AggregatorFactory =
    fn(&yaml::Hash, &PluginContext) -> anyhow::Result<Box<dyn Aggregator>>;

/// Plugin type name to factory, filled by each plugin module.
#[derive(Default)]
pub struct PluginRegistry {
    inputs: HashMap<&'static str, InputFactory>,
    outputs: HashMap<&'static str, OutputFactory>,
    processors: HashMap<&'static str, ProcessorFactory>,
    aggregators: HashMap<&'static str, AggregatorFactory>,
}

impl PluginRegistry {
    pub fn add_input(&mut self, name: &'static str, factory: InputFactory) {
        self.inputs.insert(name, factory);
    }

    pub fn add_output(&mut self, name: &'static str, factory: OutputFactory) {
        self.outputs.insert(name, factory);
    }

    pub fn add_processor(&mut self, name: &'static str, factory: ProcessorFactory) {
        self.processors.insert(name, factory);
    }

    pub fn add_aggregator(&mut self, name: &'static str, factory: AggregatorFactory) {
        self.aggregators.insert(name, factory);
    }

    pub fn input(&self, name: &str) -> Option<InputFactory> {
        self.inputs.get(name).copied()
    }

    pub fn output(&self, name: &str) -> Option<OutputFactory> {
        self.outputs.get(name).copied()
    }

    pub fn processor(&self, name: &str) -> Option<ProcessorFactory> {
        self.processors.get(name).copied()
    }

    pub fn aggregator(&self, name: &str) -> Option<AggregatorFactory> {
        self.aggregators.get(name).copied()
    }
}

/// For plugins without any option of their own.
pub(crate) fn no_options(plugin: &str, options: &yaml::Hash) -> anyhow::Result<()> {
    match options.keys().next() {
        Some(Yaml::String(k)) => Err(anyhow!("invalid key {k} for plugin {plugin}")),
        Some(_) => Err(anyhow!("key in hash should be string")),
        None => Ok(()),
    }
}

/// All built-in plugins.
pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::default();
    inputs::register(&mut registry);
    outputs::register(&mut registry);
    processors::register(&mut registry);
    aggregators::register(&mut registry);
    registry
}
