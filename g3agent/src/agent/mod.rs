/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use g3_metric::Metric;

use crate::accumulator::{Accumulator, MetricAccumulator, get_precision};
use crate::config::{
    AgentConfig, AggregatorConfig, Config, InputConfig, OutputConfig, ProcessorConfig,
};
use crate::models::{RunningAggregator, RunningInput, RunningOutput, RunningProcessor, Startup};
use crate::plugins::{Aggregator, Input, Output, PluginContext, PluginRegistry, Processor};
use crate::stats::StatsRegistry;

mod flush;
use flush::FlushSchedule;

mod gather;
use gather::GatherUnit;

mod process;

const METRIC_CHANNEL_SIZE: usize = 1000;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Stage tasks of a running pipeline.
///
/// Each stage ends once its input channel is closed and drained, so closing
/// the input channel shuts the whole pipeline down in order.
struct Stages {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Stages {
    async fn join(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!("{name} task failed: {e}");
            }
        }
    }
}

/// Owns every running plugin and drives gather, aggregation and flush.
pub struct Agent {
    config: AgentConfig,
    stats: Arc<StatsRegistry>,
    inputs: Vec<Arc<RunningInput>>,
    outputs: Vec<Arc<RunningOutput>>,
    processors: Vec<Arc<RunningProcessor>>,
    aggregators: Vec<Arc<RunningAggregator>>,
    /// Processors applied to the aggregator output.
    agg_processors: Vec<Arc<RunningProcessor>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Agent {
            config,
            stats: Arc::new(StatsRegistry::new()),
            inputs: Vec::new(),
            outputs: Vec::new(),
            processors: Vec::new(),
            aggregators: Vec::new(),
            agg_processors: Vec::new(),
        }
    }

    /// Create every configured plugin through the registry.
    pub fn build(config: Config, registry: &PluginRegistry) -> anyhow::Result<Self> {
        let mut agent = Agent::new(config.agent);
        let ctx = PluginContext {
            stats: agent.stats.clone(),
        };

        for entry in config.inputs {
            let name = entry.config.log_name();
            let factory = registry
                .input(&entry.config.plugin)
                .ok_or_else(|| anyhow!("undefined input plugin {}", entry.config.plugin))?;
            let input = factory(&entry.options, &ctx)
                .context(format!("failed to create input {name}"))?;
            agent.add_input(entry.config, input);
        }
        for entry in config.outputs {
            let name = entry.config.log_name();
            let factory = registry
                .output(&entry.config.plugin)
                .ok_or_else(|| anyhow!("undefined output plugin {}", entry.config.plugin))?;
            let output = factory(&entry.options, &ctx)
                .context(format!("failed to create output {name}"))?;
            agent.add_output(entry.config, output);
        }
        for entry in config.processors {
            let name = entry.config.log_name();
            let factory = registry
                .processor(&entry.config.plugin)
                .ok_or_else(|| anyhow!("undefined processor plugin {}", entry.config.plugin))?;
            let processor = factory(&entry.options, &ctx)
                .context(format!("failed to create processor {name}"))?;
            // the aggregate chain needs its own plugin state
            let agg_processor = factory(&entry.options, &ctx)
                .context(format!("failed to create processor {name}"))?;
            agent.add_processor(entry.config.clone(), processor);
            agent.add_aggregate_processor(entry.config, agg_processor);
        }
        for entry in config.aggregators {
            let name = entry.config.log_name();
            let factory = registry
                .aggregator(&entry.config.plugin)
                .ok_or_else(|| anyhow!("undefined aggregator plugin {}", entry.config.plugin))?;
            let aggregator = factory(&entry.options, &ctx)
                .context(format!("failed to create aggregator {name}"))?;
            agent.add_aggregator(entry.config, aggregator);
        }
        Ok(agent)
    }

    pub fn add_input(&mut self, config: InputConfig, input: Box<dyn Input>) {
        let mut running = RunningInput::new(config, input, &self.stats);
        running.set_default_tags(&self.config.global_tags);
        self.inputs.push(Arc::new(running));
    }

    pub fn add_output(&mut self, config: OutputConfig, output: Box<dyn Output>) {
        let running = RunningOutput::new(config, output, &self.stats);
        self.outputs.push(Arc::new(running));
    }

    /// Processors are kept sorted by order, ties in insertion order.
    pub fn add_processor(&mut self, config: ProcessorConfig, processor: Box<dyn Processor>) {
        let running = RunningProcessor::new(config, processor);
        self.processors.push(Arc::new(running));
        self.processors.sort_by_key(|p| p.order());
    }

    /// Same as [`Agent::add_processor`], for metrics emitted by aggregators.
    pub fn add_aggregate_processor(
        &mut self,
        config: ProcessorConfig,
        processor: Box<dyn Processor>,
    ) {
        let running = RunningProcessor::new(config, processor);
        self.agg_processors.push(Arc::new(running));
        self.agg_processors.sort_by_key(|p| p.order());
    }

    pub fn add_aggregator(&mut self, config: AggregatorConfig, aggregator: Box<dyn Aggregator>) {
        let mut running = RunningAggregator::new(config, aggregator, &self.stats);
        running.set_default_tags(&self.config.global_tags);
        self.aggregators.push(Arc::new(running));
    }

    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    #[inline]
    pub fn outputs(&self) -> &[Arc<RunningOutput>] {
        &self.outputs
    }

    fn gather_unit(
        &self,
        input: &Arc<RunningInput>,
        sender: &mpsc::Sender<Metric>,
    ) -> GatherUnit {
        let config = input.config();
        let interval = config.interval.unwrap_or(self.config.interval);
        let precision = if config.precision.is_zero() {
            self.config.precision
        } else {
            config.precision
        };
        let mut acc = MetricAccumulator::new(input.clone(), sender.clone());
        acc.set_precision(get_precision(precision, interval));
        GatherUnit {
            input: input.clone(),
            acc: Arc::new(acc),
            jitter: config
                .collection_jitter
                .unwrap_or(self.config.collection_jitter),
        }
    }

    fn aggregator_acc(
        &self,
        agg: &Arc<RunningAggregator>,
        sender: &mpsc::Sender<Metric>,
    ) -> MetricAccumulator {
        let mut acc = MetricAccumulator::new(agg.clone(), sender.clone());
        acc.set_precision(get_precision(self.config.precision, self.config.interval));
        acc
    }

    /// Connect every output, returning the ones taking part in the pipeline.
    async fn connect_outputs(
        &self,
        quit: &CancellationToken,
    ) -> anyhow::Result<Vec<Arc<RunningOutput>>> {
        let mut active = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            debug!("attempting connection to [{}]", output.log_name());
            let started = match output.start().await {
                Ok(started) => started,
                Err(e) => {
                    warn!(
                        "Failed to connect to [{}], retrying in {CONNECT_RETRY_DELAY:?}, error was: {e:?}",
                        output.log_name()
                    );
                    let retried = tokio::select! {
                        _ = quit.cancelled() => Err(anyhow!("interrupted while connecting")),
                        _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => output.start().await,
                    };
                    match retried {
                        Ok(started) => started,
                        Err(e) => {
                            close_outputs(&active).await;
                            return Err(
                                e.context(format!("failed to connect to [{}]", output.log_name()))
                            );
                        }
                    }
                }
            };
            match started {
                Startup::Connected => {
                    debug!("successfully connected to [{}]", output.log_name());
                    active.push(output.clone());
                }
                Startup::Retrying => active.push(output.clone()),
                Startup::Ignored => {}
            }
        }
        Ok(active)
    }

    /// Spawn the stages behind the returned sender: processors, aggregators,
    /// outputs. Aggregates go through their own processor chain before
    /// joining the output stage.
    fn start_stages(
        &self,
        outputs: Vec<Arc<RunningOutput>>,
        print: bool,
    ) -> (mpsc::Sender<Metric>, Stages) {
        let (sender, input_receiver) = mpsc::channel(METRIC_CHANNEL_SIZE);
        let (processed_sender, processed_receiver) = mpsc::channel(METRIC_CHANNEL_SIZE);
        let (agg_sender, agg_receiver) = mpsc::channel(METRIC_CHANNEL_SIZE);
        let (output_sender, output_receiver) = mpsc::channel(METRIC_CHANNEL_SIZE);

        let mut tasks = Vec::with_capacity(4);
        tasks.push((
            "processor",
            tokio::spawn(process::run_processors(
                self.processors.clone(),
                input_receiver,
                processed_sender,
            )),
        ));

        let push_quit = CancellationToken::new();
        let now = Utc::now();
        let pushers = self
            .aggregators
            .iter()
            .map(|agg| {
                agg.update_window(now, self.config.round_interval);
                let acc = self.aggregator_acc(agg, &agg_sender);
                tokio::spawn(process::push_aggregator(
                    agg.clone(),
                    acc,
                    push_quit.clone(),
                ))
            })
            .collect();
        drop(agg_sender);
        tasks.push((
            "aggregator",
            tokio::spawn(process::run_aggregators(
                self.aggregators.clone(),
                processed_receiver,
                output_sender.clone(),
                pushers,
                push_quit,
            )),
        ));
        tasks.push((
            "aggregate processor",
            tokio::spawn(process::run_processors(
                self.agg_processors.clone(),
                agg_receiver,
                output_sender,
            )),
        ));

        let output_task = if print {
            tokio::spawn(flush::print_metrics(output_receiver))
        } else {
            let schedule = FlushSchedule {
                interval: self.config.flush_interval,
                jitter: self.config.flush_jitter,
            };
            tokio::spawn(flush::run_outputs(outputs, output_receiver, schedule))
        };
        tasks.push(("output", output_task));

        (sender, Stages { tasks })
    }

    /// Start every service input, stop the started ones if any fails.
    async fn start_services(&self, units: &[GatherUnit]) -> anyhow::Result<()> {
        let mut started: Vec<&GatherUnit> = Vec::new();
        for unit in units {
            let Some(service) = unit.input.service() else {
                continue;
            };
            let acc: Arc<dyn Accumulator> = unit.acc.clone();
            if let Err(e) = service.start(acc).await {
                for unit in started {
                    if let Some(service) = unit.input.service() {
                        service.stop().await;
                    }
                }
                return Err(e.context(format!("failed to start [{}]", unit.input.log_name())));
            }
            started.push(unit);
        }
        Ok(())
    }

    async fn stop_services(&self) {
        for input in &self.inputs {
            if let Some(service) = input.service() {
                debug!("stopping service input [{}]", input.log_name());
                service.stop().await;
            }
        }
    }

    /// Run until `quit` is cancelled.
    pub async fn run(&self, quit: CancellationToken) -> anyhow::Result<()> {
        info!(
            "agent config: interval {:?}, round_interval {}, flush_interval {:?}",
            self.config.interval, self.config.round_interval, self.config.flush_interval
        );
        let outputs = self.connect_outputs(&quit).await?;
        let (sender, stages) = self.start_stages(outputs.clone(), false);

        let units: Vec<GatherUnit> = self
            .inputs
            .iter()
            .map(|input| self.gather_unit(input, &sender))
            .collect();
        drop(sender);
        if let Err(e) = self.start_services(&units).await {
            drop(units);
            stages.join().await;
            close_outputs(&outputs).await;
            return Err(e);
        }

        let mut gather_tasks = Vec::new();
        let mut shared = Vec::new();
        for unit in units {
            match unit.input.interval() {
                Some(interval) => gather_tasks.push(tokio::spawn(gather::gather_separate(
                    unit,
                    interval,
                    self.config.round_interval,
                    quit.clone(),
                ))),
                None => shared.push(unit),
            }
        }
        gather_tasks.push(tokio::spawn(gather::gather_parallel(
            shared,
            self.config.interval,
            self.config.round_interval,
            quit.clone(),
        )));

        quit.cancelled().await;
        info!("shutting down");

        for r in join_all(gather_tasks).await {
            if let Err(e) = r {
                error!("gather task failed: {e}");
            }
        }
        // services drop their input senders on stop
        self.stop_services().await;
        stages.join().await;

        close_outputs(&outputs).await;
        info!("agent stopped");
        Ok(())
    }

    /// Gather every input once, wait for service inputs, then write all outputs.
    pub async fn once(&self, wait: Duration) -> anyhow::Result<()> {
        let outputs = self.connect_outputs(&CancellationToken::new()).await?;
        let r = self.run_once(outputs.clone(), wait, false).await;
        close_outputs(&outputs).await;
        r
    }

    /// Like [`Agent::once`], but print metrics to stdout instead of writing outputs.
    pub async fn test(&self, wait: Duration) -> anyhow::Result<()> {
        self.run_once(Vec::new(), wait, true).await
    }

    async fn run_once(
        &self,
        outputs: Vec<Arc<RunningOutput>>,
        wait: Duration,
        print: bool,
    ) -> anyhow::Result<()> {
        let (sender, stages) = self.start_stages(outputs, print);
        let units: Vec<GatherUnit> = self
            .inputs
            .iter()
            .map(|input| self.gather_unit(input, &sender))
            .collect();
        drop(sender);

        let r = self.start_services(&units).await;
        if r.is_ok() {
            join_all(units.iter().map(|unit| {
                let interval = unit.input.interval().unwrap_or(self.config.interval);
                gather::gather_once(unit, interval)
            }))
            .await;
            if units.iter().any(|unit| unit.input.service().is_some()) {
                tokio::time::sleep(wait).await;
            }
            self.stop_services().await;
        }
        drop(units);

        // aggregators push only after everything gathered reached them
        stages.join().await;
        r
    }
}

async fn close_outputs(outputs: &[Arc<RunningOutput>]) {
    for output in outputs {
        if let Err(e) = output.close().await {
            error!("Error closing [{}]: {e:?}", output.log_name());
        }
    }
}
