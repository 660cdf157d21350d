/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use log::debug;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use yaml_rust::yaml;

use g3_metric::Metric;

use crate::config::value as y;
use crate::plugins::{Output, PluginContext};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    Stdout,
    Path(PathBuf),
}

impl Target {
    fn parse(s: &str) -> Self {
        match s {
            "stdout" | "-" => Target::Stdout,
            _ => Target::Path(PathBuf::from(s)),
        }
    }
}

/// Line protocol to stdout or append-mode files.
pub(super) struct FileOutput {
    targets: Vec<Target>,
    writers: Vec<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl FileOutput {
    pub(super) fn build(
        options: &yaml::Hash,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Box<dyn Output>> {
        let mut targets = Vec::new();
        y::foreach_kv(options, |k, v| match y::normalize_key(k).as_str() {
            "files" | "file" => {
                targets = y::as_list(v, |v| y::as_string(v).map(|s| Target::parse(&s)))?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        })?;
        if targets.is_empty() {
            targets.push(Target::Stdout);
        }
        Ok(Box::new(FileOutput {
            targets,
            writers: Vec::new(),
        }))
    }
}

#[async_trait]
impl Output for FileOutput {
    async fn connect(&mut self) -> anyhow::Result<()> {
        self.writers.clear();
        for target in &self.targets {
            match target {
                Target::Stdout => self.writers.push(Box::new(tokio::io::stdout())),
                Target::Path(path) => {
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .await
                        .context(format!("failed to open file {}", path.display()))?;
                    self.writers.push(Box::new(file));
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        for w in &mut self.writers {
            w.shutdown().await?;
        }
        self.writers.clear();
        Ok(())
    }

    async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
        if self.writers.is_empty() {
            return Err(anyhow!("not connected"));
        }
        let mut content = String::with_capacity(metrics.len() * 64);
        for m in metrics {
            let _ = writeln!(content, "{m}");
        }
        for w in &mut self.writers {
            w.write_all(content.as_bytes()).await?;
            w.flush().await?;
        }
        debug!("wrote {} metrics to {} targets", metrics.len(), self.writers.len());
        Ok(())
    }
}
