/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Mutex;

use g3_metric::Metric;

use crate::config::ProcessorConfig;
use crate::plugins::Processor;

pub struct RunningProcessor {
    config: ProcessorConfig,
    log_name: String,
    processor: Mutex<Box<dyn Processor>>,
}

impl RunningProcessor {
    pub fn new(config: ProcessorConfig, processor: Box<dyn Processor>) -> Self {
        RunningProcessor {
            log_name: config.log_name(),
            processor: Mutex::new(processor),
            config,
        }
    }

    #[inline]
    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    #[inline]
    pub fn order(&self) -> i64 {
        self.config.order
    }

    /// Metrics not selected by the filter pass through untouched, in order.
    pub fn apply(&self, metrics: Vec<Metric>) -> Vec<Metric> {
        let filter = &self.config.filter;
        if !filter.is_active() {
            return self.processor.lock().unwrap().apply(metrics);
        }

        let mut processor = self.processor.lock().unwrap();
        let mut out = Vec::with_capacity(metrics.len());
        for mut m in metrics {
            if !filter.select(&m) {
                out.push(m);
                continue;
            }
            if !filter.modify(&mut m) {
                m.accept();
                continue;
            }
            out.extend(processor.apply(vec![m]));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use g3_metric::{FieldMap, FieldValue, MetricKind, TagMap};

    struct Upper;

    impl Processor for Upper {
        fn apply(&mut self, metrics: Vec<Metric>) -> Vec<Metric> {
            metrics
                .into_iter()
                .map(|mut m| {
                    let name = m.name().to_uppercase();
                    m.set_name(&name);
                    m
                })
                .collect()
        }
    }

    fn metric(name: &str) -> Metric {
        let mut fields = FieldMap::new();
        fields.insert("value".to_string(), FieldValue::Int(1));
        Metric::new(name, TagMap::new(), fields, Utc::now(), MetricKind::Untyped).unwrap()
    }

    #[test]
    fn unfiltered() {
        let p = RunningProcessor::new(ProcessorConfig::new("upper"), Box::new(Upper));
        let out = p.apply(vec![metric("cpu"), metric("mem")]);
        let names: Vec<_> = out.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["CPU", "MEM"]);
    }

    #[test]
    fn unselected_bypass() {
        let mut config = ProcessorConfig::new("upper");
        config.filter.name_pass = vec!["cpu".to_string()];
        config.filter.compile().unwrap();
        let p = RunningProcessor::new(config, Box::new(Upper));
        let out = p.apply(vec![metric("mem"), metric("cpu"), metric("disk")]);
        let names: Vec<_> = out.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["mem", "CPU", "disk"]);
    }
}
