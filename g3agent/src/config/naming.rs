/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use yaml_rust::Yaml;

use g3_metric::Metric;

use super::value;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricNaming {
    pub name_override: Option<String>,
    pub name_prefix: Option<String>,
    pub name_suffix: Option<String>,
}

impl MetricNaming {
    pub(crate) fn set(&mut self, key: &str, v: &Yaml) -> anyhow::Result<bool> {
        match key {
            "name_override" => self.name_override = Some(value::as_string(v)?),
            "name_prefix" => self.name_prefix = Some(value::as_string(v)?),
            "name_suffix" => self.name_suffix = Some(value::as_string(v)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Override first, then prefix and suffix.
    pub fn apply(&self, m: &mut Metric) {
        if let Some(name) = &self.name_override {
            m.set_name(name);
        }
        if let Some(prefix) = &self.name_prefix {
            m.add_prefix(prefix);
        }
        if let Some(suffix) = &self.name_suffix {
            m.add_suffix(suffix);
        }
    }
}
