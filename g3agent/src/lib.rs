/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub mod accumulator;
pub mod agent;
pub mod buffer;
pub mod build;
pub mod config;
pub mod log;
pub mod models;
pub mod opts;
pub mod plugins;
pub mod signal;
pub mod stats;
pub mod ticker;
