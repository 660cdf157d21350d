/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod running_aggregator;
mod running_input;
mod running_output;
mod running_processor;

pub use running_aggregator::RunningAggregator;
pub use running_input::RunningInput;
pub use running_output::{RunningOutput, Startup};
pub use running_processor::RunningProcessor;

#[cfg(test)]
pub(crate) use running_output::tests as output_tests;
