/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Arg, ArgAction, Command, ValueHint, value_parser};
use clap_complete::Shell;

const ARGS_COMPLETION: &str = "completion";
const ARGS_VERSION: &str = "version";
const ARGS_VERBOSE: &str = "verbose";
const ARGS_TEST_CONFIG: &str = "test-config";
const ARGS_TEST: &str = "test";
const ARGS_ONCE: &str = "once";
const ARGS_TEST_WAIT: &str = "test-wait";
const ARGS_CONFIG_FILE: &str = "config-file";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Daemon,
    /// Gather once and print, no output is written.
    Test,
    /// Gather once and write to all outputs.
    Once,
}

#[derive(Debug, Default)]
pub struct ProcArgs {
    pub verbose_level: u8,
    pub config_file: PathBuf,
    pub test_config: bool,
    pub mode: RunMode,
    /// How long to wait for service inputs in test or once mode.
    pub test_wait: Duration,
}

fn build_cli_args() -> Command {
    Command::new(crate::build::PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(ARGS_COMPLETION)
                .num_args(1)
                .value_name("SHELL")
                .long("completion")
                .value_parser(value_parser!(Shell))
                .exclusive(true),
        )
        .arg(
            Arg::new(ARGS_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long(ARGS_VERSION),
        )
        .arg(
            Arg::new(ARGS_VERBOSE)
                .help("Show verbose output")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v')
                .long(ARGS_VERBOSE),
        )
        .arg(
            Arg::new(ARGS_TEST_CONFIG)
                .help("Test the format of config file and exit")
                .action(ArgAction::SetTrue)
                .short('t')
                .long(ARGS_TEST_CONFIG),
        )
        .arg(
            Arg::new(ARGS_TEST)
                .help("Gather metrics once, print them to stdout and exit")
                .action(ArgAction::SetTrue)
                .conflicts_with(ARGS_ONCE)
                .long(ARGS_TEST),
        )
        .arg(
            Arg::new(ARGS_ONCE)
                .help("Gather metrics once, write them to the outputs and exit")
                .action(ArgAction::SetTrue)
                .long(ARGS_ONCE),
        )
        .arg(
            Arg::new(ARGS_TEST_WAIT)
                .help("Time to wait for service inputs in test or once mode")
                .num_args(1)
                .value_name("DURATION")
                .default_value("0")
                .long(ARGS_TEST_WAIT),
        )
        .arg(
            Arg::new(ARGS_CONFIG_FILE)
                .help("Config file path")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .required_unless_present_any([ARGS_COMPLETION, ARGS_VERSION])
                .short('c')
                .long(ARGS_CONFIG_FILE),
        )
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    match humanize_rs::duration::parse(s) {
        Ok(d) => Ok(d),
        Err(_) => s
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| anyhow!("invalid duration {s}")),
    }
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args_parser = build_cli_args();
    let args = args_parser.get_matches();

    if let Some(target) = args.get_one::<Shell>(ARGS_COMPLETION) {
        let mut app = build_cli_args();
        let bin_name = app.get_name().to_string();
        clap_complete::generate(*target, &mut app, bin_name, &mut io::stdout());
        return Ok(None);
    }

    let mut proc_args = ProcArgs {
        verbose_level: args.get_count(ARGS_VERBOSE),
        ..Default::default()
    };

    if args.get_flag(ARGS_VERSION) {
        crate::build::print_version(proc_args.verbose_level);
        return Ok(None);
    }
    if args.get_flag(ARGS_TEST_CONFIG) {
        proc_args.test_config = true;
    }
    if args.get_flag(ARGS_TEST) {
        proc_args.mode = RunMode::Test;
    } else if args.get_flag(ARGS_ONCE) {
        proc_args.mode = RunMode::Once;
    }
    if let Some(wait) = args.get_one::<String>(ARGS_TEST_WAIT) {
        proc_args.test_wait = parse_duration(wait)?;
    }
    if let Some(config_file) = args.get_one::<PathBuf>(ARGS_CONFIG_FILE) {
        proc_args.config_file = config_file.clone();
    } else {
        return Err(anyhow!("no config file given"));
    }

    Ok(Some(proc_args))
}
