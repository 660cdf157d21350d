/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use g3agent::agent::Agent;
use g3agent::opts::{ProcArgs, RunMode};

fn main() -> anyhow::Result<()> {
    let Some(proc_args) =
        g3agent::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    // set up process logger early, only proc args is used inside
    let _log_guard =
        g3agent::log::setup(proc_args.verbose_level).context("failed to setup logger")?;

    let config = g3agent::config::load_file(&proc_args.config_file)
        .context(format!("failed to load config, opts: {proc_args:?}"))?;
    debug!("loaded config from {}", proc_args.config_file.display());

    let registry = g3agent::plugins::registry();
    let agent = Agent::build(config, &registry).context("failed to create plugins")?;

    if proc_args.test_config {
        info!("the format of the config file is ok");
        return Ok(());
    }

    let ret = tokio_run(agent, &proc_args);
    match ret {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{e:?}");
            Err(e)
        }
    }
}

fn tokio_run(agent: Agent, args: &ProcArgs) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("g3agent")
        .build()
        .context("failed to start runtime")?;
    rt.block_on(async {
        match args.mode {
            RunMode::Test => agent.test(args.test_wait).await,
            RunMode::Once => agent.once(args.test_wait).await,
            RunMode::Daemon => {
                let quit = CancellationToken::new();
                g3agent::signal::register(&quit).context("failed to setup signal handler")?;
                info!("{} {} started", g3agent::build::PKG_NAME, g3agent::build::VERSION);
                agent.run(quit).await
            }
        }
    })
}
