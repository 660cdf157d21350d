/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use log::info;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

fn register_one(kind: SignalKind, name: &str, quit: &CancellationToken) -> anyhow::Result<()> {
    let mut sig =
        signal(kind).map_err(|e| anyhow!("failed to create {name} listener: {e}"))?;
    let quit = quit.clone();
    let name = name.to_string();
    tokio::spawn(async move {
        if sig.recv().await.is_some() {
            info!("got {name} signal");
            quit.cancel();
        }
    });
    Ok(())
}

/// Cancel `quit` on SIGINT, SIGTERM or SIGQUIT.
pub fn register(quit: &CancellationToken) -> anyhow::Result<()> {
    register_one(SignalKind::interrupt(), "SIGINT", quit)?;
    register_one(SignalKind::terminate(), "SIGTERM", quit)?;
    register_one(SignalKind::quit(), "SIGQUIT", quit)
}
