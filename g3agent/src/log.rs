/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io::{self, Write};

use chrono::Local;
use slog::{Drain, Key, OwnedKVList, Record, Serializer, slog_o};
use slog_scope::GlobalLoggerGuard;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

struct KvCollector<'a> {
    buf: &'a mut Vec<u8>,
}

impl Serializer for KvCollector<'_> {
    fn emit_arguments(&mut self, key: Key, val: &fmt::Arguments) -> slog::Result {
        write!(self.buf, " {key}: {val},")?;
        Ok(())
    }
}

/// Plain line format on stderr.
struct StderrDrain;

impl StderrDrain {
    fn format(&self, buf: &mut Vec<u8>, record: &Record, values: &OwnedKVList) -> io::Result<()> {
        write!(buf, "{} {}", Local::now().format(TIME_FORMAT), record.level())?;
        let mut kv = KvCollector { buf };
        let _ = slog::KV::serialize(values, record, &mut kv);
        let _ = slog::KV::serialize(&record.kv(), record, &mut kv);
        let msg = record.msg().to_string();
        if msg.is_empty() {
            write!(buf, " ()")?;
        } else {
            write!(buf, " {msg}")?;
        }
        writeln!(buf, " <{}:{}>", record.module(), record.line())
    }
}

impl Drain for StderrDrain {
    type Ok = ();
    type Err = io::Error;

    fn log(&self, record: &Record, values: &OwnedKVList) -> io::Result<()> {
        let mut buf = Vec::with_capacity(256);
        self.format(&mut buf, record, values)?;
        let mut stderr = io::stderr().lock();
        stderr.write_all(&buf)?;
        stderr.flush()
    }
}

/// Install the process logger and bridge the `log` macros into it.
pub fn setup(verbose_level: u8) -> Result<GlobalLoggerGuard, log::SetLoggerError> {
    let logger = slog::Logger::root(StderrDrain.ignore_res(), slog_o!());
    let scope_guard = slog_scope::set_global_logger(logger);

    let log_level = match verbose_level {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };

    slog_stdlog::init_with_level(log_level)?;
    Ok(scope_guard)
}
