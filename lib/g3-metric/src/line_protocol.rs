/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt::{self, Write};

use crate::Metric;

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str, special: &[char]) -> fmt::Result {
    for c in s.chars() {
        if special.contains(&c) {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}

const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
const KEY_SPECIAL: &[char] = &[',', '=', ' '];

/// `name[,tag=value...] field=value[,field=value...] unix_nanos`
impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, self.name(), MEASUREMENT_SPECIAL)?;
        for (k, v) in self.tags() {
            f.write_char(',')?;
            write_escaped(f, k, KEY_SPECIAL)?;
            f.write_char('=')?;
            write_escaped(f, v, KEY_SPECIAL)?;
        }

        let mut sep = ' ';
        for (k, v) in self.fields() {
            f.write_char(sep)?;
            sep = ',';
            write_escaped(f, k, KEY_SPECIAL)?;
            write!(f, "={}", v.display_line_protocol())?;
        }

        let ts = self
            .time()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.time().timestamp().saturating_mul(1_000_000_000));
        f.write_char(' ')?;
        f.write_str(itoa::Buffer::new().format(ts))
    }
}
