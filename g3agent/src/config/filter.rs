/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use yaml_rust::Yaml;

use g3_metric::Filter;

use super::value;

/// Returns false if `key` is not a filter key.
pub(crate) fn set_filter_key(filter: &mut Filter, key: &str, v: &Yaml) -> anyhow::Result<bool> {
    match key {
        "namepass" => filter.name_pass = value::as_list(v, value::as_string)?,
        "namedrop" => filter.name_drop = value::as_list(v, value::as_string)?,
        "namepass_separator" => filter.name_pass_separators = value::as_string(v)?,
        "namedrop_separator" => filter.name_drop_separators = value::as_string(v)?,
        "fieldpass" => filter.field_pass = value::as_list(v, value::as_string)?,
        "fielddrop" => filter.field_drop = value::as_list(v, value::as_string)?,
        "tagpass" => filter.tag_pass = value::as_tag_filters(v)?,
        "tagdrop" => filter.tag_drop = value::as_tag_filters(v)?,
        "taginclude" => filter.tag_include = value::as_list(v, value::as_string)?,
        "tagexclude" => filter.tag_exclude = value::as_list(v, value::as_string)?,
        _ => return Ok(false),
    }
    Ok(true)
}
