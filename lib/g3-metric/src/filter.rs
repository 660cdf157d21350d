/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashSet;

use glob::{MatchOptions, Pattern};
use thiserror::Error;

use crate::{FieldMap, Metric, TagMap};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid pattern {pattern} in {list}: {source}")]
    InvalidPattern {
        list: &'static str,
        pattern: String,
        source: glob::PatternError,
    },
    #[error("invalid separator {separator:?} in {list}")]
    InvalidSeparator { list: &'static str, separator: char },
}

/// Stands in for a literal '/' while custom separators are mapped to '/'.
const SLASH_SUBSTITUTE: char = '\u{E000}';

const SEPARATOR_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn map_separators(s: &str, separators: &[char]) -> String {
    s.chars()
        .map(|c| {
            if separators.contains(&c) {
                '/'
            } else if c == '/' {
                SLASH_SUBSTITUTE
            } else {
                c
            }
        })
        .collect()
}

/// Glob list with an exact lookup for the patterns without wildcards.
///
/// With separators set, `*` and `?` never match one of them.
#[derive(Clone, Debug, Default)]
struct GlobSet {
    exact: HashSet<String>,
    patterns: Vec<Pattern>,
    separators: Vec<char>,
}

impl GlobSet {
    fn build(list: &'static str, values: &[String]) -> Result<Option<Self>, FilterError> {
        GlobSet::build_with_separators(list, values, "")
    }

    fn build_with_separators(
        list: &'static str,
        values: &[String],
        separators: &str,
    ) -> Result<Option<Self>, FilterError> {
        if values.is_empty() {
            return Ok(None);
        }
        let mut set = GlobSet::default();
        for c in separators.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '!') {
                return Err(FilterError::InvalidSeparator { list, separator: c });
            }
            if !set.separators.contains(&c) {
                set.separators.push(c);
            }
        }
        for v in values {
            if v.contains(['*', '?', '[']) {
                let pattern = if set.separators.is_empty() {
                    v.clone()
                } else {
                    map_separators(v, &set.separators)
                };
                let p = Pattern::new(&pattern).map_err(|source| FilterError::InvalidPattern {
                    list,
                    pattern: v.clone(),
                    source,
                })?;
                set.patterns.push(p);
            } else {
                set.exact.insert(v.clone());
            }
        }
        Ok(Some(set))
    }

    fn is_match(&self, s: &str) -> bool {
        if self.exact.contains(s) {
            return true;
        }
        if self.separators.is_empty() {
            return self.patterns.iter().any(|p| p.matches(s));
        }
        let s = map_separators(s, &self.separators);
        self.patterns
            .iter()
            .any(|p| p.matches_with(&s, SEPARATOR_MATCH))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagFilter {
    pub name: String,
    pub values: Vec<String>,
}

impl TagFilter {
    pub fn new(name: &str, values: &[&str]) -> Self {
        TagFilter {
            name: name.to_string(),
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug)]
struct CompiledTagFilter {
    name: String,
    values: GlobSet,
}

fn build_tag_filters(
    list: &'static str,
    filters: &[TagFilter],
) -> Result<Option<Vec<CompiledTagFilter>>, FilterError> {
    if filters.is_empty() {
        return Ok(None);
    }
    let mut compiled = Vec::with_capacity(filters.len());
    for f in filters {
        let values = GlobSet::build(list, &f.values)?.unwrap_or_default();
        compiled.push(CompiledTagFilter {
            name: f.name.clone(),
            values,
        });
    }
    Ok(Some(compiled))
}

fn tags_match(filters: &[CompiledTagFilter], tags: &TagMap) -> bool {
    filters.iter().any(|f| match tags.get(&f.name) {
        Some(v) => f.values.is_match(v),
        None => false,
    })
}

/// `pass AND NOT drop`, an unset side does not take part.
fn pass_and_not_drop<M>(
    pass: Option<&M>,
    drop: Option<&M>,
    is_match: impl Fn(&M) -> bool,
) -> bool {
    let passed = pass.map(&is_match).unwrap_or(true);
    let dropped = drop.map(&is_match).unwrap_or(false);
    passed && !dropped
}

#[derive(Clone, Debug)]
struct CompiledFilter {
    name_pass: Option<GlobSet>,
    name_drop: Option<GlobSet>,
    field_pass: Option<GlobSet>,
    field_drop: Option<GlobSet>,
    tag_pass: Option<Vec<CompiledTagFilter>>,
    tag_drop: Option<Vec<CompiledTagFilter>>,
    tag_include: Option<GlobSet>,
    tag_exclude: Option<GlobSet>,
}

/// Include and exclude rules over metric name, field keys and tags.
///
/// All lists are plain strings until `compile` is called. A filter that was
/// never compiled passes every metric untouched.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub name_pass: Vec<String>,
    /// Characters `*` in `name_pass` does not cross.
    pub name_pass_separators: String,
    pub name_drop: Vec<String>,
    pub name_drop_separators: String,
    pub field_pass: Vec<String>,
    pub field_drop: Vec<String>,
    pub tag_pass: Vec<TagFilter>,
    pub tag_drop: Vec<TagFilter>,
    pub tag_include: Vec<String>,
    pub tag_exclude: Vec<String>,
    compiled: Option<CompiledFilter>,
}

impl Filter {
    pub fn compile(&mut self) -> Result<(), FilterError> {
        if self.compiled.is_some() {
            return Ok(());
        }
        if self.is_empty() {
            return Ok(());
        }

        let compiled = CompiledFilter {
            name_pass: GlobSet::build_with_separators(
                "namepass",
                &self.name_pass,
                &self.name_pass_separators,
            )?,
            name_drop: GlobSet::build_with_separators(
                "namedrop",
                &self.name_drop,
                &self.name_drop_separators,
            )?,
            field_pass: GlobSet::build("fieldpass", &self.field_pass)?,
            field_drop: GlobSet::build("fielddrop", &self.field_drop)?,
            tag_pass: build_tag_filters("tagpass", &self.tag_pass)?,
            tag_drop: build_tag_filters("tagdrop", &self.tag_drop)?,
            tag_include: GlobSet::build("taginclude", &self.tag_include)?,
            tag_exclude: GlobSet::build("tagexclude", &self.tag_exclude)?,
        };
        self.compiled = Some(compiled);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.name_pass.is_empty()
            && self.name_drop.is_empty()
            && self.field_pass.is_empty()
            && self.field_drop.is_empty()
            && self.tag_pass.is_empty()
            && self.tag_drop.is_empty()
            && self.tag_include.is_empty()
            && self.tag_exclude.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.compiled.is_some()
    }

    /// Returns false if the metric should be discarded.
    ///
    /// Fields and tags are trimmed in place, so they are only meaningful
    /// when true is returned.
    pub fn apply(&self, name: &str, fields: &mut FieldMap, tags: &mut TagMap) -> bool {
        let Some(c) = &self.compiled else {
            return true;
        };

        if !c.select_name(name) || !c.select_tags(tags) {
            return false;
        }
        if !c.filter_fields(fields) {
            return false;
        }
        c.filter_tags(tags);
        true
    }

    /// Name and tag pass/drop.
    pub fn select(&self, m: &Metric) -> bool {
        let Some(c) = &self.compiled else {
            return true;
        };
        c.select_name(m.name()) && c.select_tags(m.tags())
    }

    /// Field pass/drop and tag include/exclude, false if no field is left.
    pub fn modify(&self, m: &mut Metric) -> bool {
        let Some(c) = &self.compiled else {
            return true;
        };
        let (_, fields, tags) = m.parts_mut();
        if !c.filter_fields(fields) {
            return false;
        }
        c.filter_tags(tags);
        true
    }
}

impl CompiledFilter {
    fn select_name(&self, name: &str) -> bool {
        pass_and_not_drop(self.name_pass.as_ref(), self.name_drop.as_ref(), |g| {
            g.is_match(name)
        })
    }

    fn select_tags(&self, tags: &TagMap) -> bool {
        pass_and_not_drop(self.tag_pass.as_ref(), self.tag_drop.as_ref(), |t| {
            tags_match(t, tags)
        })
    }

    fn filter_fields(&self, fields: &mut FieldMap) -> bool {
        if self.field_pass.is_some() || self.field_drop.is_some() {
            fields.retain(|k, _| {
                pass_and_not_drop(self.field_pass.as_ref(), self.field_drop.as_ref(), |g| {
                    g.is_match(k)
                })
            });
        }
        !fields.is_empty()
    }

    fn filter_tags(&self, tags: &mut TagMap) {
        if let Some(include) = &self.tag_include {
            tags.retain(|k, _| include.is_match(k));
        }
        if let Some(exclude) = &self.tag_exclude {
            tags.retain(|k, _| !exclude.is_match(k));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn one_field() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("value".to_string(), FieldValue::Int(1));
        fields
    }

    #[test]
    fn uncompiled_passes() {
        let f = Filter {
            name_drop: strings(&["*"]),
            ..Default::default()
        };
        assert!(!f.is_active());
        assert!(f.apply("cpu", &mut one_field(), &mut TagMap::new()));
    }

    #[test]
    fn empty_stays_inactive() {
        let mut f = Filter::default();
        f.compile().unwrap();
        assert!(!f.is_active());
        assert!(f.apply("cpu", &mut one_field(), &mut TagMap::new()));
    }

    #[test]
    fn name_pass_and_drop() {
        let mut f = Filter {
            name_pass: strings(&["foo*"]),
            name_drop: strings(&["foobar"]),
            ..Default::default()
        };
        f.compile().unwrap();
        f.compile().unwrap();
        assert!(f.is_active());
        assert!(!f.apply("foobar", &mut one_field(), &mut TagMap::new()));
        assert!(f.apply("foobaz", &mut one_field(), &mut TagMap::new()));
        assert!(!f.apply("barqux", &mut one_field(), &mut TagMap::new()));
    }

    #[test]
    fn tag_pass_and_drop() {
        let mut f = Filter {
            tag_pass: vec![TagFilter::new("cpu", &["cpu-total", "cpu[0-9]"])],
            tag_drop: vec![TagFilter::new("cpu", &["cpu7"])],
            ..Default::default()
        };
        f.compile().unwrap();

        let tags = |v: &str| {
            let mut t = TagMap::new();
            t.insert("cpu".to_string(), v.to_string());
            t
        };
        assert!(f.apply("m", &mut one_field(), &mut tags("cpu-total")));
        assert!(f.apply("m", &mut one_field(), &mut tags("cpu3")));
        assert!(!f.apply("m", &mut one_field(), &mut tags("cpu7")));
        assert!(!f.apply("m", &mut one_field(), &mut tags("cpu10")));
        assert!(!f.apply("m", &mut one_field(), &mut TagMap::new()));
    }

    #[test]
    fn field_pass_and_drop() {
        let mut f = Filter {
            field_pass: strings(&["usage_*"]),
            field_drop: strings(&["usage_guest"]),
            ..Default::default()
        };
        f.compile().unwrap();

        let mut fields = FieldMap::new();
        fields.insert("usage_idle".to_string(), FieldValue::Float(1.0));
        fields.insert("usage_guest".to_string(), FieldValue::Float(2.0));
        fields.insert("time_idle".to_string(), FieldValue::Float(3.0));
        assert!(f.apply("cpu", &mut fields, &mut TagMap::new()));
        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key("usage_idle"));

        let mut fields = FieldMap::new();
        fields.insert("time_idle".to_string(), FieldValue::Float(3.0));
        assert!(!f.apply("cpu", &mut fields, &mut TagMap::new()));
    }

    #[test]
    fn tag_include_and_exclude() {
        let mut f = Filter {
            tag_include: strings(&["h*"]),
            tag_exclude: strings(&["hidden"]),
            ..Default::default()
        };
        f.compile().unwrap();

        let mut tags = TagMap::new();
        tags.insert("host".to_string(), "a".to_string());
        tags.insert("hidden".to_string(), "b".to_string());
        tags.insert("dc".to_string(), "c".to_string());
        assert!(f.apply("m", &mut one_field(), &mut tags));
        assert_eq!(tags.len(), 1);
        assert!(tags.contains_key("host"));
    }

    #[test]
    fn select_then_modify() {
        let mut f = Filter {
            name_pass: strings(&["cpu"]),
            field_drop: strings(&["value"]),
            ..Default::default()
        };
        f.compile().unwrap();

        let mut fields = one_field();
        fields.insert("other".to_string(), FieldValue::Bool(true));
        let mut m = Metric::new(
            "cpu",
            TagMap::new(),
            fields,
            chrono::Utc::now(),
            crate::MetricKind::Untyped,
        )
        .unwrap();
        assert!(f.select(&m));
        assert!(f.modify(&mut m));
        assert_eq!(m.fields().len(), 1);
        assert!(m.field("other").is_some());
    }

    #[test]
    fn name_pass_with_separators() {
        let mut f = Filter {
            name_pass: strings(&["foo.*.bar", "foo.*.abc.*.bar"]),
            name_pass_separators: ".,".to_string(),
            ..Default::default()
        };
        f.compile().unwrap();
        let c = f.compiled.as_ref().unwrap();

        for name in [
            "foo..bar",
            "foo.abc.bar",
            "foo..abc..bar",
            "foo.xyz.abc.xyz-xyz.bar",
        ] {
            assert!(c.select_name(name), "{name} should pass");
        }
        for name in [
            "foo.bar",
            "foo.abc,.bar",
            "foo..abc.bar",
            "foo.abc.abc.bar",
            "foo.xyz.abc.xyz.xyz.bar",
            "foo.xyz.abc.xyz,xyz.bar",
        ] {
            assert!(!c.select_name(name), "{name} should drop");
        }
    }

    #[test]
    fn name_drop_with_separators() {
        let mut f = Filter {
            name_drop: strings(&["foo.*.bar", "a/*"]),
            name_drop_separators: ".".to_string(),
            ..Default::default()
        };
        f.compile().unwrap();
        let c = f.compiled.as_ref().unwrap();

        assert!(!c.select_name("foo.abc.bar"));
        assert!(c.select_name("foo.a.b.bar"));
        // '/' is not a separator here
        assert!(!c.select_name("a/b/c"));
    }

    #[test]
    fn bad_separator() {
        let mut f = Filter {
            name_pass: strings(&["foo*"]),
            name_pass_separators: "*".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            f.compile(),
            Err(FilterError::InvalidSeparator { separator: '*', .. })
        ));
    }

    #[test]
    fn bad_pattern() {
        let mut f = Filter {
            name_pass: strings(&["cpu[", "mem"]),
            ..Default::default()
        };
        let e = f.compile().unwrap_err();
        assert!(e.to_string().contains("namepass"));
        assert!(!f.is_active());
    }
}
