// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! User-declared custom log formats.
//!
//! A [`FormatDefinition`] is a YAML document describing how to take one
//! input line apart: an optional main pattern (regex with named groups or
//! a positional matcher), per-field extractors with transforms, and an
//! optional batch section expanding arrays (`streams[].values[]` style)
//! into one event per element. Definitions are compiled once at
//! configuration time into a [`CompiledFormat`]; per-line processing only
//! walks the precompiled plan; no schema introspection on the hot path.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::Error;
use crate::record::LogRecord;
use crate::severity::Severity;
use crate::timeparse;

/// Top-level shape of the input this format consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    /// Free text, taken apart by the main pattern.
    Text,
    /// One JSON document per logical line.
    Json,
    /// JSON with a declared internal structure (arrays, batches).
    Structured,
}

/// A custom format definition, as deserialized from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatDefinition {
    /// Short identifier for diagnostics.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Author attribution.
    #[serde(default)]
    pub author: Option<String>,
    /// Top-level input shape.
    #[serde(rename = "type")]
    pub format_type: FormatType,
    /// Text pattern section.
    #[serde(default)]
    pub pattern: Option<PatternDef>,
    /// JSON navigation section.
    #[serde(default)]
    pub json: Option<JsonDef>,
    /// Batch expansion section.
    #[serde(default)]
    pub batch: Option<BatchDef>,
    /// Field mapping onto the canonical record.
    pub mapping: MappingDef,
}

/// Main pattern plus optional per-field regexes for text formats.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternDef {
    /// The main pattern: a regex with named groups when `use_regex`,
    /// otherwise a whitespace-positional template with `{name}` slots.
    #[serde(default)]
    pub main: Option<String>,
    /// Extra per-field regexes applied to the whole line; the first
    /// capture group (or whole match) becomes the field value.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Whether `main` is a regex.
    #[serde(default)]
    pub use_regex: bool,
}

/// JSON navigation for json/structured formats.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonDef {
    /// Aliases: field name → dotted path into the document.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Dotted path to an array whose elements are the events.
    #[serde(default)]
    pub array_path: Option<String>,
    /// The document root itself is the event array.
    #[serde(default)]
    pub root_is_array: bool,
}

/// Batch expansion of nested arrays into one event per element.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchDef {
    /// Whether expansion is active.
    #[serde(default)]
    pub enabled: bool,
    /// Expansion path; the supported shapes are `outer[].inner[]` and the
    /// bare root array `[]`.
    pub expand_path: String,
    /// Paths (relative to the outer element, `outer[].key` form) copied
    /// onto every expanded event.
    #[serde(default)]
    pub context_paths: Vec<String>,
    /// Names for positional entries when the expanded elements are
    /// arrays: name → element index.
    #[serde(default)]
    pub entry_template: BTreeMap<String, String>,
}

/// Field mapping onto the canonical record.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDef {
    /// Timestamp extractor.
    #[serde(default)]
    pub timestamp: Option<FieldExtractor>,
    /// Severity extractor.
    #[serde(default)]
    pub severity: Option<FieldExtractor>,
    /// Body extractor.
    #[serde(default)]
    pub body: Option<FieldExtractor>,
    /// Named attribute extractors.
    #[serde(default)]
    pub attributes: BTreeMap<String, FieldExtractor>,
    /// Flatten unmapped fields into attributes by leaf key name.
    #[serde(default)]
    pub auto_map_remaining: bool,
    /// Restrict auto-mapping to these top-level roots.
    #[serde(default)]
    pub auto_map_from: Option<Vec<String>>,
}

/// One field extraction rule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldExtractor {
    /// Dotted field path into the event.
    #[serde(default)]
    pub field: Option<String>,
    /// Template with `{path}` placeholders, applied instead of `field`.
    #[serde(default)]
    pub template: Option<String>,
    /// Post-extraction regex; first capture group (or whole match) wins.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Value transform: `uppercase`, `lowercase`, `trim`,
    /// `status_to_severity`.
    #[serde(default)]
    pub transform: Option<String>,
    /// Timestamp format: `auto`, `unix`, `unix_ms`, `unix_ns`, `rfc3339`,
    /// or a Go-style reference layout.
    #[serde(default)]
    pub time_format: Option<String>,
    /// Fallback value when extraction yields nothing.
    #[serde(default)]
    pub default: Option<String>,
}

/// Value transform applied after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    Uppercase,
    Lowercase,
    Trim,
    StatusToSeverity,
}

impl Transform {
    fn parse(name: &str) -> Result<Transform, Error> {
        match name {
            "uppercase" => Ok(Transform::Uppercase),
            "lowercase" => Ok(Transform::Lowercase),
            "trim" => Ok(Transform::Trim),
            "status_to_severity" => Ok(Transform::StatusToSeverity),
            other => Err(Error::UnknownTransform {
                transform: other.to_owned(),
            }),
        }
    }

    fn apply(self, value: &str) -> String {
        match self {
            Transform::Uppercase => value.to_uppercase(),
            Transform::Lowercase => value.to_lowercase(),
            Transform::Trim => value.trim().to_owned(),
            Transform::StatusToSeverity => status_to_severity(value).as_str().to_owned(),
        }
    }
}

/// HTTP status class → severity.
fn status_to_severity(value: &str) -> Severity {
    match value.trim().parse::<u16>() {
        Ok(code) if (100..200).contains(&code) => Severity::Debug,
        Ok(code) if (200..400).contains(&code) => Severity::Info,
        Ok(code) if (400..500).contains(&code) => Severity::Warn,
        Ok(code) if (500..600).contains(&code) => Severity::Error,
        _ => Severity::Info,
    }
}

#[derive(Debug, Clone)]
enum TimeFormat {
    Auto,
    Unix,
    UnixMs,
    UnixNs,
    Rfc3339,
    Layout(String),
}

impl TimeFormat {
    fn parse(name: &str) -> TimeFormat {
        match name {
            "auto" | "" => TimeFormat::Auto,
            "unix" => TimeFormat::Unix,
            "unix_ms" => TimeFormat::UnixMs,
            "unix_ns" => TimeFormat::UnixNs,
            "rfc3339" => TimeFormat::Rfc3339,
            layout => TimeFormat::Layout(go_layout_to_chrono(layout)),
        }
    }

    fn parse_time(&self, raw: &str) -> Option<DateTime<Utc>> {
        match self {
            TimeFormat::Auto => timeparse::parse_value(&Value::String(raw.to_owned())),
            TimeFormat::Unix => raw
                .parse::<f64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, 0)),
            TimeFormat::UnixMs => raw
                .parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis),
            TimeFormat::UnixNs => raw
                .parse::<i64>()
                .ok()
                .map(DateTime::from_timestamp_nanos),
            TimeFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimeFormat::Layout(fmt) => {
                if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
                    return Some(dt.with_timezone(&Utc));
                }
                chrono::NaiveDateTime::parse_from_str(raw, fmt)
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }
        }
    }
}

/// Best-effort translation of a Go reference layout into a chrono format
/// string. Longest tokens first so numeric fragments do not shadow each
/// other.
fn go_layout_to_chrono(layout: &str) -> String {
    const TOKENS: [(&str, &str); 14] = [
        ("2006", "%Y"),
        ("January", "%B"),
        ("Monday", "%A"),
        (".000000000", "%.f"),
        (".000000", "%.f"),
        (".000", "%.f"),
        ("-07:00", "%:z"),
        ("-0700", "%z"),
        ("Jan", "%b"),
        ("Mon", "%a"),
        ("15", "%H"),
        ("01", "%m"),
        ("02", "%d"),
        ("04", "%M"),
    ];
    let mut out = layout.to_owned();
    for (go, chrono_fmt) in TOKENS {
        out = out.replace(go, chrono_fmt);
    }
    // "05" (seconds) last: it collides with nothing once minutes are gone.
    out.replace("05", "%S")
}

#[derive(Debug)]
struct CompiledExtractor {
    field: Option<String>,
    template: Option<String>,
    post: Option<Regex>,
    transform: Option<Transform>,
    time_format: TimeFormat,
    default: Option<String>,
}

impl CompiledExtractor {
    fn compile(def: &FieldExtractor) -> Result<CompiledExtractor, Error> {
        let post = match &def.pattern {
            Some(pattern) => Some(compile_regex(pattern)?),
            None => None,
        };
        let transform = match &def.transform {
            Some(name) => Some(Transform::parse(name)?),
            None => None,
        };
        Ok(CompiledExtractor {
            field: def.field.clone(),
            template: def.template.clone(),
            post,
            transform,
            time_format: TimeFormat::parse(def.time_format.as_deref().unwrap_or("auto")),
            default: def.default.clone(),
        })
    }

    /// Resolves this extractor against one event.
    fn resolve(&self, event: &Map<String, Value>) -> Option<String> {
        let mut value = if let Some(template) = &self.template {
            Some(render_template(template, event))
        } else if let Some(field) = &self.field {
            lookup(event, field).map(value_to_text)
        } else {
            None
        };
        if let (Some(v), Some(post)) = (&value, &self.post) {
            value = post.captures(v).map(|caps| {
                caps.get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_owned())
                    .unwrap_or_default()
            });
        }
        let resolved = match value {
            Some(v) if !v.is_empty() => v,
            _ => self.default.clone()?,
        };
        Some(match self.transform {
            Some(t) => t.apply(&resolved),
            None => resolved,
        })
    }

    /// Field paths this extractor consumes, for auto-map bookkeeping.
    fn consumed_paths(&self, into: &mut HashSet<String>) {
        if let Some(field) = &self.field {
            let _ = into.insert(field.clone());
        }
        if let Some(template) = &self.template {
            for caps in TEMPLATE_SLOT_RE.captures_iter(template) {
                let _ = into.insert(caps[1].to_owned());
            }
        }
    }
}

static TEMPLATE_SLOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_.@-]+)\}").expect("template slot regex is valid")
});

fn compile_regex(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_owned(),
        details: e.to_string(),
    })
}

fn render_template(template: &str, event: &Map<String, Value>) -> String {
    TEMPLATE_SLOT_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup(event, &caps[1]).map(value_to_text).unwrap_or_default()
        })
        .into_owned()
}

/// Dotted-path lookup into an event document.
fn lookup<'a>(event: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = event.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The two supported batch expansion shapes.
#[derive(Debug, Clone)]
enum ExpandPath {
    /// The document root is the array of events.
    Root,
    /// `outer[].inner[]`: walk the outer array, expand each inner array.
    Nested { outer: String, inner: String },
}

impl ExpandPath {
    fn parse(path: &str) -> Result<ExpandPath, Error> {
        if path == "[]" {
            return Ok(ExpandPath::Root);
        }
        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() == 2 {
            if let (Some(outer), Some(inner)) = (
                segments[0].strip_suffix("[]"),
                segments[1].strip_suffix("[]"),
            ) {
                return Ok(ExpandPath::Nested {
                    outer: outer.to_owned(),
                    inner: inner.to_owned(),
                });
            }
        }
        // Deeper nesting is an acknowledged limitation.
        Err(Error::UnsupportedExpandPath {
            path: path.to_owned(),
        })
    }
}

#[derive(Debug)]
struct CompiledBatch {
    expand: ExpandPath,
    /// (outer key, leaf key): copy `outer_element[leaf]` onto each event.
    context: Vec<String>,
    entry_template: Vec<(String, usize)>,
}

/// A format definition compiled into an executable extraction plan.
#[derive(Debug)]
pub struct CompiledFormat {
    name: String,
    format_type: FormatType,
    main_regex: Option<Regex>,
    positional: Option<Vec<String>>,
    field_regexes: Vec<(String, Regex)>,
    json_fields: Vec<(String, String)>,
    array_path: Option<String>,
    root_is_array: bool,
    batch: Option<CompiledBatch>,
    timestamp: Option<CompiledExtractor>,
    severity: Option<CompiledExtractor>,
    body: Option<CompiledExtractor>,
    attributes: Vec<(String, CompiledExtractor)>,
    auto_map_remaining: bool,
    auto_map_from: Option<Vec<String>>,
    consumed: HashSet<String>,
}

impl CompiledFormat {
    /// Compiles a definition; all regexes and paths are validated here so
    /// per-line extraction cannot fail on configuration problems.
    pub fn compile(def: &FormatDefinition) -> Result<CompiledFormat, Error> {
        let (main_regex, positional) = match &def.pattern {
            Some(pattern) => match (&pattern.main, pattern.use_regex) {
                (Some(main), true) => (Some(compile_regex(main)?), None),
                (Some(main), false) => (
                    None,
                    Some(main.split_whitespace().map(str::to_owned).collect()),
                ),
                (None, _) => (None, None),
            },
            None => (None, None),
        };
        let mut field_regexes = Vec::new();
        if let Some(pattern) = &def.pattern {
            for (name, source) in &pattern.fields {
                field_regexes.push((name.clone(), compile_regex(source)?));
            }
        }
        let batch = match &def.batch {
            Some(batch) if batch.enabled => {
                let expand = ExpandPath::parse(&batch.expand_path)?;
                let context = batch
                    .context_paths
                    .iter()
                    .map(|p| {
                        p.rsplit_once("[].")
                            .map(|(_, leaf)| leaf.to_owned())
                            .unwrap_or_else(|| p.clone())
                    })
                    .collect();
                let entry_template = batch
                    .entry_template
                    .iter()
                    .filter_map(|(name, index)| {
                        index.parse::<usize>().ok().map(|i| (name.clone(), i))
                    })
                    .collect();
                Some(CompiledBatch {
                    expand,
                    context,
                    entry_template,
                })
            }
            _ => None,
        };
        let timestamp = def
            .mapping
            .timestamp
            .as_ref()
            .map(CompiledExtractor::compile)
            .transpose()?;
        let severity = def
            .mapping
            .severity
            .as_ref()
            .map(CompiledExtractor::compile)
            .transpose()?;
        let body = def
            .mapping
            .body
            .as_ref()
            .map(CompiledExtractor::compile)
            .transpose()?;
        let mut attributes = Vec::new();
        for (name, extractor) in &def.mapping.attributes {
            attributes.push((name.clone(), CompiledExtractor::compile(extractor)?));
        }

        let mut consumed = HashSet::new();
        for extractor in [timestamp.as_ref(), severity.as_ref(), body.as_ref()]
            .into_iter()
            .flatten()
        {
            extractor.consumed_paths(&mut consumed);
        }
        for (_, extractor) in &attributes {
            extractor.consumed_paths(&mut consumed);
        }

        Ok(CompiledFormat {
            name: def.name.clone(),
            format_type: def.format_type,
            main_regex,
            positional,
            field_regexes,
            json_fields: def
                .json
                .as_ref()
                .map(|j| {
                    j.fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            array_path: def.json.as_ref().and_then(|j| j.array_path.clone()),
            root_is_array: def.json.as_ref().is_some_and(|j| j.root_is_array),
            batch,
            timestamp,
            severity,
            body,
            attributes,
            auto_map_remaining: def.mapping.auto_map_remaining,
            auto_map_from: def.mapping.auto_map_from.clone(),
            consumed,
        })
    }

    /// Loads and compiles a YAML definition file.
    pub fn from_yaml_file(path: &Path) -> Result<CompiledFormat, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::FormatFileRead {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        let def: FormatDefinition =
            serde_yaml::from_str(&text).map_err(|e| Error::FormatFileParse {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;
        CompiledFormat::compile(&def)
    }

    /// The definition's name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the format to one logical line. `None` means the line does
    /// not match this format and should fall back to builtin detection.
    #[must_use]
    pub fn apply(&self, line: &str, receive_time: DateTime<Utc>) -> Option<Vec<LogRecord>> {
        let events = self.extract_events(line)?;
        Some(
            events
                .into_iter()
                .map(|event| self.event_to_record(&event, line, receive_time))
                .collect(),
        )
    }

    fn extract_events(&self, line: &str) -> Option<Vec<Map<String, Value>>> {
        match self.format_type {
            FormatType::Text => self.extract_text(line).map(|e| vec![e]),
            FormatType::Json | FormatType::Structured => {
                let doc: Value = serde_json::from_str(line).ok()?;
                self.extract_json(doc)
            }
        }
    }

    fn extract_text(&self, line: &str) -> Option<Map<String, Value>> {
        let mut event = Map::new();
        if let Some(main) = &self.main_regex {
            let caps = main.captures(line)?;
            for name in main.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    let _ = event.insert(name.to_owned(), Value::String(m.as_str().to_owned()));
                }
            }
        } else if let Some(slots) = &self.positional {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < slots.len() {
                return None;
            }
            for (slot, token) in slots.iter().zip(&tokens) {
                if let Some(name) = slot.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    let _ = event.insert(name.to_owned(), Value::String((*token).to_owned()));
                } else if slot != token {
                    return None;
                }
            }
        }
        for (name, regex) in &self.field_regexes {
            if let Some(caps) = regex.captures(line) {
                let text = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_owned())
                    .unwrap_or_default();
                let _ = event.insert(name.clone(), Value::String(text));
            }
        }
        if event.is_empty() {
            // Nothing matched; let the builtin pipeline have the line.
            let _ = event.insert("line".to_owned(), Value::String(line.to_owned()));
        }
        Some(event)
    }

    fn extract_json(&self, doc: Value) -> Option<Vec<Map<String, Value>>> {
        let mut events: Vec<Map<String, Value>> = Vec::new();
        if let Some(batch) = &self.batch {
            match &batch.expand {
                ExpandPath::Root => {
                    for entry in doc.as_array()? {
                        events.push(self.entry_to_event(entry, batch, None));
                    }
                }
                ExpandPath::Nested { outer, inner } => {
                    let outers = doc.get(outer)?.as_array()?;
                    for outer_elem in outers {
                        let inners = outer_elem.get(inner).and_then(Value::as_array);
                        for entry in inners.into_iter().flatten() {
                            events.push(self.entry_to_event(entry, batch, Some(outer_elem)));
                        }
                    }
                }
            }
        } else if self.root_is_array {
            for entry in doc.as_array()? {
                events.push(entry.as_object().cloned().unwrap_or_default());
            }
        } else if let Some(path) = &self.array_path {
            let root = doc.as_object()?;
            let array = lookup(root, path)?.as_array()?;
            for entry in array {
                events.push(entry.as_object().cloned().unwrap_or_default());
            }
        } else {
            events.push(doc.as_object().cloned().unwrap_or_default());
        }
        for event in &mut events {
            for (name, path) in &self.json_fields {
                if let Some(value) = lookup(event, path).cloned() {
                    let _ = event.insert(name.clone(), value);
                }
            }
        }
        Some(events)
    }

    fn entry_to_event(
        &self,
        entry: &Value,
        batch: &CompiledBatch,
        outer: Option<&Value>,
    ) -> Map<String, Value> {
        let mut event = match entry {
            Value::Object(obj) => obj.clone(),
            Value::Array(items) => {
                let mut event = Map::new();
                if batch.entry_template.is_empty() {
                    for (i, item) in items.iter().enumerate() {
                        let _ = event.insert(i.to_string(), item.clone());
                    }
                } else {
                    for (name, index) in &batch.entry_template {
                        if let Some(item) = items.get(*index) {
                            let _ = event.insert(name.clone(), item.clone());
                        }
                    }
                }
                event
            }
            other => {
                let mut event = Map::new();
                let _ = event.insert("value".to_owned(), other.clone());
                event
            }
        };
        if let Some(outer_elem) = outer {
            for leaf in &batch.context {
                if let Some(context) = outer_elem.get(leaf) {
                    let _ = event.insert(leaf.clone(), context.clone());
                }
            }
        }
        event
    }

    fn event_to_record(
        &self,
        event: &Map<String, Value>,
        raw_line: &str,
        receive_time: DateTime<Utc>,
    ) -> LogRecord {
        let orig_time = self.timestamp.as_ref().and_then(|extractor| {
            let raw = extractor.resolve(event)?;
            extractor.time_format.parse_time(&raw)
        });
        let severity = self
            .severity
            .as_ref()
            .and_then(|extractor| extractor.resolve(event))
            .map(|text| Severity::from_text(&text))
            .unwrap_or(Severity::Info);
        let message = self
            .body
            .as_ref()
            .and_then(|extractor| extractor.resolve(event))
            .unwrap_or_else(|| raw_line.to_owned())
            .replace('\t', " ");

        let mut attributes: Vec<(String, String)> = Vec::new();
        for (name, extractor) in &self.attributes {
            if let Some(value) = extractor.resolve(event) {
                attributes.push((name.clone(), value));
            }
        }
        if self.auto_map_remaining {
            self.auto_map(event, &mut attributes);
        }

        LogRecord {
            receive_time,
            orig_time,
            severity,
            severity_number: severity.number(),
            message,
            raw_line: raw_line.to_owned(),
            attributes,
        }
    }

    /// Recursively flattens unmapped fields into attributes using leaf key
    /// names.
    fn auto_map(&self, event: &Map<String, Value>, out: &mut Vec<(String, String)>) {
        fn walk(
            prefix: &str,
            value: &Value,
            consumed: &HashSet<String>,
            out: &mut Vec<(String, String)>,
        ) {
            if consumed.contains(prefix) {
                return;
            }
            match value {
                Value::Object(obj) => {
                    for (key, inner) in obj {
                        let path = if prefix.is_empty() {
                            key.clone()
                        } else {
                            format!("{prefix}.{key}")
                        };
                        walk(&path, inner, consumed, out);
                    }
                }
                leaf => {
                    let name = prefix.rsplit('.').next().unwrap_or(prefix);
                    if !out.iter().any(|(k, _)| k == name) {
                        out.push((name.to_owned(), value_to_text(leaf)));
                    }
                }
            }
        }

        for (key, value) in event {
            if let Some(roots) = &self.auto_map_from {
                if !roots.contains(key) {
                    continue;
                }
            }
            walk(key, value, &self.consumed, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile_yaml(yaml: &str) -> CompiledFormat {
        let def: FormatDefinition = serde_yaml::from_str(yaml).expect("definition parses");
        CompiledFormat::compile(&def).expect("definition compiles")
    }

    #[test]
    fn text_regex_format_with_status_transform() {
        let format = compile_yaml(
            r#"
name: access-log
type: text
pattern:
  main: '^(?P<ip>\S+) \S+ \S+ \[(?P<ts>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+)[^"]*" (?P<status>\d{3})'
  use_regex: true
mapping:
  severity:
    field: status
    transform: status_to_severity
  body:
    template: "{method} {path}"
  attributes:
    client_ip:
      field: ip
    status:
      field: status
  auto_map_remaining: false
"#,
        );
        let line = r#"10.0.0.7 - - [15/Jan/2024:10:00:00 +0000] "GET /healthz HTTP/1.1" 503 12"#;
        let records = format.apply(line, Utc::now()).expect("line matches");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.severity, Severity::Error);
        assert_eq!(record.message, "GET /healthz");
        assert_eq!(record.attribute("client_ip"), Some("10.0.0.7"));
        assert_eq!(record.attribute("status"), Some("503"));
    }

    #[test]
    fn loki_style_batch_expansion() {
        let format = compile_yaml(
            r#"
name: loki-push
type: structured
batch:
  enabled: true
  expand_path: streams[].values[]
  context_paths: ["streams[].stream"]
  entry_template:
    ts: "0"
    line: "1"
mapping:
  timestamp:
    field: ts
    time_format: unix_ns
  body:
    field: line
  auto_map_remaining: true
  auto_map_from: [stream]
"#,
        );
        let line = r#"{"streams":[{"stream":{"app":"checkout","env":"prod"},"values":[["1705312800000000000","payment accepted"],["1705312801000000000","payment declined"]]}]}"#;
        let records = format.apply(line, Utc::now()).expect("batch matches");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "payment accepted");
        assert_eq!(
            records[0].orig_time.expect("ts parsed").to_rfc3339(),
            "2024-01-15T10:00:00+00:00"
        );
        assert_eq!(records[0].attribute("app"), Some("checkout"));
        assert_eq!(records[0].attribute("env"), Some("prod"));
        assert_eq!(records[1].message, "payment declined");
    }

    #[test]
    fn root_array_expansion() {
        let format = compile_yaml(
            r#"
name: events
type: structured
batch:
  enabled: true
  expand_path: "[]"
mapping:
  body:
    field: msg
  severity:
    field: level
  auto_map_remaining: false
"#,
        );
        let line = r#"[{"level":"warn","msg":"a"},{"level":"error","msg":"b"}]"#;
        let records = format.apply(line, Utc::now()).expect("array matches");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].severity, Severity::Warn);
        assert_eq!(records[1].severity, Severity::Error);
    }

    #[test]
    fn transforms_and_defaults() {
        let format = compile_yaml(
            r#"
name: quirky
type: json
mapping:
  severity:
    field: lvl
    transform: uppercase
    default: info
  body:
    field: text
    transform: trim
"#,
        );
        let records = format
            .apply(r#"{"lvl":"warn","text":"  spaced  "}"#, Utc::now())
            .expect("matches");
        assert_eq!(records[0].severity, Severity::Warn);
        assert_eq!(records[0].message, "spaced");

        let records = format
            .apply(r#"{"text":"no level"}"#, Utc::now())
            .expect("matches");
        assert_eq!(records[0].severity, Severity::Info);
    }

    #[test]
    fn unknown_transform_rejected() {
        let def: FormatDefinition = serde_yaml::from_str(
            r#"
name: bad
type: json
mapping:
  body:
    field: msg
    transform: reverse
"#,
        )
        .expect("definition parses");
        assert!(matches!(
            CompiledFormat::compile(&def),
            Err(Error::UnknownTransform { .. })
        ));
    }

    #[test]
    fn deep_expand_path_rejected() {
        let def: FormatDefinition = serde_yaml::from_str(
            r#"
name: deep
type: structured
batch:
  enabled: true
  expand_path: a[].b[].c[]
mapping: {}
"#,
        )
        .expect("definition parses");
        assert!(matches!(
            CompiledFormat::compile(&def),
            Err(Error::UnsupportedExpandPath { .. })
        ));
    }

    #[test]
    fn go_layout_translation() {
        assert_eq!(
            go_layout_to_chrono("2006-01-02 15:04:05"),
            "%Y-%m-%d %H:%M:%S"
        );
        assert_eq!(
            go_layout_to_chrono("2006-01-02T15:04:05.000-0700"),
            "%Y-%m-%dT%H:%M:%S%.f%z"
        );
        let tf = TimeFormat::parse("2006-01-02 15:04:05");
        let ts = tf.parse_time("2024-01-15 10:00:00").expect("parses");
        assert_eq!(ts.to_rfc3339(), "2024-01-15T10:00:00+00:00");
    }
}
