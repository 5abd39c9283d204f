//! # Event Module
//!
//! This module defines the core [`Event`] record: a structured, validated
//! observation that serializes to the canonical JSON wire format. Events
//! carry a fixed set of allowed keys, support two merge operations (plain
//! update and name-canonicalizing roll-up), and absorb loosely-typed
//! constructor arguments through the [`EventArg`] sum type.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EventError, Result};

/// Every key an event may carry
pub const KEYS_ALLOWED: [&str; 10] = [
    "name",
    "operation",
    "component",
    "system",
    "fields",
    "data",
    "tags",
    "replay",
    "tid",
    "time",
];

/// Keys that must be present and non-empty at final validation
pub const KEYS_REQUIRED: [&str; 6] = ["name", "operation", "component", "system", "tid", "time"];

/// Typed-suffix tokens for `fields` keys, longest-first. The first token
/// contained in a key selects its value predicate; keys matching none
/// default to `string`.
const FIELD_SUFFIXES: [&str; 11] = [
    "array_date",
    "array_boolean",
    "array_double",
    "array_long",
    "array_string",
    "array",
    "date",
    "boolean",
    "double",
    "long",
    "string",
];

/// Compose a scope base name with an incoming event name, suppressing
/// stutter at the tail.
///
/// ```
/// use emit::event::canonicalize;
///
/// assert_eq!(canonicalize("one.two.three", "foo"), "one.two.three.foo");
/// assert_eq!(canonicalize("one.two.three", "three"), "one.two.three");
/// assert_eq!(canonicalize("", "a"), "a");
/// ```
pub fn canonicalize(base: &str, name: &str) -> String {
    if name.is_empty() || base == name || base.ends_with(&format!(".{name}")) {
        return base.to_string();
    }
    if base.is_empty() || name.starts_with(base) {
        return name.to_string();
    }
    format!("{base}.{name}")
}

/// One positional constructor argument for [`Event::update`].
///
/// Strings are assigned to keys by position (first string to `name`, then
/// `operation`, `component`, `system`, `tid`); records merge key-wise;
/// timestamps assign `time`; string lists append to `tags`.
#[derive(Debug, Clone)]
pub enum EventArg {
    /// Positionally-assigned string value
    Text(String),

    /// Another event merged key-wise
    Record(Event),

    /// Timestamp assigned to `time`
    Time(DateTime<Utc>),

    /// Strings appended to `tags`
    Tags(Vec<String>),
}

impl From<&str> for EventArg {
    fn from(value: &str) -> Self {
        EventArg::Text(value.to_string())
    }
}

impl From<String> for EventArg {
    fn from(value: String) -> Self {
        EventArg::Text(value)
    }
}

impl From<Event> for EventArg {
    fn from(value: Event) -> Self {
        EventArg::Record(value)
    }
}

impl From<&Event> for EventArg {
    fn from(value: &Event) -> Self {
        EventArg::Record(value.clone())
    }
}

impl From<DateTime<Utc>> for EventArg {
    fn from(value: DateTime<Utc>) -> Self {
        EventArg::Time(value)
    }
}

impl From<Vec<String>> for EventArg {
    fn from(value: Vec<String>) -> Self {
        EventArg::Tags(value)
    }
}

impl From<Vec<&str>> for EventArg {
    fn from(value: Vec<&str>) -> Self {
        EventArg::Tags(value.into_iter().map(str::to_string).collect())
    }
}

/// Core event structure: one structured, validated, serializable observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Trace identifier correlating related events downstream
    pub tid: String,

    /// Originating system name
    pub system: String,

    /// Component within the system
    pub component: String,

    /// Operation being performed; defaults to `component` at serialization
    pub operation: String,

    /// Event name, composed across nested scopes
    pub name: String,

    /// Event creation timestamp
    pub time: DateTime<Utc>,

    /// Typed key/value pairs validated by key suffix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, Value>>,

    /// Free-form JSON payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, Value>>,

    /// De-duplicated tag set; serializes as an array
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,

    /// Replay marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<String>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

/// Staging area for one `update` call. Positional strings land here even
/// when empty; record merges may overwrite a staged empty value but never
/// an unstaged one.
#[derive(Debug, Default)]
struct Staged {
    tid: Option<String>,
    system: Option<String>,
    component: Option<String>,
    operation: Option<String>,
    name: Option<String>,
    time: Option<DateTime<Utc>>,
    fields: Option<BTreeMap<String, Value>>,
    data: Option<serde_json::Map<String, Value>>,
    tags: Option<Vec<String>>,
    replay: Option<String>,
}

impl Staged {
    fn stage_string(slot: &mut Option<String>, value: &str) {
        let staged_empty = matches!(slot, Some(s) if s.is_empty());
        if !value.is_empty() || staged_empty {
            *slot = Some(value.to_string());
        }
    }

    /// Merge a record per the precedence rule: the value wins when it is
    /// non-empty, or when the currently staged value is empty.
    fn merge_record(&mut self, event: &Event) {
        Self::stage_string(&mut self.tid, &event.tid);
        Self::stage_string(&mut self.system, &event.system);
        Self::stage_string(&mut self.component, &event.component);
        Self::stage_string(&mut self.operation, &event.operation);
        Self::stage_string(&mut self.name, &event.name);
        self.time = Some(event.time);

        if let Some(fields) = &event.fields {
            if !fields.is_empty() || matches!(&self.fields, Some(f) if f.is_empty()) {
                self.fields = Some(fields.clone());
            }
        }
        if let Some(data) = &event.data {
            if !data.is_empty() || matches!(&self.data, Some(d) if d.is_empty()) {
                self.data = Some(data.clone());
            }
        }
        if let Some(tags) = &event.tags {
            if !tags.is_empty() || matches!(&self.tags, Some(t) if t.is_empty()) {
                self.tags = Some(tags.iter().cloned().collect());
            }
        }
        if let Some(replay) = &event.replay {
            if !replay.is_empty() || matches!(&self.replay, Some(r) if r.is_empty()) {
                self.replay = Some(replay.clone());
            }
        }
    }
}

impl Event {
    /// Create an empty event stamped with the current time
    pub fn new() -> Self {
        Self {
            tid: String::new(),
            system: String::new(),
            component: String::new(),
            operation: String::new(),
            name: String::new(),
            time: Utc::now(),
            fields: None,
            data: None,
            tags: None,
            replay: None,
        }
    }

    /// Create an event by absorbing positional arguments
    pub fn with_args<I>(args: I) -> std::result::Result<Self, EventError>
    where
        I: IntoIterator,
        I::Item: Into<EventArg>,
    {
        let mut event = Self::new();
        event.update(args)?;
        Ok(event)
    }

    /// Derive a new event inheriting all keys, then apply `args`
    pub fn child<I>(&self, args: I) -> std::result::Result<Self, EventError>
    where
        I: IntoIterator,
        I::Item: Into<EventArg>,
    {
        let mut event = self.clone();
        event.update(args)?;
        Ok(event)
    }

    /// Absorb positional arguments into this event.
    ///
    /// Strings are assigned in order to `name`, `operation`, `component`,
    /// `system`, `tid` even when empty; a sixth string is an error. Records
    /// merge key-wise per the precedence rule, timestamps assign `time`,
    /// and string lists append to `tags`.
    pub fn update<I>(&mut self, args: I) -> std::result::Result<&mut Self, EventError>
    where
        I: IntoIterator,
        I::Item: Into<EventArg>,
    {
        const STRING_KEYS: usize = 5;
        let mut staged = Staged::default();
        let mut strings_seen = 0usize;

        for arg in args {
            match arg.into() {
                EventArg::Text(text) => {
                    let slot = match strings_seen {
                        0 => &mut staged.name,
                        1 => &mut staged.operation,
                        2 => &mut staged.component,
                        3 => &mut staged.system,
                        4 => &mut staged.tid,
                        _ => return Err(EventError::TooManyStrings { extra: text }),
                    };
                    *slot = Some(text);
                    strings_seen += 1;
                    debug_assert!(strings_seen <= STRING_KEYS);
                }
                EventArg::Record(event) => staged.merge_record(&event),
                EventArg::Time(time) => staged.time = Some(time),
                EventArg::Tags(tags) => {
                    staged.tags.get_or_insert_with(Vec::new).extend(tags);
                }
            }
        }

        if let Some(tid) = staged.tid {
            self.tid = tid;
        }
        if let Some(system) = staged.system {
            self.system = system;
        }
        if let Some(component) = staged.component {
            self.component = component;
        }
        if let Some(operation) = staged.operation {
            self.operation = operation;
        }
        if let Some(name) = staged.name {
            self.name = name;
        }
        if let Some(time) = staged.time {
            self.time = time;
        }
        if let Some(fields) = staged.fields {
            self.fields = Some(fields);
        }
        if let Some(data) = staged.data {
            self.data = Some(data);
        }
        if let Some(tags) = staged.tags {
            self.tags = Some(tags.into_iter().collect());
        }
        if let Some(replay) = staged.replay {
            self.replay = Some(replay);
        }
        Ok(self)
    }

    /// Update-merge: non-empty values in `other` overwrite this event;
    /// `name` is replaced, not composed
    pub fn merge(&mut self, other: &Event) {
        if !other.tid.is_empty() {
            self.tid = other.tid.clone();
        }
        if !other.system.is_empty() {
            self.system = other.system.clone();
        }
        if !other.component.is_empty() {
            self.component = other.component.clone();
        }
        if !other.operation.is_empty() {
            self.operation = other.operation.clone();
        }
        if !other.name.is_empty() {
            self.name = other.name.clone();
        }
        self.time = other.time;

        if matches!(&other.fields, Some(f) if !f.is_empty()) {
            self.fields = other.fields.clone();
        }
        if matches!(&other.data, Some(d) if !d.is_empty()) {
            self.data = other.data.clone();
        }
        if matches!(&other.tags, Some(t) if !t.is_empty()) {
            self.tags = other.tags.clone();
        }
        if matches!(&other.replay, Some(r) if !r.is_empty()) {
            self.replay = other.replay.clone();
        }
    }

    /// Name-canonicalizing merge used to roll up an event stack: behaves
    /// like [`Event::merge`] except `name` is composed via
    /// [`canonicalize`]
    pub fn merge_canonical(&mut self, other: &Event) {
        let name = canonicalize(&self.name, &other.name);
        self.merge(other);
        self.name = name;
    }

    /// The canonical name for this event when derived from `base`
    pub fn canonicalized(&self, base: &str) -> String {
        canonicalize(base, &self.name)
    }

    /// Assign `other`'s values to any allowed keys that are still empty
    pub fn defaults(&mut self, other: &Event) -> &mut Self {
        if self.tid.is_empty() {
            self.tid = other.tid.clone();
        }
        if self.system.is_empty() {
            self.system = other.system.clone();
        }
        if self.component.is_empty() {
            self.component = other.component.clone();
        }
        if self.operation.is_empty() {
            self.operation = other.operation.clone();
        }
        if self.name.is_empty() {
            self.name = other.name.clone();
        }
        if self.fields.is_none() {
            self.fields = other.fields.clone();
        }
        if self.data.is_none() {
            self.data = other.data.clone();
        }
        if self.tags.is_none() {
            self.tags = other.tags.clone();
        }
        if self.replay.is_none() {
            self.replay = other.replay.clone();
        }
        self
    }

    /// Assign a default for one allowed key if it is currently empty.
    /// `time` is never defaulted; it is set at construction.
    pub fn default_value(&mut self, key: &str, value: Value) -> std::result::Result<(), EventError> {
        if !KEYS_ALLOWED.contains(&key) {
            return Err(EventError::KeyNotAllowed {
                key: key.to_string(),
            });
        }
        if key == "time" {
            return Ok(());
        }

        let as_string = |value: &Value| -> std::result::Result<String, EventError> {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| EventError::InvalidType {
                    key: key.to_string(),
                    expected: "must be a string".to_string(),
                })
        };

        match key {
            "tid" if self.tid.is_empty() => self.tid = as_string(&value)?,
            "system" if self.system.is_empty() => self.system = as_string(&value)?,
            "component" if self.component.is_empty() => self.component = as_string(&value)?,
            "operation" if self.operation.is_empty() => self.operation = as_string(&value)?,
            "name" if self.name.is_empty() => self.name = as_string(&value)?,
            "replay" if self.replay.is_none() => self.replay = Some(as_string(&value)?),
            "fields" if self.fields.is_none() => match value {
                Value::Object(map) => self.fields = Some(map.into_iter().collect()),
                _ => {
                    return Err(EventError::InvalidType {
                        key: key.to_string(),
                        expected: "must be a mapping".to_string(),
                    })
                }
            },
            "data" if self.data.is_none() => match value {
                Value::Object(map) => self.data = Some(map),
                _ => {
                    return Err(EventError::InvalidType {
                        key: key.to_string(),
                        expected: "must be a mapping".to_string(),
                    })
                }
            },
            "tags" if self.tags.is_none() => match value {
                Value::Array(items) => {
                    let mut tags = BTreeSet::new();
                    for item in items {
                        tags.insert(as_string(&item)?);
                    }
                    self.tags = Some(tags);
                }
                _ => {
                    return Err(EventError::InvalidType {
                        key: key.to_string(),
                        expected: "must be an array of strings".to_string(),
                    })
                }
            },
            _ => {}
        }
        Ok(())
    }

    /// Validate the event for emission
    pub fn validate(&self) -> std::result::Result<(), EventError> {
        for (key, value) in [
            ("tid", &self.tid),
            ("system", &self.system),
            ("component", &self.component),
            ("name", &self.name),
        ] {
            if value.is_empty() {
                return Err(EventError::EmptyValue {
                    key: key.to_string(),
                });
            }
        }
        if self.operation.is_empty() && self.component.is_empty() {
            return Err(EventError::EmptyValue {
                key: "operation".to_string(),
            });
        }

        if let Some(tags) = &self.tags {
            if tags.iter().any(|tag| tag.is_empty()) {
                return Err(EventError::InvalidType {
                    key: "tags".to_string(),
                    expected: "must not contain empty strings".to_string(),
                });
            }
        }

        if let Some(fields) = &self.fields {
            for (key, value) in fields {
                if !field_matches_suffix(key, value) {
                    return Err(EventError::InvalidField {
                        key: key.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns true if the event is currently valid
    pub fn valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Finalize for serialization: `operation` falls back to `component`
    pub fn finalized(&self) -> Event {
        let mut out = self.clone();
        if out.operation.is_empty() && !out.component.is_empty() {
            out.operation = out.component.clone();
        }
        out
    }

    /// Serialize the finalized event to canonical JSON
    pub fn to_json(&self, pretty: bool) -> std::result::Result<String, serde_json::Error> {
        let out = self.finalized();
        if pretty {
            serde_json::to_string_pretty(&out)
        } else {
            serde_json::to_string(&out)
        }
    }

    /// Parse an event from its JSON wire form
    pub fn from_json(json: &str) -> Result<Event> {
        let value: Value = serde_json::from_str(json)?;
        let map = match value {
            Value::Object(map) => map,
            _ => {
                return Err(EventError::InvalidType {
                    key: "event".to_string(),
                    expected: "must be a JSON object".to_string(),
                }
                .into())
            }
        };

        let extraneous: Vec<String> = map
            .keys()
            .filter(|key| !KEYS_ALLOWED.contains(&key.as_str()))
            .cloned()
            .collect();
        if !extraneous.is_empty() {
            return Err(EventError::ExtraneousKeys { keys: extraneous }.into());
        }

        let missing: Vec<String> = KEYS_REQUIRED
            .iter()
            .filter(|key| !map.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EventError::MissingKeys { keys: missing }.into());
        }

        let string_field = |key: &str| -> std::result::Result<String, EventError> {
            match map.get(key) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(EventError::InvalidType {
                    key: key.to_string(),
                    expected: "must be a string".to_string(),
                }),
                None => Ok(String::new()),
            }
        };

        let mut event = Event::new();
        event.tid = string_field("tid")?;
        event.system = string_field("system")?;
        event.component = string_field("component")?;
        event.operation = string_field("operation")?;
        event.name = string_field("name")?;

        let time = string_field("time")?;
        event.time = DateTime::parse_from_rfc3339(&time)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| EventError::InvalidType {
                key: "time".to_string(),
                expected: "must be an RFC 3339 timestamp".to_string(),
            })?;

        if let Some(value) = map.get("fields") {
            match value {
                Value::Object(fields) => {
                    event.fields = Some(
                        fields
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    );
                }
                _ => {
                    return Err(EventError::InvalidType {
                        key: "fields".to_string(),
                        expected: "must be a mapping".to_string(),
                    }
                    .into())
                }
            }
        }
        if let Some(value) = map.get("data") {
            match value {
                Value::Object(data) => event.data = Some(data.clone()),
                _ => {
                    return Err(EventError::InvalidType {
                        key: "data".to_string(),
                        expected: "must be a mapping".to_string(),
                    }
                    .into())
                }
            }
        }
        if let Some(value) = map.get("tags") {
            match value {
                Value::Array(items) => {
                    let mut tags = BTreeSet::new();
                    for item in items {
                        match item {
                            Value::String(tag) => {
                                tags.insert(tag.clone());
                            }
                            _ => {
                                return Err(EventError::InvalidType {
                                    key: "tags".to_string(),
                                    expected: "must only contain strings".to_string(),
                                }
                                .into())
                            }
                        }
                    }
                    event.tags = Some(tags);
                }
                _ => {
                    return Err(EventError::InvalidType {
                        key: "tags".to_string(),
                        expected: "must be an array of strings".to_string(),
                    }
                    .into())
                }
            }
        }
        if let Some(value) = map.get("replay") {
            event.replay = Some(value.as_str().map(str::to_string).ok_or_else(|| {
                EventError::InvalidType {
                    key: "replay".to_string(),
                    expected: "must be a string".to_string(),
                }
            })?);
        }
        Ok(event)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event(tid={})", self.tid)
    }
}

/// Select the typed suffix governing a `fields` key
fn field_suffix(name: &str) -> &'static str {
    FIELD_SUFFIXES
        .iter()
        .find(|suffix| name.contains(**suffix))
        .copied()
        .unwrap_or("string")
}

fn scalar_matches(kind: &str, value: &Value) -> bool {
    match kind {
        "date" => match value {
            Value::String(s) => {
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "double" => value.is_f64(),
        "long" => value.is_i64() || value.is_u64(),
        // `string` and the bare `array` suffix both take string values
        _ => value.is_string(),
    }
}

/// Check one `fields` entry against its typed suffix. An empty array is
/// valid for any array suffix.
fn field_matches_suffix(name: &str, value: &Value) -> bool {
    let suffix = field_suffix(name);
    if let Some(rest) = suffix.strip_prefix("array") {
        let scalar = rest.strip_prefix('_').unwrap_or("string");
        match value {
            Value::Array(items) => items.iter().all(|item| scalar_matches(scalar, item)),
            _ => false,
        }
    } else {
        scalar_matches(suffix, value)
    }
}
