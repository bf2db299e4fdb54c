use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use super::{AnalysisError, RepairAnalysis};

/// One failed structural check, located by JSON pointer (`root` for the top level)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub path: String,
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Field layout of a closed object: required string keys, optional string keys
/// and optional string-array keys. Anything else is an additional property.
struct ObjectShape {
    required: &'static [&'static str],
    strings: &'static [&'static str],
    string_arrays: &'static [&'static str],
}

impl ObjectShape {
    fn allows(&self, key: &str) -> bool {
        self.required.contains(&key) || self.strings.contains(&key) || self.string_arrays.contains(&key)
    }
}

const MATERIAL_SHAPE: ObjectShape = ObjectShape {
    required: &["name"],
    strings: &["spec", "qty", "description", "image_url", "product_url", "store_name"],
    string_arrays: &["alt"],
};

const TOOL_SHAPE: ObjectShape = ObjectShape {
    required: &["name"],
    strings: &["purpose", "description", "image_url", "product_url", "store_name"],
    string_arrays: &[],
};

const VIDEO_SHAPE: ObjectShape = ObjectShape {
    required: &["url", "title"],
    strings: &["channel", "views", "duration"],
    string_arrays: &[],
};

const TOP_LEVEL_REQUIRED: &[&str] = &["materials", "tools", "steps"];
const TOP_LEVEL_KEYS: &[&str] = &[
    "materials",
    "tools",
    "steps",
    "likelihood",
    "safety",
    "youtube_search_term",
    "youtube_url",
    "youtube_videos",
];

/// Map a probability-like number into [0, 1].
///
/// Values above 1 are read as percentages; the result is then clamped.
pub fn clamp_probability(value: f64) -> f64 {
    let scaled = if value > 1.0 { value / 100.0 } else { value };
    scaled.clamp(0.0, 1.0)
}

/// Rewrite every numeric `likelihood` entry through [`clamp_probability`].
///
/// Non-numeric entries are left for the validator to report.
pub fn normalize_likelihood(value: &mut Value) {
    let Some(likelihood) = value.get_mut("likelihood").and_then(Value::as_object_mut) else {
        return;
    };

    for (cause, probability) in likelihood.iter_mut() {
        let Some(raw) = probability.as_f64() else {
            continue;
        };
        let clamped = clamp_probability(raw);
        if clamped != raw {
            debug!("Normalized likelihood '{}' from {} to {}", cause, raw, clamped);
        }
        if let Some(number) = serde_json::Number::from_f64(clamped) {
            *probability = Value::Number(number);
        }
    }
}

/// Validate a decoded model response against the closed repair-plan schema.
///
/// Likelihood values are normalized first. All violations are collected and
/// reported together, in a stable order.
pub fn validate_model_output(mut value: Value) -> Result<RepairAnalysis, AnalysisError> {
    normalize_likelihood(&mut value);

    let violations = collect_violations(&value);
    if !violations.is_empty() {
        debug!("Model output failed validation with {} violation(s)", violations.len());
        return Err(AnalysisError::SchemaViolation(violations));
    }

    serde_json::from_value(value)
        .map_err(|e| AnalysisError::SchemaViolation(vec![SchemaViolation::new("root", e.to_string())]))
}

/// Walk the value and report every structural problem
pub fn collect_violations(value: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();

    let Some(root) = value.as_object() else {
        violations.push(SchemaViolation::new("root", "must be object"));
        return violations;
    };

    for key in TOP_LEVEL_REQUIRED {
        if !root.contains_key(*key) {
            violations.push(SchemaViolation::new("root", format!("must have required property '{}'", key)));
        }
    }

    for key in root.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            violations.push(SchemaViolation::new("root", format!("must NOT have additional property '{}'", key)));
        }
    }

    if let Some(materials) = root.get("materials") {
        check_object_array(materials, "/materials", &MATERIAL_SHAPE, false, &mut violations);
    }
    if let Some(tools) = root.get("tools") {
        check_object_array(tools, "/tools", &TOOL_SHAPE, false, &mut violations);
    }
    if let Some(steps) = root.get("steps") {
        check_string_array(steps, "/steps", false, &mut violations);
    }
    if let Some(likelihood) = root.get("likelihood") {
        check_likelihood(likelihood, &mut violations);
    }
    if let Some(safety) = root.get("safety") {
        check_string_array(safety, "/safety", true, &mut violations);
    }
    for key in ["youtube_search_term", "youtube_url"] {
        if let Some(field) = root.get(key) {
            check_string(field, &pointer("", key), true, &mut violations);
        }
    }
    if let Some(videos) = root.get("youtube_videos") {
        check_object_array(videos, "/youtube_videos", &VIDEO_SHAPE, true, &mut violations);
    }

    violations
}

fn check_string(value: &Value, path: &str, nullable: bool, out: &mut Vec<SchemaViolation>) {
    match value {
        Value::String(_) => {}
        Value::Null if nullable => {}
        _ => out.push(SchemaViolation::new(path, "must be string")),
    }
}

fn check_string_array(value: &Value, path: &str, nullable: bool, out: &mut Vec<SchemaViolation>) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                check_string(item, &pointer(path, &index.to_string()), false, out);
            }
        }
        Value::Null if nullable => {}
        _ => out.push(SchemaViolation::new(path, "must be array")),
    }
}

fn check_object_array(
    value: &Value,
    path: &str,
    shape: &ObjectShape,
    nullable: bool,
    out: &mut Vec<SchemaViolation>,
) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                check_object(item, &pointer(path, &index.to_string()), shape, out);
            }
        }
        Value::Null if nullable => {}
        _ => out.push(SchemaViolation::new(path, "must be array")),
    }
}

fn check_object(value: &Value, path: &str, shape: &ObjectShape, out: &mut Vec<SchemaViolation>) {
    let Some(object) = value.as_object() else {
        out.push(SchemaViolation::new(path, "must be object"));
        return;
    };

    for key in shape.required {
        if !object.contains_key(*key) {
            out.push(SchemaViolation::new(path, format!("must have required property '{}'", key)));
        }
    }

    for key in object.keys() {
        if !shape.allows(key) {
            out.push(SchemaViolation::new(path, format!("must NOT have additional property '{}'", key)));
        }
    }

    check_fields(object, path, shape, out);
}

fn check_fields(object: &Map<String, Value>, path: &str, shape: &ObjectShape, out: &mut Vec<SchemaViolation>) {
    for key in shape.required {
        if let Some(field) = object.get(*key) {
            check_string(field, &pointer(path, key), false, out);
        }
    }
    for key in shape.strings {
        if let Some(field) = object.get(*key) {
            check_string(field, &pointer(path, key), true, out);
        }
    }
    for key in shape.string_arrays {
        if let Some(field) = object.get(*key) {
            check_string_array(field, &pointer(path, key), true, out);
        }
    }
}

fn check_likelihood(value: &Value, out: &mut Vec<SchemaViolation>) {
    let object = match value {
        Value::Object(object) => object,
        Value::Null => return,
        _ => {
            out.push(SchemaViolation::new("/likelihood", "must be object"));
            return;
        }
    };

    for (cause, probability) in object {
        let path = pointer("/likelihood", cause);
        match probability.as_f64() {
            None => out.push(SchemaViolation::new(path, "must be number")),
            Some(p) if p < 0.0 => out.push(SchemaViolation::new(path, "must be >= 0")),
            Some(p) if p > 1.0 => out.push(SchemaViolation::new(path, "must be <= 1")),
            Some(_) => {}
        }
    }
}

/// Append one JSON-pointer segment, escaping `~` and `/`
fn pointer(parent: &str, segment: &str) -> String {
    format!("{}/{}", parent, segment.replace('~', "~0").replace('/', "~1"))
}
