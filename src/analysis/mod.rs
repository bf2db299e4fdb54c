//! Structured repair plans produced by the vision model.
//!
//! Everything that reaches the rest of the service goes through
//! [`parse_model_response`] or [`validate_model_output`]; when either fails the
//! caller substitutes [`create_fallback_response`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod fallback;
pub mod parser;
pub mod validator;

pub use fallback::create_fallback_response;
pub use parser::parse_model_response;
pub use validator::{clamp_probability, normalize_likelihood, validate_model_output, SchemaViolation};

/// Validated repair plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepairAnalysis {
    pub materials: Vec<Material>,
    pub tools: Vec<Tool>,
    pub steps: Vec<String>,
    /// Candidate cause -> probability, every value within [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_search_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_videos: Option<Vec<VideoResult>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Material {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
}

/// Tutorial video found for the problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoResult {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Why a model response could not be turned into a [`RepairAnalysis`]
///
/// Every variant is recovered from by substituting the fallback plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("No JSON object found in model response")]
    NoJsonFound,

    #[error("Failed to parse JSON: {0}")]
    MalformedJson(String),

    #[error("Model output validation failed: {}", join_violations(.0))]
    SchemaViolation(Vec<SchemaViolation>),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoJsonFound => "no_json",
            Self::MalformedJson(_) => "malformed_json",
            Self::SchemaViolation(_) => "schema_violation",
        }
    }
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
