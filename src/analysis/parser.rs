use serde_json::Value;
use tracing::debug;

use super::validator::validate_model_output;
use super::{AnalysisError, RepairAnalysis};

/// Turn raw completion text into a validated [`RepairAnalysis`].
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or JSON embedded in
/// prose. The embedded case, used only when the text does not open with `{`,
/// takes the span from the first `{` to the last `}`.
pub fn parse_model_response(text: &str) -> Result<RepairAnalysis, AnalysisError> {
    let candidate = extract_json_candidate(text)?;

    let value: Value = serde_json::from_str(candidate).map_err(|e| {
        debug!("Model response is not valid JSON: {}", e);
        AnalysisError::MalformedJson(e.to_string())
    })?;

    validate_model_output(value)
}

/// Locate the JSON object text inside a model response
pub fn extract_json_candidate(text: &str) -> Result<&str, AnalysisError> {
    let unfenced = strip_code_fence(text);

    // Text that opens with an object is taken whole, trailing prose included
    if unfenced.starts_with('{') {
        return Ok(unfenced);
    }

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            debug!("Extracted embedded JSON object from model response");
            Ok(&unfenced[start..=end])
        }
        _ => Err(AnalysisError::NoJsonFound),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();

    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body).trim_start();
    let body = body.trim_end();

    body.strip_suffix("```").unwrap_or(body).trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str = r#"{"materials":[{"name":"Silicone caulk"}],"tools":[{"name":"Caulk gun"}],"steps":["Remove old caulk","Apply new bead"]}"#;

    #[test]
    fn test_bare_and_fenced_json_parse_identically() {
        let bare = parse_model_response(BARE).unwrap();
        let fenced_json = parse_model_response(&format!("```json\n{}\n```", BARE)).unwrap();
        let fenced_plain = parse_model_response(&format!("```\n{}\n```", BARE)).unwrap();
        let padded = parse_model_response(&format!("\n\n  {}  \n", BARE)).unwrap();

        assert_eq!(bare, fenced_json);
        assert_eq!(bare, fenced_plain);
        assert_eq!(bare, padded);
        assert_eq!(bare.tools[0].name, "Caulk gun");
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let text = "Here is the analysis:\n```json\n{\"materials\":[],\"tools\":[],\"steps\":[\"Inspect\"],\"likelihood\":{\"leak\":150}}\n```\nLet me know if you need more.";
        let analysis = parse_model_response(text).unwrap();

        assert!(analysis.materials.is_empty());
        assert_eq!(analysis.steps, vec!["Inspect".to_string()]);
        assert_eq!(analysis.likelihood.unwrap()["leak"], 1.0);
    }

    #[test]
    fn test_refusal_has_no_json() {
        assert_eq!(
            parse_model_response("I cannot help with that.").unwrap_err(),
            AnalysisError::NoJsonFound
        );
        assert_eq!(parse_model_response("").unwrap_err(), AnalysisError::NoJsonFound);
        assert_eq!(parse_model_response("} backwards {").unwrap_err(), AnalysisError::NoJsonFound);
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_model_response("{\"materials\": [}").unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedJson(_)));
        assert!(err.to_string().starts_with("Failed to parse JSON:"));
    }

    #[test]
    fn test_missing_steps_is_schema_violation() {
        let err = parse_model_response(r#"{"materials":[],"tools":[]}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::SchemaViolation(_)));
        assert!(err.to_string().contains("root: must have required property 'steps'"));
    }

    #[test]
    fn test_object_followed_by_prose_is_malformed() {
        let fenced = format!("```json\n{}\n```\nThese steps should take about an hour.", BARE);
        let err = parse_model_response(&fenced).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedJson(_)));

        let bare = format!("{}\nHope this helps!", BARE);
        let err = parse_model_response(&bare).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedJson(_)));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```{}```"), "{}");
        assert_eq!(strip_code_fence("  {}  "), "{}");
    }
}
