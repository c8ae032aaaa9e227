//! Schema-first validation for LLM output
//!
//! Layered pipeline: strip markdown fences → parse as JSON → validate
//! against a JSON Schema → deserialize into the target Rust type. Each
//! layer produces an actionable message that becomes the stricter re-ask
//! prompt when the model's first attempt is malformed.

use serde::de::DeserializeOwned;

/// Errors from the validation pipeline, ordered by severity.
#[derive(Debug, thiserror::Error)]
pub enum OutputValidationError {
    /// The raw text couldn't be parsed as JSON.
    #[error("JSON parse error at line {line}, column {column}: {message}")]
    JsonParse {
        message: String,
        line: usize,
        column: usize,
        raw_prefix: String,
    },

    /// The JSON is valid but doesn't conform to the expected schema.
    #[error("Schema validation failed: {errors:?}")]
    SchemaViolation { errors: Vec<String> },

    /// The JSON conforms to the schema but couldn't be deserialized into
    /// the target Rust type.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String },
}

impl OutputValidationError {
    /// Format as a concise correction message for the re-ask prompt.
    pub fn to_llm_feedback(&self) -> String {
        match self {
            OutputValidationError::JsonParse {
                message,
                line,
                column,
                ..
            } => format!(
                "Your response was not valid JSON. Error at line {}, column {}: {}. Respond with a single valid JSON object and nothing else.",
                line, column, message
            ),
            OutputValidationError::SchemaViolation { errors } => format!(
                "Your JSON response did not match the required schema. Issues: {}. Fix these and respond again with only the JSON object.",
                errors.join("; ")
            ),
            OutputValidationError::Deserialization { message } => format!(
                "Your JSON had the right structure but contained invalid values: {}. Correct the values and respond again with only the JSON object.",
                message
            ),
        }
    }
}

/// Strip markdown code fences from a string, returning the inner content.
pub fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip the language tag on the first line
        let content = if let Some(idx) = rest.find('\n') {
            &rest[idx + 1..]
        } else {
            rest
        };
        if let Some(stripped) = content.strip_suffix("```") {
            return stripped.trim().to_string();
        }
        return content.trim().to_string();
    }

    trimmed.to_string()
}

/// The validation pipeline: parses, validates, and deserializes LLM output.
pub struct ValidationPipeline;

impl ValidationPipeline {
    /// Run the full pipeline: strip fences → parse JSON → validate →
    /// deserialize into `T`.
    pub fn validate_and_parse<T: DeserializeOwned>(
        raw_text: &str,
        schema: Option<&jsonschema::Validator>,
    ) -> Result<T, OutputValidationError> {
        let json_value = Self::parse_and_validate(raw_text, schema)?;
        serde_json::from_value(json_value).map_err(|e| OutputValidationError::Deserialization {
            message: e.to_string(),
        })
    }

    /// Parse raw text as JSON without schema validation.
    pub fn parse_json(raw_text: &str) -> Result<serde_json::Value, OutputValidationError> {
        let cleaned = strip_markdown_fences(raw_text);
        serde_json::from_str(&cleaned).map_err(|e| {
            let prefix = if cleaned.len() > 100 {
                format!("{}...", &cleaned[..100])
            } else {
                cleaned.clone()
            };
            OutputValidationError::JsonParse {
                message: e.to_string(),
                line: e.line(),
                column: e.column(),
                raw_prefix: prefix,
            }
        })
    }

    /// Create a validator from a raw JSON Schema value.
    pub fn compile_schema(
        schema: &serde_json::Value,
    ) -> Result<jsonschema::Validator, OutputValidationError> {
        jsonschema::validator_for(schema).map_err(|e| OutputValidationError::SchemaViolation {
            errors: vec![format!("Invalid schema: {}", e)],
        })
    }

    fn parse_and_validate(
        raw_text: &str,
        schema: Option<&jsonschema::Validator>,
    ) -> Result<serde_json::Value, OutputValidationError> {
        let json_value = Self::parse_json(raw_text)?;

        if let Some(validator) = schema {
            let errors: Vec<String> = validator
                .iter_errors(&json_value)
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("at '{}': {}", path, e)
                    }
                })
                .collect();
            if !errors.is_empty() {
                return Err(OutputValidationError::SchemaViolation { errors });
            }
        }

        Ok(json_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestOutput {
        answer: String,
        confidence: f64,
    }

    fn make_validator() -> jsonschema::Validator {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "answer": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
            },
            "required": ["answer", "confidence"]
        });
        ValidationPipeline::compile_schema(&schema).expect("valid schema")
    }

    #[test]
    fn test_validate_and_parse_valid() {
        let validator = make_validator();
        let raw = r#"{"answer": "42", "confidence": 0.95}"#;
        let result: TestOutput =
            ValidationPipeline::validate_and_parse(raw, Some(&validator)).unwrap();
        assert_eq!(result.answer, "42");
    }

    #[test]
    fn test_strip_fences_with_language_tag() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(fenced), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_without_tag() {
        let fenced = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(fenced), "{\"a\": 1}");
        assert_eq!(strip_markdown_fences("  plain  "), "plain");
    }

    #[test]
    fn test_fenced_json_passes_pipeline() {
        let validator = make_validator();
        let raw = "```json\n{\"answer\": \"x\", \"confidence\": 0.5}\n```";
        let result: TestOutput =
            ValidationPipeline::validate_and_parse(raw, Some(&validator)).unwrap();
        assert_eq!(result.answer, "x");
    }

    #[test]
    fn test_invalid_json_reports_position() {
        let err = ValidationPipeline::parse_json("{not json").unwrap_err();
        assert!(matches!(err, OutputValidationError::JsonParse { .. }));
        let feedback = err.to_llm_feedback();
        assert!(feedback.contains("not valid JSON"));
    }

    #[test]
    fn test_schema_violation_lists_paths() {
        let validator = make_validator();
        let raw = r#"{"answer": 7, "confidence": 2.0}"#;
        let err = ValidationPipeline::validate_and_parse::<TestOutput>(raw, Some(&validator))
            .unwrap_err();
        match &err {
            OutputValidationError::SchemaViolation { errors } => {
                assert!(!errors.is_empty());
            }
            other => panic!("expected schema violation, got {other:?}"),
        }
        assert!(err.to_llm_feedback().contains("required schema"));
    }
}
