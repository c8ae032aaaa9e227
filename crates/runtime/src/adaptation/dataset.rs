//! Dataset loading: JSON array or JSONL of adaptation samples

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::AdaptError;

/// One adaptation sample. Ground truth is optional; online mode routinely
/// runs without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
}

/// Load samples from a file. A file whose first non-whitespace byte is `[`
/// is parsed as a JSON array; anything else is parsed as JSONL, skipping
/// blank lines.
pub fn load_samples(path: impl AsRef<Path>) -> Result<Vec<Sample>, AdaptError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| AdaptError::Dataset {
        message: format!("{}: {}", path.display(), e),
    })?;

    let samples = if contents.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<Sample>>(&contents).map_err(|e| AdaptError::Dataset {
            message: format!("{}: {}", path.display(), e),
        })?
    } else {
        let mut samples = Vec::new();
        for (line_number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(line).map_err(|e| AdaptError::Dataset {
                message: format!("{}:{}: {}", path.display(), line_number + 1, e),
            })?;
            samples.push(sample);
        }
        samples
    };

    if samples.is_empty() {
        return Err(AdaptError::Dataset {
            message: format!("{}: no samples found", path.display()),
        });
    }

    tracing::info!(path = %path.display(), count = samples.len(), "dataset loaded");
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_json_array() {
        let file = write_temp(
            r#"[
                {"query": "a", "ground_truth": "1"},
                {"query": "b"}
            ]"#,
        );
        let samples = load_samples(file.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].ground_truth.as_deref(), Some("1"));
        assert!(samples[1].ground_truth.is_none());
    }

    #[test]
    fn test_load_jsonl_skips_blank_lines() {
        let file = write_temp(
            "{\"query\": \"a\"}\n\n{\"query\": \"b\", \"context\": {\"apps\": [\"phone\"]}}\n",
        );
        let samples = load_samples(file.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[1].context.is_some());
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let file = write_temp("{\"query\": \"a\"}\nnot json\n");
        let err = load_samples(file.path()).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let file = write_temp("\n\n");
        assert!(load_samples(file.path()).is_err());
    }
}
