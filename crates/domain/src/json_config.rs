//! Loader for the JSONC-style `providers.jsonc` / `models.jsonc` config
//! files (§6 EXTERNAL INTERFACES: config files may carry comments and
//! trailing commas). Parsing goes through `json5` rather than `serde_json`
//! so both are tolerated.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Parse a JSONC/JSON5 document into `T`.
pub fn from_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    json5::from_str(text).map_err(|e| Error::Config(format!("invalid JSON5: {e}")))
}

/// Read and parse a JSONC/JSON5 file into `T`.
pub fn from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    from_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn parses_json5_with_comments_and_trailing_commas() {
        let text = r#"{
            // a comment
            name: "demo",
            count: 3,
        }"#;
        let parsed: Sample = from_str(text).unwrap();
        assert_eq!(parsed, Sample { name: "demo".into(), count: 3 });
    }

    #[test]
    fn invalid_document_yields_config_error() {
        let result: Result<Sample> = from_str("{ not valid");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_yields_config_error() {
        let result: Result<Sample> = from_file("/nonexistent/path/providers.jsonc");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
