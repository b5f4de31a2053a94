use serde::{Deserialize, Serialize};

use super::{ProviderAdapter, malformed};
use crate::error::ProviderError;

/// HuggingFace hosted inference (text generation task).
pub struct HuggingFace;

impl ProviderAdapter for HuggingFace {
    fn source(&self) -> &str {
        "HuggingFace"
    }

    fn encode(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        serde_json::to_vec(&InferenceRequest { inputs: prompt }).map_err(malformed)
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        let generations: Vec<Generation> = serde_json::from_slice(body).map_err(malformed)?;
        generations
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| ProviderError::Serialization("response contained no generations".into()))
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

#[derive(Deserialize)]
struct Generation {
    generated_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_wraps_prompt_in_inputs() {
        let body = HuggingFace.encode("tell me a joke").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"inputs": "tell me a joke"}));
    }

    #[test]
    fn decode_reads_generated_text() {
        let body = br#"[{"generated_text": "why did the crab..."}]"#;
        assert_eq!(HuggingFace.decode(body).unwrap(), "why did the crab...");
    }

    #[test]
    fn decode_empty_array_fails() {
        let err = HuggingFace.decode(b"[]").unwrap_err();
        assert!(err.to_string().contains("no generations"));
    }

    #[test]
    fn decode_error_object_fails_cleanly() {
        // The inference API answers `{"error": ...}` while a model loads.
        let err = HuggingFace
            .decode(br#"{"error": "Model is currently loading"}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }
}
