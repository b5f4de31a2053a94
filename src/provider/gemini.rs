use serde::{Deserialize, Serialize};

use super::{AuthStyle, ProviderAdapter, malformed};
use crate::error::ProviderError;

/// Google Gemini `generateContent`. Authenticates with a `key` query parameter.
pub struct Gemini;

impl ProviderAdapter for Gemini {
    fn source(&self) -> &str {
        "Gemini"
    }

    fn auth_style(&self) -> AuthStyle {
        AuthStyle::QueryParam("key")
    }

    fn encode(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let request = GenerateRequest {
            contents: [Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };
        serde_json::to_vec(&request).map_err(malformed)
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        let response: GenerateResponse = serde_json::from_slice(body).map_err(malformed)?;
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| ProviderError::Serialization("response contained no candidates".into()))
    }
}

// --- API types ---

#[derive(Serialize)]
struct GenerateRequest {
    contents: [Content; 1],
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_query_param_auth() {
        assert_eq!(Gemini.auth_style(), AuthStyle::QueryParam("key"));
    }

    #[test]
    fn encode_nests_prompt_in_parts() {
        let body = Gemini.encode("hi").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"contents": [{"parts": [{"text": "hi"}]}]})
        );
    }

    #[test]
    fn decode_reads_first_part_of_first_candidate() {
        let body = br#"{"candidates": [
            {"content": {"parts": [{"text": "one"}, {"text": "two"}], "role": "model"}}
        ]}"#;
        assert_eq!(Gemini.decode(body).unwrap(), "one");
    }

    #[test]
    fn decode_missing_candidates_fails() {
        // Safety-blocked prompts come back with no candidates at all.
        let err = Gemini
            .decode(br#"{"promptFeedback": {"blockReason": "SAFETY"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("no candidates"));
    }

    #[test]
    fn decode_candidate_without_parts_fails() {
        let err = Gemini
            .decode(br#"{"candidates": [{"content": {"parts": []}}]}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }
}
