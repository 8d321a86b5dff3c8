//! Text generation backends.
//!
//! Two modes share one output shape: `stub` produces a deterministic local
//! placeholder so the whole pipeline runs offline, `real` POSTs the prompt
//! to a configured HTTP endpoint. Provider trouble of any kind surfaces as
//! a generation failure; the caller records it in the generation log.

use serde::Deserialize;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Environment variable consulted for the provider bearer token.
pub const API_KEY_ENV: &str = "CSR_AI_API_KEY";

pub struct GenerationOutput {
    pub text: String,
    pub model: String,
}

/// Deterministic local output used in `stub` mode.
pub fn stub_generate(study_code: &str, section_code: &str, prompt: &str) -> GenerationOutput {
    GenerationOutput {
        text: format!(
            "[STUB AI OUTPUT] Draft for study {}, section {}.\n\nPrompt:\n{}",
            study_code, section_code, prompt
        ),
        model: "stub-model-v0".to_string(),
    }
}

/// Accepts both `text`/`generated_text` and `model`/`model_name` spellings.
#[derive(Deserialize)]
struct ProviderResponse {
    text: Option<String>,
    generated_text: Option<String>,
    model: Option<String>,
    model_name: Option<String>,
}

/// POST the prompt to the configured endpoint and parse the draft text.
pub async fn call_provider(
    config: &GenerationConfig,
    prompt: &str,
    max_tokens: i64,
    temperature: f64,
) -> Result<GenerationOutput> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| Error::GenerationFailed(format!("failed to build http client: {}", e)))?;

    let mut request = client.post(&config.endpoint).json(&serde_json::json!({
        "prompt": prompt,
        "max_tokens": max_tokens,
        "temperature": temperature,
    }));
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.is_empty() {
            request = request.bearer_auth(key);
        }
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::GenerationFailed(format!("provider request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::GenerationFailed(format!(
            "provider returned {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )));
    }

    let parsed: ProviderResponse = response.json().await.map_err(|e| {
        Error::GenerationFailed(format!("provider response was not valid JSON: {}", e))
    })?;

    let text = parsed.text.or(parsed.generated_text).unwrap_or_default();
    if text.trim().is_empty() {
        return Err(Error::GenerationFailed(
            "provider returned empty text".into(),
        ));
    }
    let model = parsed
        .model
        .or(parsed.model_name)
        .unwrap_or_else(|| config.model.clone());

    Ok(GenerationOutput { text, model })
}
