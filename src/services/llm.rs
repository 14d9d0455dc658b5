use crate::core::config::Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// A text-generation request; `schema` constrains the answer to structured JSON.
#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub schema: Option<serde_json::Value>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync + Debug {
    async fn generate_text(&self, request: &TextRequest) -> Result<String>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync + Debug {
    /// Returns the generated image as a `data:` URI.
    async fn generate_image(&self, prompt: &str) -> Result<String>;
}

/// Both capabilities, usually backed by the same client.
#[derive(Debug, Clone)]
pub struct Generators {
    pub text: Arc<dyn TextGenerator>,
    pub image: Arc<dyn ImageGenerator>,
}

pub fn create_generators(config: &Config) -> Result<Generators> {
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.as_ref().context("Gemini config missing")?;
            if cfg.api_key.trim().is_empty() {
                anyhow::bail!(
                    "Gemini API key missing. Set llm.gemini.api_key in config.yml or GEMINI_API_KEY."
                );
            }
            let client = Arc::new(GeminiClient::new(
                &cfg.api_key,
                &cfg.text_model,
                &cfg.image_model,
                &cfg.base_url,
            ));
            Ok(Generators {
                text: client.clone(),
                image: client,
            })
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

// --- Gemini ---
#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    text_model: String,
    image_model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, text_model: &str, image_model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            text_model: text_model.to_string(),
            image_model: image_model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn generate_content(&self, model: &str, body: &GeminiRequest) -> Result<GeminiResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Gemini request to {} failed", model))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = match serde_json::from_str(&response_text) {
            Ok(r) => r,
            Err(e) => {
                return Err(anyhow!(
                    "Failed to parse Gemini response: {}. Body: {}",
                    e,
                    response_text
                ))
            }
        };

        if let Some(err) = &result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }
        Ok(result)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn first_candidate(&self) -> Result<&GeminiCandidate> {
        self.candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| anyhow!("Gemini response contained no candidates"))
    }

    fn first_text(&self) -> Result<String> {
        let first = self.first_candidate()?;
        let text = first
            .content
            .as_ref()
            .and_then(|c| c.parts.iter().find_map(|p| p.text.clone()));
        match text {
            Some(t) => Ok(t),
            None => {
                let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
                Err(anyhow!("Gemini response empty. Finish reason: {}", reason))
            }
        }
    }

    fn first_image_data_uri(&self) -> Result<String> {
        let first = self.first_candidate()?;
        let inline = first
            .content
            .as_ref()
            .and_then(|c| c.parts.iter().find_map(|p| p.inline_data.as_ref()));
        match inline {
            Some(data) => Ok(format!("data:{};base64,{}", data.mime_type, data.data)),
            None => {
                let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
                Err(anyhow!("No image generated. Finish reason: {}", reason))
            }
        }
    }
}

fn user_content(text: &str) -> Vec<GeminiContent> {
    vec![GeminiContent {
        role: "user".to_string(),
        parts: vec![GeminiPart {
            text: text.to_string(),
        }],
    }]
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        let body = GeminiRequest {
            contents: user_content(&request.prompt),
            system_instruction: request.system.as_ref().map(|s| GeminiSystemInstruction {
                parts: vec![GeminiPart { text: s.clone() }],
            }),
            generation_config: request.schema.as_ref().map(|schema| GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: schema.clone(),
            }),
        };

        let result = self.generate_content(&self.text_model, &body).await?;
        result.first_text()
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, prompt: &str) -> Result<String> {
        let body = GeminiRequest {
            contents: user_content(prompt),
            system_instruction: None,
            generation_config: None,
        };

        let result = self.generate_content(&self.image_model, &body).await?;
        result.first_image_data_uri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(
            "test-key",
            "gemini-2.5-flash",
            "gemini-2.5-flash-image",
            &server.uri(),
        )
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.first_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_gemini_response_parsing_inline_image() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "Here is your panel" },
                            { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
                        ],
                        "role": "model"
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.first_image_data_uri().unwrap(),
            "data:image/png;base64,iVBORw0KGgo="
        );
    }

    #[test]
    fn test_gemini_response_text_only_has_no_image() {
        let json = r#"{
            "candidates": [
                {
                    "content": { "parts": [ { "text": "I cannot draw that" } ], "role": "model" },
                    "finishReason": "STOP"
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.first_image_data_uri().unwrap_err();
        assert!(err.to_string().contains("No image generated"));
    }

    #[test]
    fn test_request_serializes_schema_in_camel_case() {
        let body = GeminiRequest {
            contents: user_content("hi"),
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: "sys".to_string(),
                }],
            }),
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: json!({ "type": "ARRAY", "items": { "type": "STRING" } }),
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(value["generationConfig"]["responseSchema"]["type"], "ARRAY");
    }

    #[tokio::test]
    async fn test_generate_text_against_mock_server() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "[\"아이디어\"]" }], "role": "model" },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client
            .generate_text(&TextRequest {
                system: None,
                prompt: "ideas".to_string(),
                schema: Some(json!({ "type": "ARRAY", "items": { "type": "STRING" } })),
            })
            .await?;
        assert_eq!(text, "[\"아이디어\"]");
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_image_against_mock_server() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash-image:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "parts": [{ "inlineData": { "mimeType": "image/jpeg", "data": "AAAA" } }],
                        "role": "model"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let uri = client.generate_image("a cat").await?;
        assert_eq!(uri, "data:image/jpeg;base64,AAAA");
        Ok(())
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.generate_image("a cat").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("quota exceeded"));
    }

    #[test]
    fn test_create_generators_requires_api_key() {
        let mut config = Config::default();
        if let Some(gemini) = config.llm.gemini.as_mut() {
            gemini.api_key = String::new();
        }
        assert!(create_generators(&config).is_err());

        if let Some(gemini) = config.llm.gemini.as_mut() {
            gemini.api_key = "key".to_string();
        }
        assert!(create_generators(&config).is_ok());

        config.llm.provider = "ollama".to_string();
        assert!(create_generators(&config).is_err());
    }
}
