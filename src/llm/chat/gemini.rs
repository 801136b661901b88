use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use log::info;

use super::{ http_stream_generate, CompletionSource, FragmentStream };
use crate::llm::{ CompletionFailure, CompletionRequest, FailureKind };

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(default)]
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
struct GoogleError {
    #[serde(default)]
    code: Option<u16>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

/// Extracts the text of one SSE `data:` line. Lines without text yield nothing; an
/// `error` object sent mid-stream becomes a failure.
fn parse_gemini_line(line: &str) -> Option<Result<String, CompletionFailure>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }

    let chunk = serde_json::from_str::<GoogleChunk>(data).ok()?;
    if let Some(error) = &chunk.error {
        return Some(Err(CompletionFailure::from_status(error.code.unwrap_or(500), data)));
    }

    let text: String = chunk.candidates
        .first()?
        .content.as_ref()?
        .parts.iter()
        .filter_map(|p| p.text.as_deref())
        .collect();

    if text.is_empty() { None } else { Some(Ok(text)) }
}

pub struct GeminiChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(
        model: String,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if model.trim().is_empty() {
            return Err("Gemini model name must not be empty".into());
        }
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            http: HttpClient::new(),
            model,
            base_url,
        })
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl CompletionSource for GeminiChatClient {
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        api_key: &str
    ) -> Result<FragmentStream, CompletionFailure> {
        if api_key.is_empty() {
            return Err(
                CompletionFailure::new(FailureKind::Unauthenticated, None, "no API key available")
            );
        }

        let model = if request.model.is_empty() { &self.model } else { &request.model };
        info!(
            "GeminiChatClient::stream_completion() → model={} base_url={}",
            model,
            self.base_url
        );

        let payload = GeminiStreamRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: request.system_instruction.clone() }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart { text: request.prompt.clone() }],
            }],
            generation_config: GenerationConfig { temperature: request.temperature },
        };

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("x-goog-api-key".to_string(), api_key.to_string())
        ];

        http_stream_generate(&self.http, self.stream_url(model), payload, parse_gemini_line, headers).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
